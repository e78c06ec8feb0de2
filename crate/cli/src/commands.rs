use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{
    actions::{decrypt::DecryptAction, encrypt::EncryptAction},
    config::{CliConf, EYAML_PKCS11_CONF_ENV},
    error::result::CliResult,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommands,

    /// TOML file of option names to values
    #[arg(long = "conf", env = EYAML_PKCS11_CONF_ENV, global = true)]
    pub conf: Option<PathBuf>,

    /// Do not log anything
    #[arg(short = 'q', long = "quiet", global = true)]
    pub quiet: bool,

    /// Log filter, e.g. `eyaml_pkcs11_encryptor=debug`; defaults to `RUST_LOG`
    #[arg(long = "rust-log", global = true)]
    pub rust_log: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommands {
    Encrypt(EncryptAction),
    Decrypt(DecryptAction),
}

impl Cli {
    pub fn run(&self) -> CliResult<()> {
        let conf = CliConf::load_optional(self.conf.as_deref())?;
        match &self.command {
            CliCommands::Encrypt(action) => action.run(&conf),
            CliCommands::Decrypt(action) => action.run(&conf),
        }
    }
}
