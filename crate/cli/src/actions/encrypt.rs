use std::io::{self, Write};

use clap::Parser;
use eyaml_pkcs11_encryptor::{Pkcs11Encryptor, wrap_cryptogram};
use tracing::info;

use super::Pkcs11Args;
use crate::{config::CliConf, error::result::CliResult};

/// Encrypt a string and print it as `ENC[PKCS11,<base64>]`.
#[derive(Parser, Debug)]
pub struct EncryptAction {
    /// The plaintext to encrypt
    #[clap(long = "string", short = 's')]
    pub string: String,

    #[command(flatten)]
    pub pkcs11: Pkcs11Args,
}

impl EncryptAction {
    pub fn run(&self, conf: &CliConf) -> CliResult<()> {
        let encryptor = Pkcs11Encryptor::new(self.pkcs11.options(conf)?);
        let ciphertext = encryptor.encrypt(self.string.as_bytes())?;
        info!("encrypted {} bytes", self.string.len());
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", wrap_cryptogram(&ciphertext))?;
        stdout.flush()?;
        Ok(())
    }
}
