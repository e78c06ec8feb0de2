use std::io::{self, Write};

use clap::Parser;
use eyaml_pkcs11_encryptor::{Pkcs11Encryptor, unwrap_cryptogram};
use tracing::info;

use super::Pkcs11Args;
use crate::{config::CliConf, error::result::CliResult};

/// Decrypt an `ENC[PKCS11,<base64>]` value and write the plaintext as is.
#[derive(Parser, Debug)]
pub struct DecryptAction {
    /// The wrapped cryptogram to decrypt
    #[clap(long = "string", short = 's')]
    pub string: String,

    #[command(flatten)]
    pub pkcs11: Pkcs11Args,
}

impl DecryptAction {
    pub fn run(&self, conf: &CliConf) -> CliResult<()> {
        let options = self.pkcs11.options(conf)?;
        let ciphertext = unwrap_cryptogram(&self.string)?;
        let plaintext = Pkcs11Encryptor::new(options).decrypt(&ciphertext)?;
        info!("decrypted {} bytes", plaintext.len());
        let mut stdout = io::stdout().lock();
        stdout.write_all(&plaintext)?;
        stdout.flush()?;
        Ok(())
    }
}
