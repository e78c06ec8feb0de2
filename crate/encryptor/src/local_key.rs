//! Encryption with a file-resident RSA public key, for hosts without HSM access.

use std::fs;

use openssl::{
    pkey::{PKey, Public},
    rsa::{Padding, Rsa},
};
use tracing::debug;

use crate::{
    Action, EncryptorError, EncryptorResult, ModeHandler, config::LocalKeyConfig, encryptor_bail,
    error::result::EncryptorResultHelper,
};

pub struct LocalKeyEncryptor {
    config: LocalKeyConfig,
}

impl LocalKeyEncryptor {
    #[must_use]
    pub const fn new(config: LocalKeyConfig) -> Self {
        Self { config }
    }

    /// Read the PEM public key, either a `PUBLIC KEY` (SPKI) or an `RSA PUBLIC KEY` (PKCS#1).
    fn public_key(&self) -> EncryptorResult<Rsa<Public>> {
        let path = &self.config.public_key_path;
        debug!("reading the public key {}", path.display());
        let pem = fs::read(path).context(&format!("cannot read {}", path.display()))?;
        match PKey::public_key_from_pem(&pem).and_then(|key| key.rsa()) {
            Ok(rsa) => Ok(rsa),
            Err(_) => Ok(Rsa::public_key_from_pem_pkcs1(&pem)?),
        }
    }

    fn encrypt(&self, plaintext: &[u8]) -> EncryptorResult<Vec<u8>> {
        let rsa = self.public_key()?;
        let mut ciphertext = vec![0_u8; usize::try_from(rsa.size()).context("key size")?];
        let len = rsa.public_encrypt(plaintext, &mut ciphertext, Padding::PKCS1)?;
        ciphertext.truncate(len);
        Ok(ciphertext)
    }
}

impl ModeHandler for LocalKeyEncryptor {
    fn run(&self, action: Action, text: &[u8]) -> EncryptorResult<Vec<u8>> {
        match action {
            Action::Encrypt => self.encrypt(text),
            Action::Decrypt => encryptor_bail!(EncryptorError::UnsupportedOperation(
                "no private key is available outside the HSM".to_owned(),
            )),
        }
    }
}
