//! An encryption backend protecting short configuration secrets with keys held in an HSM.
//!
//! [`Pkcs11Encryptor`] exposes `encrypt` and `decrypt` and routes each call to one of four
//! strategies, selected by the `mode` option:
//!
//! - `hsm-direct`: RSA PKCS#1 v1.5 through the PKCS#11 library of the HSM
//! - `interactive-delegate`: the nCipher `preload` utility and the OpenSSL `chil` engine,
//!   driven through a pseudo-terminal
//! - `cli-delegate`: another installation of the command-line tool, run as a subprocess
//! - `local-public-key`: encryption only, with an RSA public key read from a PEM file

mod cli_delegate;
mod config;
mod cryptogram;
mod dispatcher;
mod error;
mod hsm_direct;
mod interactive;
mod local_key;
mod size_guard;

#[cfg(test)]
mod test_utils;

pub use cli_delegate::{
    BACKOFF_STEP, CommandRunner, DelegatingCliClient, MAX_ATTEMPTS, ProcessOutput, Sleeper,
    SystemCommandRunner, ThreadSleeper,
};
pub use config::*;
pub use cryptogram::{
    ENCRYPT_METHOD, find as find_cryptogram, unwrap as unwrap_cryptogram, wrap as wrap_cryptogram,
};
pub use dispatcher::{Action, Collaborators, ModeHandler, Pkcs11Encryptor};
pub use error::{
    EncryptorError,
    result::{EncryptorResult, EncryptorResultHelper},
};
pub use hsm_direct::HsmSessionClient;
pub use interactive::{
    DECRYPT_PATTERN, ENCRYPT_PATTERN, InteractiveToolDriver, PROMPT, PtySpawner, TerminalProcess,
    TerminalSpawner, parse_output, read_remaining, read_until_prompt,
};
pub use local_key::LocalKeyEncryptor;
pub use size_guard::{MAX_PLAINTEXT_SIZE, check as check_size};
