//! The interactive-delegate mode.
//!
//! The HSM is reached through the nCipher `preload` utility wrapping OpenSSL with the `chil`
//! engine. The engine insists on reading the softcard pass phrase from a terminal, so the
//! pipeline runs on a pseudo-terminal: the driver waits for the prompt, types the pass
//! phrase, then scrapes the result out of whatever the pipeline printed.

use std::{io::Write, sync::Arc};

use base64::{Engine, engine::general_purpose::STANDARD};
use tracing::{debug, warn};

use crate::{
    Action, EncryptorError, EncryptorResult, ModeHandler,
    config::{HSM_PASSWORD, InteractiveConfig},
};

mod output_parser;
mod terminal;

pub use output_parser::{
    DECRYPT_PATTERN, ENCRYPT_PATTERN, PROMPT, parse_output, read_remaining, read_until_prompt,
};
pub use terminal::{PtySpawner, TerminalProcess, TerminalSpawner};

pub struct InteractiveToolDriver {
    config: InteractiveConfig,
    spawner: Arc<dyn TerminalSpawner>,
}

impl InteractiveToolDriver {
    #[must_use]
    pub fn new(config: InteractiveConfig) -> Self {
        Self::with_spawner(config, Arc::new(PtySpawner))
    }

    #[must_use]
    pub fn with_spawner(config: InteractiveConfig, spawner: Arc<dyn TerminalSpawner>) -> Self {
        Self { config, spawner }
    }

    /// The shell pipeline performing `action` on `text`, every dynamic value quoted.
    pub fn command_line(&self, action: Action, text: &[u8]) -> EncryptorResult<String> {
        let preload = quote(&self.config.preload_path)?;
        let openssl = quote(&self.config.openssl_path)?;
        let softcard = quote(&self.config.softcard)?;
        let key_label = quote(&self.config.key_label)?;
        let rsautl = format!(
            "{preload} -s {softcard} {openssl} rsautl -engine chil -keyform engine -inkey \
             {key_label}"
        );
        Ok(match action {
            Action::Encrypt => {
                let plaintext = std::str::from_utf8(text).map_err(|_| {
                    EncryptorError::UnsupportedOperation(
                        "the interactive tool only encrypts UTF-8 text".to_owned(),
                    )
                })?;
                let plaintext = shlex::try_quote(plaintext).map_err(|_| {
                    EncryptorError::UnsupportedOperation(
                        "the interactive tool cannot encrypt text containing NUL".to_owned(),
                    )
                })?;
                format!("printf '%s' {plaintext} | {rsautl} -encrypt -pkcs | {openssl} base64 -A")
            }
            Action::Decrypt => {
                let ciphertext = quote(&STANDARD.encode(text))?;
                format!(
                    "printf '%s' {ciphertext} | {openssl} base64 -d -A | {rsautl} -decrypt -pkcs"
                )
            }
        })
    }
}

impl ModeHandler for InteractiveToolDriver {
    fn run(&self, action: Action, text: &[u8]) -> EncryptorResult<Vec<u8>> {
        let password = self
            .config
            .password
            .as_ref()
            .ok_or_else(|| EncryptorError::MissingConfiguration(HSM_PASSWORD.to_owned()))?;
        let command_line = self.command_line(action, text)?;
        debug!(
            "running the {action} pipeline with key {:?} on softcard {:?}",
            self.config.key_label, self.config.softcard
        );
        let mut process = self.spawner.spawn(&command_line, self.config.timeout)?;
        let captured = converse(process.as_mut(), password.as_bytes());
        if let Err(e) = process.terminate() {
            warn!("failed to terminate the interactive tool: {e}");
        }
        parse_output(action, &captured)
    }
}

/// Wait for the prompt, answer with the pass phrase, then drain the rest of the output.
/// Returns both reads joined. The second read does not stop at the prompt text, which may be
/// part of a decrypted payload.
fn converse(process: &mut dyn TerminalProcess, password: &[u8]) -> Vec<u8> {
    let mut captured = read_until_prompt(process, PROMPT);
    if !captured.ends_with(PROMPT.as_bytes()) {
        debug!("the interactive tool output ended before the pass phrase prompt");
    }
    let answer = [password, b"\n"].concat();
    if let Err(e) = process.write_all(&answer).and_then(|()| process.flush()) {
        // the regex decides whether the output is still usable
        debug!("could not send the pass phrase: {e}");
    }
    captured.extend(read_remaining(process));
    captured
}

fn quote(value: &str) -> EncryptorResult<String> {
    shlex::try_quote(value)
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| EncryptorError::InvalidConfiguration(format!("{value:?}: {e}")))
}
