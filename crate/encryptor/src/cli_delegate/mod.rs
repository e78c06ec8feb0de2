//! The cli-delegate mode.
//!
//! Another installation of the command-line tool, configured for direct HSM access, does the
//! work in a subprocess. That process competes for HSM sessions with everything else on the
//! host, so failures are retried with a linear backoff.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    Action, EncryptorError, EncryptorResult, ModeHandler,
    config::{CliDelegateConfig, DELEGATE_COMMAND, HSM_LIBRARY, HSM_PASSWORD, HSM_USERTYPE},
    cryptogram,
};

mod process;

pub use process::{CommandRunner, ProcessOutput, Sleeper, SystemCommandRunner, ThreadSleeper};

/// Attempts made before giving up
pub const MAX_ATTEMPTS: u32 = 3;

/// The wait after attempt `n` is `n` times this
pub const BACKOFF_STEP: Duration = Duration::from_secs(10);

pub struct DelegatingCliClient {
    config: CliDelegateConfig,
    runner: Arc<dyn CommandRunner>,
    sleeper: Arc<dyn Sleeper>,
}

impl DelegatingCliClient {
    #[must_use]
    pub fn new(config: CliDelegateConfig) -> Self {
        Self::with_collaborators(config, Arc::new(SystemCommandRunner), Arc::new(ThreadSleeper))
    }

    #[must_use]
    pub fn with_collaborators(
        config: CliDelegateConfig,
        runner: Arc<dyn CommandRunner>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            config,
            runner,
            sleeper,
        }
    }

    /// The arguments of the delegated command.
    ///
    /// Decrypt passes the ciphertext as a wrapped cryptogram. Encrypt passes the plaintext,
    /// which must then be UTF-8.
    pub fn arguments(&self, action: Action, text: &[u8]) -> EncryptorResult<Vec<String>> {
        let missing = |name: &str| EncryptorError::MissingConfiguration(name.to_owned());
        let user_type = self
            .config
            .user_type
            .as_deref()
            .ok_or_else(|| missing(HSM_USERTYPE))?;
        let password = self
            .config
            .password
            .as_deref()
            .ok_or_else(|| missing(HSM_PASSWORD))?;
        let library = self
            .config
            .library
            .as_deref()
            .ok_or_else(|| missing(HSM_LIBRARY))?;

        let string = match action {
            Action::Encrypt => String::from_utf8(text.to_vec()).map_err(|_| {
                EncryptorError::UnsupportedOperation(
                    "the delegated command only encrypts UTF-8 text".to_owned(),
                )
            })?,
            Action::Decrypt => cryptogram::wrap(text),
        };

        let mut args: Vec<String> = vec![
            action.to_string(),
            "-s".to_owned(),
            string,
            "--encrypt-method".to_owned(),
            "pkcs11".to_owned(),
            "--pkcs11-mode".to_owned(),
            "pkcs11".to_owned(),
            "--pkcs11-key-label".to_owned(),
            self.config.key_label.clone(),
            "--pkcs11-hsm-password".to_owned(),
            password.to_owned(),
            "--pkcs11-hsm-usertype".to_owned(),
            user_type.to_owned(),
            "--pkcs11-hsm-library".to_owned(),
            library.to_owned(),
            "--pkcs11-hsm-slot-id".to_owned(),
            self.config.slot_id.to_string(),
        ];
        if self.config.quiet {
            args.push("-q".to_owned());
        }
        Ok(args)
    }

    /// The configured command split into the program and its leading arguments, so that
    /// values such as `bundle exec eyaml` work.
    pub fn command(&self) -> EncryptorResult<(String, Vec<String>)> {
        let mut words = shlex::split(&self.config.command)
            .filter(|words| !words.is_empty())
            .ok_or_else(|| {
                EncryptorError::InvalidConfiguration(format!(
                    "{DELEGATE_COMMAND} is not a valid command: {:?}",
                    self.config.command
                ))
            })?;
        let program = words.remove(0);
        Ok((program, words))
    }

    fn attempt(
        &self,
        action: Action,
        program: &str,
        args: &[String],
        attempt: u32,
    ) -> EncryptorResult<Vec<u8>> {
        let output = self.runner.run(program, args)?;
        if !output.success {
            return Err(EncryptorError::DelegationFailed {
                attempts: attempt,
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_owned(),
            });
        }
        match action {
            Action::Decrypt => Ok(output.stdout),
            Action::Encrypt => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                cryptogram::find(&stdout)
                    .and_then(|wrapped| cryptogram::unwrap(wrapped).ok())
                    .ok_or_else(|| EncryptorError::DelegationFailed {
                        attempts: attempt,
                        stderr: format!(
                            "no wrapped cryptogram in the output: {}",
                            String::from_utf8_lossy(&output.stderr).trim_end()
                        ),
                    })
            }
        }
    }
}

impl ModeHandler for DelegatingCliClient {
    fn run(&self, action: Action, text: &[u8]) -> EncryptorResult<Vec<u8>> {
        let (program, mut args) = self.command()?;
        args.extend(self.arguments(action, text)?);
        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            debug!("delegating {action} to {program} (attempt {attempt}/{MAX_ATTEMPTS})");
            match self.attempt(action, &program, &args, attempt) {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => {
                    warn!("delegated {action} attempt {attempt}/{MAX_ATTEMPTS} failed: {e}");
                    last_error = match e {
                        EncryptorError::DelegationFailed { stderr, .. } => stderr,
                        other => other.to_string(),
                    };
                    if attempt < MAX_ATTEMPTS {
                        self.sleeper.sleep(BACKOFF_STEP * attempt);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(EncryptorError::DelegationFailed {
            attempts: MAX_ATTEMPTS,
            stderr: last_error,
        })
    }
}
