use std::sync::Arc;

use eyaml_pkcs11_base_hsm::Pkcs11Loader;
use eyaml_pkcs11_interfaces::HsmLibraryLoader;
use strum::Display;
use tracing::debug;

use crate::{
    EncryptorError, EncryptorResult,
    cli_delegate::{CommandRunner, DelegatingCliClient, Sleeper, SystemCommandRunner, ThreadSleeper},
    config::{ModeConfig, OptionSource},
    hsm_direct::HsmSessionClient,
    interactive::{InteractiveToolDriver, PtySpawner, TerminalSpawner},
    local_key::LocalKeyEncryptor,
    size_guard,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Action {
    Encrypt,
    Decrypt,
}

/// One encryption strategy.
pub trait ModeHandler {
    fn run(&self, action: Action, text: &[u8]) -> EncryptorResult<Vec<u8>>;
}

/// The external resources the strategies talk to
#[derive(Clone)]
pub struct Collaborators {
    pub hsm_loader: Arc<dyn HsmLibraryLoader>,
    pub terminal: Arc<dyn TerminalSpawner>,
    pub runner: Arc<dyn CommandRunner>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            hsm_loader: Arc::new(Pkcs11Loader),
            terminal: Arc::new(PtySpawner),
            runner: Arc::new(SystemCommandRunner),
            sleeper: Arc::new(ThreadSleeper),
        }
    }
}

/// The PKCS#11 encryptor: reads the configured mode on every call and routes the call to the
/// matching strategy.
pub struct Pkcs11Encryptor<S: OptionSource> {
    options: S,
    collaborators: Collaborators,
}

impl<S: OptionSource> Pkcs11Encryptor<S> {
    pub fn new(options: S) -> Self {
        Self::with_collaborators(options, Collaborators::default())
    }

    pub const fn with_collaborators(options: S, collaborators: Collaborators) -> Self {
        Self {
            options,
            collaborators,
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> EncryptorResult<Vec<u8>> {
        size_guard::check(plaintext)?;
        self.handler()?.run(Action::Encrypt, plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> EncryptorResult<Vec<u8>> {
        self.handler()?.run(Action::Decrypt, ciphertext)
    }

    /// Key pairs are provisioned inside the HSM with the vendor tooling.
    pub fn create_keys(&self) -> EncryptorResult<()> {
        Err(EncryptorError::UnsupportedOperation(
            "key pair creation is not implemented".to_owned(),
        ))
    }

    fn handler(&self) -> EncryptorResult<Box<dyn ModeHandler>> {
        let config = ModeConfig::from_source(&self.options)?;
        let c = &self.collaborators;
        debug!("dispatching to the {} mode", config.mode());
        let handler: Box<dyn ModeHandler> = match config {
            ModeConfig::HsmDirect(config) => {
                Box::new(HsmSessionClient::with_loader(config, c.hsm_loader.clone()))
            }
            ModeConfig::InteractiveDelegate(config) => {
                Box::new(InteractiveToolDriver::with_spawner(config, c.terminal.clone()))
            }
            ModeConfig::CliDelegate(config) => Box::new(DelegatingCliClient::with_collaborators(
                config,
                c.runner.clone(),
                c.sleeper.clone(),
            )),
            ModeConfig::LocalPublicKey(config) => Box::new(LocalKeyEncryptor::new(config)),
        };
        Ok(handler)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use eyaml_pkcs11_interfaces::{HsmLibrary, InterfaceError, InterfaceResult};

    use super::*;
    use crate::{
        cli_delegate::ProcessOutput,
        config::{HSM_PASSWORD, MODE, OFFLINE_PUBLICKEY, Options},
        cryptogram,
        interactive::TerminalProcess,
        size_guard::MAX_PLAINTEXT_SIZE,
        test_utils::{FakeHsm, FakeLoader},
    };

    /// Counts every collaborator use and refuses to do anything
    #[derive(Default)]
    struct Spy {
        calls: AtomicUsize,
    }

    impl Spy {
        fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HsmLibraryLoader for Spy {
        fn load(&self, _path: &std::path::Path) -> InterfaceResult<Box<dyn HsmLibrary>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(InterfaceError::Default("spy".to_owned()))
        }
    }

    impl TerminalSpawner for Spy {
        fn spawn(
            &self,
            _command_line: &str,
            _timeout: Option<Duration>,
        ) -> EncryptorResult<Box<dyn TerminalProcess>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EncryptorError::Default("spy".to_owned()))
        }
    }

    impl CommandRunner for Spy {
        fn run(&self, _program: &str, _args: &[String]) -> EncryptorResult<ProcessOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EncryptorError::Default("spy".to_owned()))
        }
    }

    impl Sleeper for Spy {
        fn sleep(&self, _duration: Duration) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spied() -> (Arc<Spy>, Collaborators) {
        let spy = Arc::new(Spy::default());
        let collaborators = Collaborators {
            hsm_loader: spy.clone(),
            terminal: spy.clone(),
            runner: spy.clone(),
            sleeper: spy.clone(),
        };
        (spy, collaborators)
    }

    fn options(mode: &str) -> Options {
        Options::new()
            .with(MODE, mode)
            .and_then(|o| o.with(HSM_PASSWORD, "1234"))
            .unwrap()
    }

    #[test]
    fn test_oversized_plaintext_touches_nothing() {
        for mode in [
            "hsm-direct",
            "interactive-delegate",
            "cli-delegate",
            "local-public-key",
        ] {
            let (spy, collaborators) = spied();
            let encryptor = Pkcs11Encryptor::with_collaborators(options(mode), collaborators);
            match encryptor.encrypt(&[b'x'; MAX_PLAINTEXT_SIZE + 1]) {
                Err(EncryptorError::PayloadTooLarge { size, max }) => {
                    assert_eq!((size, max), (245, 244));
                }
                other => panic!("unexpected result for {mode}: {other:?}"),
            }
            assert_eq!(spy.count(), 0, "{mode}");
        }
    }

    #[test]
    fn test_unknown_mode_touches_nothing() {
        let (spy, collaborators) = spied();
        let encryptor = Pkcs11Encryptor::with_collaborators(options("rot13"), collaborators);
        for result in [encryptor.encrypt(b"secret"), encryptor.decrypt(b"secret")] {
            match result {
                Err(EncryptorError::InvalidConfiguration(msg)) => assert!(msg.contains("rot13")),
                other => panic!("unexpected result: {other:?}"),
            }
        }
        assert_eq!(spy.count(), 0);
    }

    #[test]
    fn test_routes_to_the_configured_mode() {
        for mode in ["pkcs11", "chil", "cli-delegate"] {
            let (spy, collaborators) = spied();
            let encryptor = Pkcs11Encryptor::with_collaborators(options(mode), collaborators);
            assert!(encryptor.decrypt(b"ciphertext").is_err());
            assert_eq!(spy.count(), 1, "{mode}");
        }
    }

    #[test]
    fn test_hsm_direct_round_trip() -> EncryptorResult<()> {
        let hsm = FakeHsm::new("eyaml", "1234");
        let collaborators = Collaborators {
            hsm_loader: Arc::new(FakeLoader::new(&hsm)),
            ..Collaborators::default()
        };
        let encryptor = Pkcs11Encryptor::with_collaborators(options("hsm-direct"), collaborators);
        let plaintext = [b'p'; MAX_PLAINTEXT_SIZE];
        let ciphertext = encryptor.encrypt(&plaintext)?;
        assert_eq!(encryptor.decrypt(&ciphertext)?, plaintext);
        Ok(())
    }

    /// A delegated tool backed by another encryptor in hsm-direct mode
    struct SelfDelegation {
        inner: Pkcs11Encryptor<Options>,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl CommandRunner for SelfDelegation {
        fn run(&self, _program: &str, args: &[String]) -> EncryptorResult<ProcessOutput> {
            let stdout = match args[0].as_str() {
                "encrypt" => {
                    let ciphertext = self.inner.encrypt(args[2].as_bytes())?;
                    format!("{}\n", cryptogram::wrap(&ciphertext)).into_bytes()
                }
                _ => self.inner.decrypt(&cryptogram::unwrap(&args[2])?)?,
            };
            Ok(ProcessOutput {
                success: true,
                code: Some(0),
                stdout,
                stderr: Vec::new(),
            })
        }
    }

    impl Sleeper for SelfDelegation {
        fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn test_cli_delegate_round_trip() -> EncryptorResult<()> {
        let hsm = FakeHsm::new("eyaml", "1234");
        let delegate = Arc::new(SelfDelegation {
            inner: Pkcs11Encryptor::with_collaborators(options("hsm-direct"), Collaborators {
                hsm_loader: Arc::new(FakeLoader::new(&hsm)),
                ..Collaborators::default()
            }),
            sleeps: Mutex::default(),
        });
        let collaborators = Collaborators {
            runner: delegate.clone(),
            sleeper: delegate.clone(),
            ..Collaborators::default()
        };
        let encryptor = Pkcs11Encryptor::with_collaborators(options("cli-delegate"), collaborators);
        let ciphertext = encryptor.encrypt(b"delegated secret")?;
        assert_eq!(encryptor.decrypt(&ciphertext)?, b"delegated secret");
        assert!(delegate.sleeps.lock().unwrap().is_empty());
        Ok(())
    }

    #[test]
    fn test_local_key_mode() -> EncryptorResult<()> {
        let key = openssl::rsa::Rsa::generate(2048)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("public.pem");
        std::fs::write(&path, key.public_key_to_pem()?)?;
        let options = Options::new()
            .with(MODE, "offline")?
            .with(OFFLINE_PUBLICKEY, path.to_string_lossy().into_owned())?;
        let (spy, collaborators) = spied();
        let encryptor = Pkcs11Encryptor::with_collaborators(options, collaborators);
        assert_eq!(encryptor.encrypt(b"secret")?.len(), 256);
        assert!(matches!(
            encryptor.decrypt(b"anything"),
            Err(EncryptorError::UnsupportedOperation(_))
        ));
        assert_eq!(spy.count(), 0);
        Ok(())
    }

    #[test]
    fn test_create_keys_is_not_implemented() {
        let encryptor = Pkcs11Encryptor::new(Options::new());
        assert!(matches!(
            encryptor.create_keys(),
            Err(EncryptorError::UnsupportedOperation(_))
        ));
    }
}
