//! Direct access to the HSM through its PKCS#11 library.
//!
//! Every call loads the library, opens one session on the configured slot, logs in, resolves
//! the key pair half by label, runs a single RSA PKCS#1 v1.5 operation and logs out. The
//! logout and the session close happen on every exit path once the login succeeded.

use std::{path::Path, sync::Arc};

use eyaml_pkcs11_base_hsm::Pkcs11Loader;
use eyaml_pkcs11_interfaces::{
    HsmLibrary, HsmLibraryLoader, HsmMechanism, HsmSession, ObjectClass, ObjectHandle, SlotId,
    UserType,
};
use tracing::{debug, warn};

use crate::{
    Action, EncryptorError, EncryptorResult, ModeHandler,
    config::{HSM_LIBRARY, HSM_PASSWORD, HSM_SLOT_ID, HSM_USERTYPE, HsmDirectConfig},
};

pub struct HsmSessionClient {
    config: HsmDirectConfig,
    loader: Arc<dyn HsmLibraryLoader>,
}

impl HsmSessionClient {
    /// A client loading the configured library from disk.
    #[must_use]
    pub fn new(config: HsmDirectConfig) -> Self {
        Self::with_loader(config, Arc::new(Pkcs11Loader))
    }

    #[must_use]
    pub fn with_loader(config: HsmDirectConfig, loader: Arc<dyn HsmLibraryLoader>) -> Self {
        Self { config, loader }
    }
}

impl ModeHandler for HsmSessionClient {
    fn run(&self, action: Action, text: &[u8]) -> EncryptorResult<Vec<u8>> {
        let user_type = self
            .config
            .user_type
            .as_deref()
            .ok_or_else(|| EncryptorError::MissingConfiguration(HSM_USERTYPE.to_owned()))?;
        let password = self
            .config
            .password
            .as_ref()
            .ok_or_else(|| EncryptorError::MissingConfiguration(HSM_PASSWORD.to_owned()))?;
        let library = self
            .config
            .library
            .as_deref()
            .ok_or_else(|| EncryptorError::MissingConfiguration(HSM_LIBRARY.to_owned()))?;
        let user_type = UserType::parse(user_type)
            .map_err(|e| EncryptorError::InvalidConfiguration(e.to_string()))?;

        let hsm = self.load(library)?;
        match hsm.info() {
            Ok(info) => debug!("{info}"),
            Err(e) => debug!("no HSM info: {e}"),
        }
        let slots = hsm.active_slots()?;
        let slot_id = select_slot(&slots, self.config.slot_id)?;
        debug!("using slot {slot_id} of {} active slot(s)", slots.len());

        let mut session = hsm.open_session(slot_id)?;
        session
            .login(user_type, password.as_bytes())
            .map_err(|e| {
                EncryptorError::LoginFailed(match e.return_value() {
                    Some(rv) => format!("the HSM rejected the login with CK_RV {rv:#x}"),
                    None => e.to_string(),
                })
            })?;
        let mut session = LoggedInSession { session };
        session.run(action, &self.config.key_label, text)
    }
}

impl HsmSessionClient {
    fn load(&self, library: &Path) -> EncryptorResult<Box<dyn HsmLibrary>> {
        debug!("loading the HSM library {}", library.display());
        Ok(self.loader.load(library)?)
    }
}

/// Pick the slot at the 1-based `slot_id` in the list of active slots.
fn select_slot(slots: &[SlotId], slot_id: i64) -> EncryptorResult<SlotId> {
    slot_id
        .checked_sub(1)
        .and_then(|index| usize::try_from(index).ok())
        .and_then(|index| slots.get(index))
        .copied()
        .ok_or_else(|| {
            EncryptorError::InvalidConfiguration(format!(
                "{HSM_SLOT_ID} {slot_id} is out of range, {} active slot(s) available",
                slots.len()
            ))
        })
}

/// A session that has been logged in. It is logged out, then closed, when dropped.
struct LoggedInSession<'a> {
    session: Box<dyn HsmSession + 'a>,
}

impl LoggedInSession<'_> {
    fn run(&mut self, action: Action, key_label: &str, text: &[u8]) -> EncryptorResult<Vec<u8>> {
        let class = match action {
            Action::Encrypt => ObjectClass::PublicKey,
            Action::Decrypt => ObjectClass::PrivateKey,
        };
        let key = self.find_key(class, key_label)?;
        match action {
            Action::Encrypt => Ok(self.session.encrypt(HsmMechanism::RsaPkcs, key, text)?),
            Action::Decrypt => {
                let mut plaintext = self.session.decrypt(HsmMechanism::RsaPkcs, key, text)?;
                Ok(std::mem::take(&mut *plaintext))
            }
        }
    }

    fn find_key(&mut self, class: ObjectClass, key_label: &str) -> EncryptorResult<ObjectHandle> {
        let handles = self.session.find_objects(class, key_label.as_bytes())?;
        match handles.as_slice() {
            [] => Err(EncryptorError::KeyNotFound(key_label.to_owned())),
            [handle] => Ok(*handle),
            [handle, ..] => {
                warn!(
                    "{} objects of class {class} are labelled {key_label:?}, using the first one",
                    handles.len()
                );
                Ok(*handle)
            }
        }
    }
}

impl Drop for LoggedInSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.session.logout() {
            warn!("failed logging out of the HSM session: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use eyaml_pkcs11_interfaces::InterfaceError;
    use zeroize::Zeroizing;

    use super::*;
    use crate::test_utils::{FakeHsm, FakeLoader};

    fn config(label: &str) -> HsmDirectConfig {
        HsmDirectConfig {
            library: Some(PathBuf::from("/usr/lib/libfake-pkcs11.so")),
            slot_id: 1,
            key_label: label.to_owned(),
            user_type: Some("USER".to_owned()),
            password: Some(Zeroizing::new("1234".to_owned())),
        }
    }

    #[test]
    fn test_round_trip() -> EncryptorResult<()> {
        let hsm = FakeHsm::new("eyaml", "1234");
        let client = HsmSessionClient::with_loader(config("eyaml"), Arc::new(FakeLoader::new(&hsm)));
        let ciphertext = client.run(Action::Encrypt, b"my secret")?;
        assert_eq!(ciphertext.len(), 256);
        assert_eq!(client.run(Action::Decrypt, &ciphertext)?, b"my secret");
        assert_eq!(
            hsm.calls(),
            vec![
                "load", "slots", "open 11", "login USER", "find CKO_PUBLIC_KEY eyaml", "encrypt 1",
                "logout", "close", "load", "slots", "open 11", "login USER",
                "find CKO_PRIVATE_KEY eyaml", "decrypt 2", "logout", "close",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_key_not_found_still_logs_out() {
        let hsm = FakeHsm::new("eyaml", "1234");
        let client =
            HsmSessionClient::with_loader(config("missing"), Arc::new(FakeLoader::new(&hsm)));
        match client.run(Action::Encrypt, b"secret") {
            Err(EncryptorError::KeyNotFound(label)) => assert_eq!(label, "missing"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(
            hsm.calls(),
            vec![
                "load",
                "slots",
                "open 11",
                "login USER",
                "find CKO_PUBLIC_KEY missing",
                "logout",
                "close"
            ]
        );
    }

    #[test]
    fn test_operation_failure_still_logs_out() {
        let hsm = FakeHsm::new("eyaml", "1234");
        let client = HsmSessionClient::with_loader(config("eyaml"), Arc::new(FakeLoader::new(&hsm)));
        // not a valid RSA ciphertext for the key
        assert!(matches!(
            client.run(Action::Decrypt, b"garbage"),
            Err(EncryptorError::Hsm(InterfaceError::Hsm { .. }))
        ));
        let calls = hsm.calls();
        assert_eq!(calls[calls.len() - 2..], ["logout", "close"]);
    }

    #[test]
    fn test_login_failure() {
        let hsm = FakeHsm::new("eyaml", "1234");
        let mut config = config("eyaml");
        config.password = Some(Zeroizing::new("0000".to_owned()));
        let client = HsmSessionClient::with_loader(config, Arc::new(FakeLoader::new(&hsm)));
        match client.run(Action::Encrypt, b"secret") {
            // CKR_PIN_INCORRECT
            Err(EncryptorError::LoginFailed(msg)) => assert!(msg.ends_with("CK_RV 0xa0"), "{msg}"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(hsm.calls(), vec!["load", "slots", "open 11", "login USER", "close"]);
    }

    #[test]
    fn test_missing_configuration() {
        let hsm = FakeHsm::new("eyaml", "1234");
        let cases: [(&str, fn(&mut HsmDirectConfig)); 3] = [
            (HSM_USERTYPE, |c| c.user_type = None),
            (HSM_PASSWORD, |c| c.password = None),
            (HSM_LIBRARY, |c| c.library = None),
        ];
        for (name, strip) in cases {
            let mut config = config("eyaml");
            strip(&mut config);
            let client = HsmSessionClient::with_loader(config, Arc::new(FakeLoader::new(&hsm)));
            match client.run(Action::Encrypt, b"secret") {
                Err(EncryptorError::MissingConfiguration(missing)) => assert_eq!(missing, name),
                other => panic!("unexpected result: {other:?}"),
            }
        }
        assert!(hsm.calls().is_empty());
    }

    #[test]
    fn test_slot_selection() {
        assert_eq!(select_slot(&[11, 12], 1).ok(), Some(11));
        assert_eq!(select_slot(&[11, 12], 2).ok(), Some(12));
        assert!(matches!(
            select_slot(&[11, 12], 3),
            Err(EncryptorError::InvalidConfiguration(_))
        ));
        assert!(select_slot(&[11, 12], 0).is_err());
        assert!(select_slot(&[], 1).is_err());
    }

    #[test]
    fn test_out_of_range_slot_opens_no_session() {
        let hsm = FakeHsm::new("eyaml", "1234");
        let mut config = config("eyaml");
        config.slot_id = 5;
        let client = HsmSessionClient::with_loader(config, Arc::new(FakeLoader::new(&hsm)));
        assert!(matches!(
            client.run(Action::Encrypt, b"secret"),
            Err(EncryptorError::InvalidConfiguration(_))
        ));
        assert_eq!(hsm.calls(), vec!["load", "slots"]);
    }

    #[test]
    fn test_duplicate_labels_use_the_first_object() -> EncryptorResult<()> {
        let hsm = FakeHsm::new("eyaml", "1234").with_duplicate_label();
        let client = HsmSessionClient::with_loader(config("eyaml"), Arc::new(FakeLoader::new(&hsm)));
        let ciphertext = client.run(Action::Encrypt, b"secret")?;
        assert_eq!(client.run(Action::Decrypt, &ciphertext)?, b"secret");
        let calls = hsm.calls();
        let used: Vec<&str> = calls
            .iter()
            .map(String::as_str)
            .filter(|call| call.starts_with("encrypt") || call.starts_with("decrypt"))
            .collect();
        // handles 3 and 4 belong to the second pair
        assert_eq!(used, ["encrypt 1", "decrypt 2"]);
        Ok(())
    }
}
