//! In-memory collaborators shared by the unit tests.

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use eyaml_pkcs11_interfaces::{
    HsmInfo, HsmLibrary, HsmLibraryLoader, HsmMechanism, HsmSession, InterfaceError,
    InterfaceResult, ObjectClass, ObjectHandle, SlotId, UserType,
};
use openssl::{
    pkey::Private,
    rsa::{Padding, Rsa},
};
use zeroize::Zeroizing;

/// `CKR_PIN_INCORRECT`
const PIN_INCORRECT: u64 = 0xA0;
/// `CKR_ENCRYPTED_DATA_INVALID`
const ENCRYPTED_DATA_INVALID: u64 = 0x40;

#[derive(Clone)]
struct FakeObject {
    handle: ObjectHandle,
    class: ObjectClass,
    label: String,
    key: Rsa<Private>,
}

/// An HSM holding RSA key pairs in memory and recording every call made to it
#[derive(Clone)]
pub(crate) struct FakeHsm {
    calls: Arc<Mutex<Vec<String>>>,
    objects: Vec<FakeObject>,
    pin: String,
}

impl FakeHsm {
    /// An HSM with one 2048-bit key pair under `label`, unlocked by `pin`
    pub(crate) fn new(label: &str, pin: &str) -> Self {
        let mut hsm = Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            objects: Vec::new(),
            pin: pin.to_owned(),
        };
        hsm.add_key_pair(label);
        hsm
    }

    /// Add a second key pair with the same label, found after the first one
    pub(crate) fn with_duplicate_label(mut self) -> Self {
        let label = self.objects[0].label.clone();
        self.add_key_pair(&label);
        self
    }

    fn add_key_pair(&mut self, label: &str) {
        let key = Rsa::generate(2048).unwrap();
        let next = self.objects.len() as ObjectHandle;
        for (offset, class) in [ObjectClass::PublicKey, ObjectClass::PrivateKey]
            .into_iter()
            .enumerate()
        {
            self.objects.push(FakeObject {
                handle: next + offset as ObjectHandle + 1,
                class,
                label: label.to_owned(),
                key: key.clone(),
            });
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn object(&self, handle: ObjectHandle, class: ObjectClass) -> InterfaceResult<&FakeObject> {
        self.objects
            .iter()
            .find(|o| o.handle == handle && o.class == class)
            .ok_or_else(|| InterfaceError::NotFound(format!("no {class} with handle {handle}")))
    }
}

impl HsmLibrary for FakeHsm {
    fn info(&self) -> InterfaceResult<HsmInfo> {
        Ok(HsmInfo {
            cryptoki_version: (2, 40),
            manufacturer_id: "Fake".to_owned(),
            library_description: "In-memory HSM".to_owned(),
            library_version: (1, 0),
        })
    }

    fn active_slots(&self) -> InterfaceResult<Vec<SlotId>> {
        self.record("slots");
        Ok(vec![11, 12])
    }

    fn open_session(&self, slot_id: SlotId) -> InterfaceResult<Box<dyn HsmSession + '_>> {
        self.record(format!("open {slot_id}"));
        Ok(Box::new(FakeSession { hsm: self }))
    }
}

struct FakeSession<'a> {
    hsm: &'a FakeHsm,
}

impl HsmSession for FakeSession<'_> {
    fn login(&mut self, user_type: UserType, pin: &[u8]) -> InterfaceResult<()> {
        self.hsm.record(format!("login {user_type}"));
        if pin != self.hsm.pin.as_bytes() {
            return Err(InterfaceError::Hsm {
                message: "Failed logging in".to_owned(),
                rv: PIN_INCORRECT,
            });
        }
        Ok(())
    }

    fn logout(&mut self) -> InterfaceResult<()> {
        self.hsm.record("logout");
        Ok(())
    }

    fn find_objects(
        &mut self,
        class: ObjectClass,
        label: &[u8],
    ) -> InterfaceResult<Vec<ObjectHandle>> {
        self.hsm.record(format!(
            "find {class} {}",
            String::from_utf8_lossy(label)
        ));
        Ok(self
            .hsm
            .objects
            .iter()
            .filter(|o| o.class == class && o.label.as_bytes() == label)
            .map(|o| o.handle)
            .collect())
    }

    fn encrypt(
        &mut self,
        _mechanism: HsmMechanism,
        key: ObjectHandle,
        data: &[u8],
    ) -> InterfaceResult<Vec<u8>> {
        self.hsm.record(format!("encrypt {key}"));
        let rsa = &self.hsm.object(key, ObjectClass::PublicKey)?.key;
        let mut out = vec![0_u8; rsa.size() as usize];
        let len = rsa
            .public_encrypt(data, &mut out, Padding::PKCS1)
            .map_err(|e| InterfaceError::Hsm {
                message: e.to_string(),
                rv: ENCRYPTED_DATA_INVALID,
            })?;
        out.truncate(len);
        Ok(out)
    }

    fn decrypt(
        &mut self,
        _mechanism: HsmMechanism,
        key: ObjectHandle,
        data: &[u8],
    ) -> InterfaceResult<Zeroizing<Vec<u8>>> {
        self.hsm.record(format!("decrypt {key}"));
        let rsa = &self.hsm.object(key, ObjectClass::PrivateKey)?.key;
        let mut out = Zeroizing::new(vec![0_u8; rsa.size() as usize]);
        let len = rsa
            .private_decrypt(data, &mut out, Padding::PKCS1)
            .map_err(|e| InterfaceError::Hsm {
                message: e.to_string(),
                rv: ENCRYPTED_DATA_INVALID,
            })?;
        out.truncate(len);
        Ok(out)
    }
}

impl Drop for FakeSession<'_> {
    fn drop(&mut self) {
        self.hsm.record("close");
    }
}

/// Hands out the same [`FakeHsm`] whatever the path
pub(crate) struct FakeLoader {
    hsm: FakeHsm,
}

impl FakeLoader {
    pub(crate) fn new(hsm: &FakeHsm) -> Self {
        Self { hsm: hsm.clone() }
    }
}

impl HsmLibraryLoader for FakeLoader {
    fn load(&self, _path: &Path) -> InterfaceResult<Box<dyn HsmLibrary>> {
        self.hsm.record("load");
        Ok(Box::new(self.hsm.clone()))
    }
}
