use std::{path::Path, ptr, sync::Arc};

use cosmian_pkcs11_sys::{
    CK_FLAGS, CK_INFO, CK_SESSION_HANDLE, CK_SLOT_ID, CK_TRUE, CK_ULONG, CKF_RW_SESSION,
    CKF_SERIAL_SESSION,
};
use eyaml_pkcs11_interfaces::{
    HsmInfo, HsmLibrary, HsmLibraryLoader, HsmSession, InterfaceResult, SlotId,
};
use tracing::debug;

use crate::{HResult, hsm_lib::HsmLib, session::Pkcs11Session};

/// A PKCS#11 library loaded from disk.
///
/// Sessions opened from it share the library through an `Arc`, so the library is only
/// finalized once the last session has been closed.
pub struct BaseHsm {
    hsm_lib: Arc<HsmLib>,
}

impl BaseHsm {
    pub fn instantiate<P: AsRef<std::ffi::OsStr>>(path: P) -> HResult<Self> {
        let hsm_lib = Arc::new(HsmLib::instantiate(path)?);
        Ok(Self { hsm_lib })
    }

    pub fn get_info(&self) -> HResult<HsmInfo> {
        let mut info = CK_INFO::default();
        hsm_call!(
            self.hsm_lib,
            "Failed getting HSM info",
            C_GetInfo,
            &raw mut info
        );
        Ok(HsmInfo {
            cryptoki_version: (info.cryptokiVersion.major, info.cryptokiVersion.minor),
            manufacturer_id: blank_padded(&info.manufacturerID),
            library_description: blank_padded(&info.libraryDescription),
            library_version: (info.libraryVersion.major, info.libraryVersion.minor),
        })
    }

    /// List the slots with a token present, in the order given by the library.
    pub fn get_active_slot_list(&self) -> HResult<Vec<SlotId>> {
        let mut count: CK_ULONG = 0;
        hsm_call!(
            self.hsm_lib,
            "Failed counting the slots",
            C_GetSlotList,
            CK_TRUE,
            ptr::null_mut(),
            &raw mut count
        );
        let mut slots: Vec<CK_SLOT_ID> = vec![0; usize::try_from(count)?];
        hsm_call!(
            self.hsm_lib,
            "Failed listing the slots",
            C_GetSlotList,
            CK_TRUE,
            slots.as_mut_ptr(),
            &raw mut count
        );
        slots.truncate(usize::try_from(count)?);
        Ok(slots.into_iter().map(u64::from).collect())
    }

    /// Open a serial read/write session on the slot.
    /// The session is closed when the returned value is dropped.
    pub fn open_pkcs11_session(&self, slot_id: SlotId) -> HResult<Pkcs11Session> {
        let flags: CK_FLAGS = CKF_RW_SESSION | CKF_SERIAL_SESSION;
        let mut session_handle: CK_SESSION_HANDLE = 0;
        hsm_call!(
            self.hsm_lib,
            format!("Failed opening a session on slot {slot_id}"),
            C_OpenSession,
            CK_SLOT_ID::try_from(slot_id)?,
            flags,
            ptr::null_mut(),
            None,
            &raw mut session_handle
        );
        debug!("Opened session {session_handle} on slot {slot_id}");
        Ok(Pkcs11Session::new(self.hsm_lib.clone(), session_handle))
    }
}

/// PKCS#11 info strings are fixed width and padded with blanks
fn blank_padded(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches([' ', '\0'])
        .to_owned()
}

impl HsmLibrary for BaseHsm {
    fn info(&self) -> InterfaceResult<HsmInfo> {
        Ok(self.get_info()?)
    }

    fn active_slots(&self) -> InterfaceResult<Vec<SlotId>> {
        Ok(self.get_active_slot_list()?)
    }

    fn open_session(&self, slot_id: SlotId) -> InterfaceResult<Box<dyn HsmSession + '_>> {
        Ok(Box::new(self.open_pkcs11_session(slot_id)?))
    }
}

/// Loads PKCS#11 libraries from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pkcs11Loader;

impl HsmLibraryLoader for Pkcs11Loader {
    fn load(&self, path: &Path) -> InterfaceResult<Box<dyn HsmLibrary>> {
        let hsm = BaseHsm::instantiate(path)?;
        Ok(Box::new(hsm))
    }
}

#[cfg(test)]
mod tests {
    use super::blank_padded;

    #[test]
    fn test_blank_padded() {
        let mut field = [b' '; 32];
        field[..7].copy_from_slice(b"nCipher");
        assert_eq!(blank_padded(&field), "nCipher");
        assert_eq!(blank_padded(b"SoftHSM\0\0\0"), "SoftHSM");
        assert_eq!(blank_padded(b""), "");
    }
}
