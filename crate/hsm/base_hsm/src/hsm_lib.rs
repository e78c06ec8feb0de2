use std::ptr;

use cosmian_pkcs11_sys::{
    CK_C_CloseSession, CK_C_Decrypt, CK_C_DecryptInit, CK_C_Encrypt, CK_C_EncryptInit,
    CK_C_Finalize, CK_C_FindObjects, CK_C_FindObjectsFinal, CK_C_FindObjectsInit, CK_C_GetInfo,
    CK_C_GetSlotList, CK_C_INITIALIZE_ARGS, CK_C_Initialize, CK_C_Login, CK_C_Logout,
    CK_C_OpenSession, CKF_OS_LOCKING_OK, CKR_CRYPTOKI_ALREADY_INITIALIZED, CKR_OK,
};
use libloading::Library;
use tracing::{debug, trace};

use crate::{HError, HResult};

/// A struct representing a Hardware Security Module (HSM) library interface using PKCS#11.
///
/// This struct provides a safe wrapper around the PKCS#11 library functions, managing
/// the dynamic loading of the HSM library and providing access to the functions the
/// encryptor needs: slot enumeration, sessions, login, object search and
/// single-part encryption and decryption.
///
/// # Safety
///
/// This struct handles unsafe FFI calls to the PKCS#11 library internally. The function
/// pointers are only reachable from within the crate.
///
/// The library is finalized through the `Drop` trait when the struct is dropped.
pub struct HsmLib {
    _library: Library,
    pub(crate) C_Initialize: CK_C_Initialize,
    pub(crate) C_Finalize: CK_C_Finalize,
    pub(crate) C_GetInfo: CK_C_GetInfo,
    pub(crate) C_GetSlotList: CK_C_GetSlotList,

    pub(crate) C_OpenSession: CK_C_OpenSession,
    pub(crate) C_CloseSession: CK_C_CloseSession,

    pub(crate) C_Login: CK_C_Login,
    pub(crate) C_Logout: CK_C_Logout,

    pub(crate) C_FindObjectsInit: CK_C_FindObjectsInit,
    pub(crate) C_FindObjects: CK_C_FindObjects,
    pub(crate) C_FindObjectsFinal: CK_C_FindObjectsFinal,

    pub(crate) C_Encrypt: CK_C_Encrypt,
    pub(crate) C_EncryptInit: CK_C_EncryptInit,

    pub(crate) C_Decrypt: CK_C_Decrypt,
    pub(crate) C_DecryptInit: CK_C_DecryptInit,
}

impl HsmLib {
    pub(crate) fn instantiate<P>(path: P) -> HResult<Self>
    where
        P: AsRef<std::ffi::OsStr>,
    {
        debug!("Loading PKCS#11 library {:?}", path.as_ref());
        #[allow(unsafe_code)]
        let hsm_lib = unsafe {
            let library = Library::new(path)?;
            Self {
                C_Initialize: Some(*library.get(b"C_Initialize")?),
                C_Finalize: Some(*library.get(b"C_Finalize")?),
                C_GetInfo: Some(*library.get(b"C_GetInfo")?),
                C_GetSlotList: Some(*library.get(b"C_GetSlotList")?),
                C_OpenSession: Some(*library.get(b"C_OpenSession")?),
                C_CloseSession: Some(*library.get(b"C_CloseSession")?),
                C_Login: Some(*library.get(b"C_Login")?),
                C_Logout: Some(*library.get(b"C_Logout")?),
                C_FindObjectsInit: Some(*library.get(b"C_FindObjectsInit")?),
                C_FindObjects: Some(*library.get(b"C_FindObjects")?),
                C_FindObjectsFinal: Some(*library.get(b"C_FindObjectsFinal")?),
                C_Encrypt: Some(*library.get(b"C_Encrypt")?),
                C_EncryptInit: Some(*library.get(b"C_EncryptInit")?),
                C_Decrypt: Some(*library.get(b"C_Decrypt")?),
                C_DecryptInit: Some(*library.get(b"C_DecryptInit")?),
                // we need to keep the library alive
                _library: library,
            }
        };
        hsm_lib.initialize()?;
        Ok(hsm_lib)
    }

    fn initialize(&self) -> HResult<()> {
        let mut p_init_args = CK_C_INITIALIZE_ARGS {
            CreateMutex: None,
            DestroyMutex: None,
            LockMutex: None,
            UnlockMutex: None,
            flags: CKF_OS_LOCKING_OK,
            pReserved: ptr::null_mut(),
        };
        #[allow(unsafe_code)]
        let rv = unsafe {
            self.C_Initialize.ok_or_else(|| {
                HError::Default("C_Initialize not available on library".to_owned())
            })?((&raw mut p_init_args).cast::<std::ffi::c_void>())
        };
        if rv == CKR_CRYPTOKI_ALREADY_INITIALIZED {
            trace!("PKCS#11 library already initialized in this process");
        } else if rv != CKR_OK {
            return Err(HError::Pkcs11 {
                message: "Failed initializing the HSM".to_owned(),
                rv: u64::from(rv),
            });
        }
        Ok(())
    }

    fn finalize(&self) -> HResult<()> {
        hsm_call!(
            self,
            "Failed to finalize the HSM",
            C_Finalize,
            ptr::null_mut()
        );
        Ok(())
    }
}

impl Drop for HsmLib {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            debug!("{e}");
        }
    }
}
