//! A PKCS#11 session on one HSM slot.
//!
//! The session supports the operations the encryptor performs inside a single scope:
//! login, lookup of a key object by class and label, one RSA PKCS#1 v1.5 encryption or
//! decryption, and logout. The session is closed when the value is dropped.

use std::{ptr, sync::Arc};

use cosmian_pkcs11_sys::{
    CK_ATTRIBUTE, CK_MECHANISM, CK_OBJECT_CLASS, CK_OBJECT_HANDLE, CK_SESSION_HANDLE, CK_ULONG,
    CK_USER_TYPE, CK_UTF8CHAR_PTR, CKA_CLASS, CKA_LABEL, CKM_RSA_PKCS, CKO_PRIVATE_KEY,
    CKO_PUBLIC_KEY, CKR_OK, CKR_USER_ALREADY_LOGGED_IN, CKR_USER_NOT_LOGGED_IN, CKU_CONTEXT_SPECIFIC,
    CKU_SO, CKU_USER,
};
use eyaml_pkcs11_interfaces::{
    HsmMechanism, HsmSession, InterfaceResult, ObjectClass, ObjectHandle, UserType,
};
use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

use crate::{HError, HResult, hsm_lib::HsmLib};

/// Maximum number of handles fetched per `C_FindObjects` call
const FIND_MAX_OBJECT_COUNT: CK_ULONG = 64;

pub struct Pkcs11Session {
    hsm: Arc<HsmLib>,
    handle: CK_SESSION_HANDLE,
    logged_in: bool,
}

impl Pkcs11Session {
    pub(crate) fn new(hsm: Arc<HsmLib>, handle: CK_SESSION_HANDLE) -> Self {
        Self {
            hsm,
            handle,
            logged_in: false,
        }
    }

    pub fn login(&mut self, user_type: UserType, pin: &[u8]) -> HResult<()> {
        let user_type: CK_USER_TYPE = match user_type {
            UserType::So => CKU_SO,
            UserType::User => CKU_USER,
            UserType::ContextSpecific => CKU_CONTEXT_SPECIFIC,
        };
        let mut pin = Zeroizing::new(pin.to_vec());
        #[allow(unsafe_code)]
        let rv = unsafe {
            self.hsm
                .C_Login
                .ok_or_else(|| HError::Default("C_Login not available on library".to_owned()))?(
                self.handle,
                user_type,
                pin.as_mut_ptr() as CK_UTF8CHAR_PTR,
                CK_ULONG::try_from(pin.len())?,
            )
        };
        if rv == CKR_USER_ALREADY_LOGGED_IN {
            warn!("user already logged in, ignoring logging");
        } else if rv != CKR_OK {
            return Err(HError::Pkcs11 {
                message: "Failed logging in".to_owned(),
                rv: u64::from(rv),
            });
        }
        self.logged_in = true;
        Ok(())
    }

    pub fn logout(&mut self) -> HResult<()> {
        #[allow(unsafe_code)]
        let rv = unsafe {
            self.hsm
                .C_Logout
                .ok_or_else(|| HError::Default("C_Logout not available on library".to_owned()))?(
                self.handle,
            )
        };
        self.logged_in = false;
        if rv == CKR_USER_NOT_LOGGED_IN {
            trace!("session {} was not logged in", self.handle);
        } else if rv != CKR_OK {
            return Err(HError::Pkcs11 {
                message: "Failed logging out".to_owned(),
                rv: u64::from(rv),
            });
        }
        Ok(())
    }

    /// Search for the handles of the objects of the given class carrying the given label.
    pub fn find_object_handles(
        &self,
        class: ObjectClass,
        label: &[u8],
    ) -> HResult<Vec<CK_OBJECT_HANDLE>> {
        let class: CK_OBJECT_CLASS = match class {
            ObjectClass::PublicKey => CKO_PUBLIC_KEY,
            ObjectClass::PrivateKey => CKO_PRIVATE_KEY,
        };
        let mut template = [
            CK_ATTRIBUTE {
                type_: CKA_CLASS,
                pValue: std::ptr::from_ref(&class)
                    .cast::<std::ffi::c_void>()
                    .cast_mut(),
                ulValueLen: CK_ULONG::try_from(size_of::<CK_OBJECT_CLASS>())?,
            },
            CK_ATTRIBUTE {
                type_: CKA_LABEL,
                pValue: label.as_ptr().cast::<std::ffi::c_void>().cast_mut(),
                ulValueLen: CK_ULONG::try_from(label.len())?,
            },
        ];
        hsm_call!(
            self.hsm,
            "Failed to initialize object search",
            C_FindObjectsInit,
            self.handle,
            template.as_mut_ptr(),
            CK_ULONG::try_from(template.len())?
        );

        let mut object_handles: Vec<CK_OBJECT_HANDLE> = Vec::new();
        let mut handles_buf =
            vec![CK_OBJECT_HANDLE::default(); usize::try_from(FIND_MAX_OBJECT_COUNT)?];
        loop {
            let mut object_count: CK_ULONG = 0;
            hsm_call!(
                self.hsm,
                "Failed to find objects",
                C_FindObjects,
                self.handle,
                handles_buf.as_mut_ptr(),
                FIND_MAX_OBJECT_COUNT,
                &raw mut object_count
            );
            if object_count == 0 {
                break;
            }
            trace!("Found {object_count} objects");
            object_handles.extend_from_slice(
                handles_buf
                    .get(..usize::try_from(object_count)?)
                    .ok_or_else(|| {
                        HError::Default("More objects returned than requested".to_owned())
                    })?,
            );
        }
        hsm_call!(
            self.hsm,
            "Failed to finalize object search",
            C_FindObjectsFinal,
            self.handle
        );
        Ok(object_handles)
    }

    pub fn encrypt_with_mechanism(
        &self,
        key_handle: CK_OBJECT_HANDLE,
        mechanism: &mut CK_MECHANISM,
        data: &[u8],
    ) -> HResult<Vec<u8>> {
        let mut data = data.to_vec();
        hsm_call!(
            self.hsm,
            "Failed to initialize encryption",
            C_EncryptInit,
            self.handle,
            mechanism,
            key_handle
        );

        let mut encrypted_data_len: CK_ULONG = 0;
        hsm_call!(
            self.hsm,
            format!(
                "Failed to allocate encrypted data length. Data to encrypt is likely too big: {} \
                 bytes. Error code",
                data.len()
            ),
            C_Encrypt,
            self.handle,
            data.as_mut_ptr(),
            CK_ULONG::try_from(data.len())?,
            ptr::null_mut(),
            &raw mut encrypted_data_len
        );

        let mut encrypted_data = vec![0_u8; usize::try_from(encrypted_data_len)?];
        hsm_call!(
            self.hsm,
            "Failed to encrypt data",
            C_Encrypt,
            self.handle,
            data.as_mut_ptr(),
            CK_ULONG::try_from(data.len())?,
            encrypted_data.as_mut_ptr(),
            &raw mut encrypted_data_len
        );

        encrypted_data.truncate(usize::try_from(encrypted_data_len)?);
        Ok(encrypted_data)
    }

    pub fn decrypt_with_mechanism(
        &self,
        key_handle: CK_OBJECT_HANDLE,
        mechanism: &mut CK_MECHANISM,
        encrypted_data: &[u8],
    ) -> HResult<Zeroizing<Vec<u8>>> {
        let mut encrypted_data = encrypted_data.to_vec();
        hsm_call!(
            self.hsm,
            "Failed to initialize decryption",
            C_DecryptInit,
            self.handle,
            mechanism,
            key_handle
        );

        let mut decrypted_data_len: CK_ULONG = 0;
        hsm_call!(
            self.hsm,
            "Failed to get decrypted data length",
            C_Decrypt,
            self.handle,
            encrypted_data.as_mut_ptr(),
            CK_ULONG::try_from(encrypted_data.len())?,
            ptr::null_mut(),
            &raw mut decrypted_data_len
        );

        let mut decrypted_data = Zeroizing::new(vec![0_u8; usize::try_from(decrypted_data_len)?]);
        hsm_call!(
            self.hsm,
            "Failed to decrypt data",
            C_Decrypt,
            self.handle,
            encrypted_data.as_mut_ptr(),
            CK_ULONG::try_from(encrypted_data.len())?,
            decrypted_data.as_mut_ptr(),
            &raw mut decrypted_data_len
        );

        decrypted_data.truncate(usize::try_from(decrypted_data_len)?);
        Ok(decrypted_data)
    }

    /// Close the session, logging out first if the session is still logged in
    pub fn close(&mut self) -> HResult<()> {
        if self.logged_in {
            self.logout()?;
        }
        hsm_call!(
            self.hsm,
            "Failed closing a session",
            C_CloseSession,
            self.handle
        );
        debug!("Closed session {}", self.handle);
        Ok(())
    }
}

fn mechanism(mechanism: HsmMechanism) -> CK_MECHANISM {
    match mechanism {
        HsmMechanism::RsaPkcs => CK_MECHANISM {
            mechanism: CKM_RSA_PKCS,
            pParameter: ptr::null_mut(),
            ulParameterLen: 0,
        },
    }
}

impl Drop for Pkcs11Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close the HSM session {}: {e}", self.handle);
        }
    }
}

impl HsmSession for Pkcs11Session {
    fn login(&mut self, user_type: UserType, pin: &[u8]) -> InterfaceResult<()> {
        Ok(Self::login(self, user_type, pin)?)
    }

    fn logout(&mut self) -> InterfaceResult<()> {
        Ok(Self::logout(self)?)
    }

    fn find_objects(
        &mut self,
        class: ObjectClass,
        label: &[u8],
    ) -> InterfaceResult<Vec<ObjectHandle>> {
        Ok(self
            .find_object_handles(class, label)?
            .into_iter()
            .map(u64::from)
            .collect())
    }

    fn encrypt(
        &mut self,
        mechanism_type: HsmMechanism,
        key: ObjectHandle,
        data: &[u8],
    ) -> InterfaceResult<Vec<u8>> {
        let key_handle = CK_OBJECT_HANDLE::try_from(key).map_err(HError::from)?;
        Ok(self.encrypt_with_mechanism(key_handle, &mut mechanism(mechanism_type), data)?)
    }

    fn decrypt(
        &mut self,
        mechanism_type: HsmMechanism,
        key: ObjectHandle,
        data: &[u8],
    ) -> InterfaceResult<Zeroizing<Vec<u8>>> {
        let key_handle = CK_OBJECT_HANDLE::try_from(key).map_err(HError::from)?;
        Ok(self.decrypt_with_mechanism(key_handle, &mut mechanism(mechanism_type), data)?)
    }
}
