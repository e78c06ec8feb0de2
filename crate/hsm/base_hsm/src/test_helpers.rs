use crate::{HError, HResult};

/// Fallback library used when `HSM_PKCS11_LIB` is not set
const SOFTHSM2_PKCS11_LIB: &str = "/usr/lib/softhsm/libsofthsm2.so";

pub(crate) fn get_hsm_password() -> HResult<String> {
    std::env::var("HSM_USER_PASSWORD").map_err(|_| {
        HError::Default(
            "The user password for the HSM is not set. Please set the HSM_USER_PASSWORD \
             environment variable"
                .to_owned(),
        )
    })
}

pub(crate) fn get_hsm_slot_id() -> Option<u64> {
    std::env::var("HSM_SLOT_ID").ok()?.parse().ok()
}

pub(crate) fn get_hsm_lib_path() -> String {
    std::env::var("HSM_PKCS11_LIB").unwrap_or_else(|_| SOFTHSM2_PKCS11_LIB.to_owned())
}

pub(crate) fn get_hsm_key_label() -> String {
    std::env::var("HSM_KEY_LABEL").unwrap_or_else(|_| "eyaml".to_owned())
}
