#![allow(non_snake_case)]

/// Call a PKCS#11 function of the loaded library and return early
/// with an `HError::Pkcs11` if it does not return `CKR_OK`.
macro_rules! hsm_call {
    ($hsm:expr, $msg:expr, $func:ident $(, $arg:expr)* $(,)?) => {{
        #[allow(unsafe_code)]
        let rv = unsafe {
            $hsm.$func.ok_or_else(|| {
                $crate::HError::Default(format!("{} not available on library", stringify!($func)))
            })?($($arg),*)
        };
        if rv != cosmian_pkcs11_sys::CKR_OK {
            return Err($crate::HError::Pkcs11 {
                message: ($msg).to_string(),
                rv: u64::from(rv),
            });
        }
    }};
}

mod base_hsm;
mod error;
mod hsm_lib;
mod session;

pub use base_hsm::{BaseHsm, Pkcs11Loader};
pub use error::{HError, HResult};
pub use session::Pkcs11Session;

#[cfg(test)]
#[cfg(feature = "hsm")]
mod test_helpers;
