use std::{convert::Infallible, num::TryFromIntError};

use eyaml_pkcs11_interfaces::InterfaceError;
use thiserror::Error;

pub type HResult<T> = Result<T, HError>;

#[derive(Error, Debug)]
pub enum HError {
    #[error("{0}")]
    Default(String),

    #[error("{message}: {rv}")]
    Pkcs11 { message: String, rv: u64 },

    #[error("Failed loading the PKCS#11 library: {0}")]
    Loading(#[from] libloading::Error),

    #[error("Integer conversion error: {0}")]
    Conversion(#[from] TryFromIntError),
}

impl From<HError> for InterfaceError {
    fn from(e: HError) -> Self {
        match e {
            HError::Pkcs11 { message, rv } => Self::Hsm { message, rv },
            HError::Loading(e) => Self::Loading(e.to_string()),
            e => Self::Default(e.to_string()),
        }
    }
}

// `CK_ULONG` is `u64` on most targets, where handle conversions cannot fail
impl From<Infallible> for HError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}
