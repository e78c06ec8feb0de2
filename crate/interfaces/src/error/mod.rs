use thiserror::Error;

pub type InterfaceResult<T> = Result<T, InterfaceError>;

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("{0}")]
    Default(String),

    #[error("Failed loading the HSM library: {0}")]
    Loading(String),

    #[error("HSM Error: {message}: {rv}")]
    Hsm { message: String, rv: u64 },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl InterfaceError {
    /// The raw PKCS#11 return value, when the HSM produced one
    #[must_use]
    pub const fn return_value(&self) -> Option<u64> {
        match self {
            Self::Hsm { rv, .. } => Some(*rv),
            _ => None,
        }
    }
}
