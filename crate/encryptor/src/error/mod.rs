use eyaml_pkcs11_interfaces::InterfaceError;
use thiserror::Error;

pub(crate) mod result;

#[derive(Error, Debug)]
pub enum EncryptorError {
    // A bad or unknown mode, option or option value
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // A required option has no value
    #[error("Missing configuration: {0} is not defined")]
    MissingConfiguration(String),

    #[error("Payload too large: {size} bytes, the maximum is {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Key not found: no object labelled {0:?}")]
    KeyNotFound(String),

    #[error("HSM login failed: {0}")]
    LoginFailed(String),

    // The interactive tool output could not be scraped
    #[error("Unparsable tool output: {output:?} does not match {pattern:?}")]
    UnparsableToolOutput { output: String, pattern: String },

    // The delegated command kept failing
    #[error("Delegation failed after {attempts} attempt(s): {stderr}")]
    DelegationFailed { attempts: u32, stderr: String },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error(transparent)]
    Hsm(#[from] InterfaceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    // Other errors
    #[error("{0}")]
    Default(String),
}

impl EncryptorError {
    /// Whether a subprocess-backed operation that failed with this error may be attempted again.
    /// Configuration, key and payload errors are terminal.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::DelegationFailed { .. } | Self::Io(_))
    }
}

impl From<std::string::FromUtf8Error> for EncryptorError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::Default(e.to_string())
    }
}

impl From<regex::Error> for EncryptorError {
    fn from(e: regex::Error) -> Self {
        Self::Default(e.to_string())
    }
}

/// Return early with an error if a condition is not satisfied.
///
/// This macro is equivalent to `if !$cond { return Err(From::from($err)); }`.
#[macro_export]
macro_rules! encryptor_ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::encryptor_error!($msg));
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($err);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return ::core::result::Result::Err($crate::encryptor_error!($fmt, $($arg)*));
        }
    };
}

/// Construct an encryptor error from a string.
#[macro_export]
macro_rules! encryptor_error {
    ($msg:literal) => {
        $crate::EncryptorError::Default(::core::format_args!($msg).to_string())
    };
    ($err:expr $(,)?) => ({
        $crate::EncryptorError::Default($err.to_string())
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::EncryptorError::Default(::core::format_args!($fmt, $($arg)*).to_string())
    };
}

/// Return early with an error.
#[macro_export]
macro_rules! encryptor_bail {
    ($msg:literal) => {
        return ::core::result::Result::Err($crate::encryptor_error!($msg))
    };
    ($err:expr $(,)?) => {
        return ::core::result::Result::Err($err)
    };
    ($fmt:expr, $($arg:tt)*) => {
        return ::core::result::Result::Err($crate::encryptor_error!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::EncryptorError;

    #[test]
    fn test_retryable_errors() {
        assert!(
            EncryptorError::DelegationFailed {
                attempts: 1,
                stderr: "busy".to_owned()
            }
            .is_retryable()
        );
        assert!(EncryptorError::Io(std::io::Error::other("broken pipe")).is_retryable());
        assert!(!EncryptorError::KeyNotFound("eyaml".to_owned()).is_retryable());
        assert!(!EncryptorError::InvalidConfiguration("mode".to_owned()).is_retryable());
        assert!(!EncryptorError::PayloadTooLarge { size: 245, max: 244 }.is_retryable());
    }

    #[test]
    fn test_messages() {
        let e = EncryptorError::UnparsableToolOutput {
            output: "garbage".to_owned(),
            pattern: "^x$".to_owned(),
        };
        assert_eq!(
            e.to_string(),
            "Unparsable tool output: \"garbage\" does not match \"^x$\""
        );
        assert_eq!(
            EncryptorError::MissingConfiguration("hsm_password".to_owned()).to_string(),
            "Missing configuration: hsm_password is not defined"
        );
    }
}
