use eyaml_pkcs11_encryptor::EncryptorError;
use thiserror::Error;

pub mod result;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Configuration(String),

    #[error(transparent)]
    Encryptor(#[from] EncryptorError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("{0}")]
    Default(String),
}

/// Return early with an error if a condition is not satisfied.
#[macro_export]
macro_rules! cli_ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($crate::cli_error!($msg));
        }
    };
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return ::core::result::Result::Err($err);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !$cond {
            return ::core::result::Result::Err($crate::cli_error!($fmt, $($arg)*));
        }
    };
}

/// Construct a CLI error from a string.
#[macro_export]
macro_rules! cli_error {
    ($msg:literal) => {
        $crate::error::CliError::Default(::core::format_args!($msg).to_string())
    };
    ($err:expr $(,)?) => ({
        $crate::error::CliError::Default($err.to_string())
    });
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::CliError::Default(::core::format_args!($fmt, $($arg)*).to_string())
    };
}
