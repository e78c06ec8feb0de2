//! Typed per-mode configuration, read from an [`OptionSource`] once per call.

use std::{path::PathBuf, time::Duration};

use strum::{Display, EnumString};
use tracing::debug;
use zeroize::Zeroizing;

use super::options::{
    DELEGATE_COMMAND, DELEGATE_QUIET, HSM_LIBRARY, HSM_PASSWORD, HSM_SLOT_ID, HSM_USERTYPE,
    KEY_LABEL, MODE, OFFLINE_PUBLICKEY, OPENSSL_PATH, OptionSource, OptionValue, PRELOAD_PATH,
    SOFTCARD, TOOL_TIMEOUT,
};
use crate::{EncryptorError, EncryptorResult};

/// The encryption strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum Mode {
    #[strum(to_string = "hsm-direct", serialize = "pkcs11")]
    HsmDirect,
    #[strum(to_string = "interactive-delegate", serialize = "chil")]
    InteractiveDelegate,
    #[strum(to_string = "cli-delegate")]
    CliDelegate,
    #[strum(to_string = "local-public-key", serialize = "offline")]
    LocalPublicKey,
}

impl Mode {
    pub fn parse(value: &str) -> EncryptorResult<Self> {
        value.trim().parse::<Self>().map_err(|_| {
            EncryptorError::InvalidConfiguration(format!("unknown mode: {value:?}"))
        })
    }

    /// Read and parse the `mode` option.
    pub fn from_source(source: &dyn OptionSource) -> EncryptorResult<Self> {
        let mode = optional_string(source, MODE)?
            .ok_or_else(|| EncryptorError::InvalidConfiguration("no mode configured".to_owned()))?;
        Self::parse(&mode)
    }
}

/// Settings of the `hsm-direct` mode.
///
/// User type, credential and library are optional here: their absence is reported by the
/// HSM client before the library is touched.
#[derive(Debug, Clone)]
pub struct HsmDirectConfig {
    pub library: Option<PathBuf>,
    /// 1-based index in the list of active slots
    pub slot_id: i64,
    pub key_label: String,
    pub user_type: Option<String>,
    pub password: Option<Zeroizing<String>>,
}

#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    pub preload_path: String,
    pub openssl_path: String,
    pub softcard: String,
    pub key_label: String,
    pub password: Option<Zeroizing<String>>,
    /// `None` waits forever
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct CliDelegateConfig {
    pub command: String,
    pub key_label: String,
    pub user_type: Option<String>,
    pub password: Option<Zeroizing<String>>,
    pub library: Option<String>,
    pub slot_id: i64,
    pub quiet: bool,
}

#[derive(Debug, Clone)]
pub struct LocalKeyConfig {
    pub public_key_path: PathBuf,
}

/// The configuration of the active mode, holding only what that mode reads
#[derive(Debug, Clone)]
pub enum ModeConfig {
    HsmDirect(HsmDirectConfig),
    InteractiveDelegate(InteractiveConfig),
    CliDelegate(CliDelegateConfig),
    LocalPublicKey(LocalKeyConfig),
}

impl ModeConfig {
    /// Read the mode, then the options of that mode only.
    pub fn from_source(source: &dyn OptionSource) -> EncryptorResult<Self> {
        let mode = Mode::from_source(source)?;
        debug!("selected mode: {mode}");
        Ok(match mode {
            Mode::HsmDirect => Self::HsmDirect(HsmDirectConfig {
                library: optional_string(source, HSM_LIBRARY)?.map(PathBuf::from),
                slot_id: required_integer(source, HSM_SLOT_ID)?,
                key_label: required_string(source, KEY_LABEL)?,
                user_type: optional_string(source, HSM_USERTYPE)?,
                password: optional_secret(source, HSM_PASSWORD)?,
            }),
            Mode::InteractiveDelegate => Self::InteractiveDelegate(InteractiveConfig {
                preload_path: required_string(source, PRELOAD_PATH)?,
                openssl_path: required_string(source, OPENSSL_PATH)?,
                softcard: required_string(source, SOFTCARD)?,
                key_label: required_string(source, KEY_LABEL)?,
                password: optional_secret(source, HSM_PASSWORD)?,
                timeout: timeout(required_integer(source, TOOL_TIMEOUT)?)?,
            }),
            Mode::CliDelegate => Self::CliDelegate(CliDelegateConfig {
                command: required_string(source, DELEGATE_COMMAND)?,
                key_label: required_string(source, KEY_LABEL)?,
                user_type: optional_string(source, HSM_USERTYPE)?,
                password: optional_secret(source, HSM_PASSWORD)?,
                library: optional_string(source, HSM_LIBRARY)?,
                slot_id: required_integer(source, HSM_SLOT_ID)?,
                quiet: required_bool(source, DELEGATE_QUIET)?,
            }),
            Mode::LocalPublicKey => Self::LocalPublicKey(LocalKeyConfig {
                public_key_path: PathBuf::from(required_string(source, OFFLINE_PUBLICKEY)?),
            }),
        })
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        match self {
            Self::HsmDirect(_) => Mode::HsmDirect,
            Self::InteractiveDelegate(_) => Mode::InteractiveDelegate,
            Self::CliDelegate(_) => Mode::CliDelegate,
            Self::LocalPublicKey(_) => Mode::LocalPublicKey,
        }
    }
}

fn timeout(seconds: i64) -> EncryptorResult<Option<Duration>> {
    match seconds {
        0 => Ok(None),
        s if s > 0 => Ok(Some(Duration::from_secs(s.unsigned_abs()))),
        s => Err(EncryptorError::InvalidConfiguration(format!(
            "{TOOL_TIMEOUT} must not be negative: {s}"
        ))),
    }
}

fn mismatch(name: &str, expected: &str, value: &OptionValue) -> EncryptorError {
    EncryptorError::InvalidConfiguration(format!(
        "option {name} must be of type {expected}, got: {value}"
    ))
}

/// A string option, `None` when undefined or empty
fn optional_string(source: &dyn OptionSource, name: &str) -> EncryptorResult<Option<String>> {
    match source.option(name) {
        None => Ok(None),
        Some(OptionValue::String(s)) if s.is_empty() => Ok(None),
        Some(OptionValue::String(s)) => Ok(Some(s)),
        Some(v) => Err(mismatch(name, "string", &v)),
    }
}

fn optional_secret(
    source: &dyn OptionSource,
    name: &str,
) -> EncryptorResult<Option<Zeroizing<String>>> {
    Ok(optional_string(source, name)?.map(Zeroizing::new))
}

fn required_string(source: &dyn OptionSource, name: &str) -> EncryptorResult<String> {
    optional_string(source, name)?
        .ok_or_else(|| EncryptorError::MissingConfiguration(name.to_owned()))
}

fn required_integer(source: &dyn OptionSource, name: &str) -> EncryptorResult<i64> {
    match source.option(name) {
        None => Err(EncryptorError::MissingConfiguration(name.to_owned())),
        Some(OptionValue::Integer(i)) => Ok(i),
        Some(v) => Err(mismatch(name, "integer", &v)),
    }
}

fn required_bool(source: &dyn OptionSource, name: &str) -> EncryptorResult<bool> {
    match source.option(name) {
        None => Err(EncryptorError::MissingConfiguration(name.to_owned())),
        Some(OptionValue::Boolean(b)) => Ok(b),
        Some(v) => Err(mismatch(name, "boolean", &v)),
    }
}
