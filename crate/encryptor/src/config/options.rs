//! The option schema and its in-memory source.

use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
};

use strum::Display as StrumDisplay;

use crate::{EncryptorError, EncryptorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum OptionType {
    String,
    Integer,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl OptionValue {
    #[must_use]
    pub const fn kind(&self) -> OptionType {
        match self {
            Self::String(_) => OptionType::String,
            Self::Integer(_) => OptionType::Integer,
            Self::Boolean(_) => OptionType::Boolean,
        }
    }
}

impl Display for OptionValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Default value of an option, usable in a `static` table
#[derive(Debug, Clone, Copy)]
pub enum OptionDefault {
    String(&'static str),
    Integer(i64),
    Boolean(bool),
}

impl From<OptionDefault> for OptionValue {
    fn from(d: OptionDefault) -> Self {
        match d {
            OptionDefault::String(s) => Self::String(s.to_owned()),
            OptionDefault::Integer(i) => Self::Integer(i),
            OptionDefault::Boolean(b) => Self::Boolean(b),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: OptionType,
    pub default: OptionDefault,
}

pub const MODE: &str = "mode";
pub const HSM_LIBRARY: &str = "hsm_library";
pub const HSM_SLOT_ID: &str = "hsm_slot_id";
pub const KEY_LABEL: &str = "key_label";
pub const HSM_USERTYPE: &str = "hsm_usertype";
pub const HSM_PASSWORD: &str = "hsm_password";
pub const SOFTCARD: &str = "softcard";
pub const PRELOAD_PATH: &str = "preload_path";
pub const OPENSSL_PATH: &str = "openssl_path";
pub const TOOL_TIMEOUT: &str = "tool_timeout";
pub const DELEGATE_COMMAND: &str = "delegate_command";
pub const DELEGATE_QUIET: &str = "delegate_quiet";
pub const OFFLINE_PUBLICKEY: &str = "offline_publickey";

/// Every option the PKCS#11 encryptor recognises
pub static PKCS11_OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        name: MODE,
        description: "Encryption strategy: hsm-direct, interactive-delegate, cli-delegate or \
                      local-public-key",
        kind: OptionType::String,
        default: OptionDefault::String("hsm-direct"),
    },
    OptionSpec {
        name: HSM_LIBRARY,
        description: "Path to the PKCS#11 library of the HSM",
        kind: OptionType::String,
        default: OptionDefault::String("/opt/nfast/toolkits/pkcs11/libcknfast.so"),
    },
    OptionSpec {
        name: HSM_SLOT_ID,
        description: "Slot of the HSM holding the key, counting from 1",
        kind: OptionType::Integer,
        default: OptionDefault::Integer(1),
    },
    OptionSpec {
        name: KEY_LABEL,
        description: "Label of the RSA key pair inside the HSM",
        kind: OptionType::String,
        default: OptionDefault::String("eyaml"),
    },
    OptionSpec {
        name: HSM_USERTYPE,
        description: "HSM user type: USER, SO or CONTEXT_SPECIFIC",
        kind: OptionType::String,
        default: OptionDefault::String("USER"),
    },
    OptionSpec {
        name: HSM_PASSWORD,
        description: "HSM credential (pin or softcard pass phrase)",
        kind: OptionType::String,
        default: OptionDefault::String(""),
    },
    OptionSpec {
        name: SOFTCARD,
        description: "Softcard to preload for the interactive tool",
        kind: OptionType::String,
        default: OptionDefault::String("eyaml"),
    },
    OptionSpec {
        name: PRELOAD_PATH,
        description: "Path to the nCipher preload utility",
        kind: OptionType::String,
        default: OptionDefault::String("/opt/nfast/bin/preload"),
    },
    OptionSpec {
        name: OPENSSL_PATH,
        description: "Path to the openssl binary with the chil engine",
        kind: OptionType::String,
        default: OptionDefault::String("openssl"),
    },
    OptionSpec {
        name: TOOL_TIMEOUT,
        description: "Seconds to wait for output of the interactive tool, 0 waits forever",
        kind: OptionType::Integer,
        default: OptionDefault::Integer(60),
    },
    OptionSpec {
        name: DELEGATE_COMMAND,
        description: "Command re-invoked by the cli-delegate mode",
        kind: OptionType::String,
        default: OptionDefault::String("eyaml"),
    },
    OptionSpec {
        name: DELEGATE_QUIET,
        description: "Pass the quiet flag to the delegated command",
        kind: OptionType::Boolean,
        default: OptionDefault::Boolean(true),
    },
    OptionSpec {
        name: OFFLINE_PUBLICKEY,
        description: "PEM file holding the RSA public key used by the local-public-key mode",
        kind: OptionType::String,
        default: OptionDefault::String("/etc/puppetlabs/puppet/ssl/keys/pkcs11.publickey.pem"),
    },
];

/// Look an option up in the schema.
#[must_use]
pub fn option_spec(name: &str) -> Option<&'static OptionSpec> {
    PKCS11_OPTIONS.iter().find(|spec| spec.name == name)
}

/// Read-only lookup of option values by name.
///
/// Implementations return the operator override when there is one and the declared default
/// otherwise. Lookups have no side effect.
pub trait OptionSource {
    fn option(&self, name: &str) -> Option<OptionValue>;
}

/// Schema defaults overlaid with operator overrides
#[derive(Debug, Clone, Default)]
pub struct Options {
    overrides: HashMap<&'static str, OptionValue>,
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override an option.
    ///
    /// Strings are parsed for integer and boolean options. Unknown names and values that
    /// cannot be converted to the declared type are rejected.
    pub fn set<V: Into<OptionValue>>(&mut self, name: &str, value: V) -> EncryptorResult<()> {
        let spec = option_spec(name).ok_or_else(|| {
            EncryptorError::InvalidConfiguration(format!("unknown option: {name}"))
        })?;
        let value = coerce(spec, value.into())?;
        self.overrides.insert(spec.name, value);
        Ok(())
    }

    /// Builder flavour of [`Options::set`]
    pub fn with<V: Into<OptionValue>>(mut self, name: &str, value: V) -> EncryptorResult<Self> {
        self.set(name, value)?;
        Ok(self)
    }
}

impl OptionSource for Options {
    fn option(&self, name: &str) -> Option<OptionValue> {
        self.overrides
            .get(name)
            .cloned()
            .or_else(|| option_spec(name).map(|spec| spec.default.into()))
    }
}

fn coerce(spec: &OptionSpec, value: OptionValue) -> EncryptorResult<OptionValue> {
    let invalid = |value: &dyn Display| {
        EncryptorError::InvalidConfiguration(format!(
            "option {} must be of type {}, got: {value}",
            spec.name, spec.kind
        ))
    };
    match (spec.kind, value) {
        (OptionType::String, v @ OptionValue::String(_))
        | (OptionType::Integer, v @ OptionValue::Integer(_))
        | (OptionType::Boolean, v @ OptionValue::Boolean(_)) => Ok(v),
        (OptionType::Integer, OptionValue::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(OptionValue::Integer)
            .map_err(|_| invalid(&s)),
        (OptionType::Boolean, OptionValue::String(s)) => {
            match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(OptionValue::Boolean(true)),
                "false" | "no" | "0" => Ok(OptionValue::Boolean(false)),
                _ => Err(invalid(&s)),
            }
        }
        (_, v) => Err(invalid(&v)),
    }
}
