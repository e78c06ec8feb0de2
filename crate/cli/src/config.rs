use std::{collections::BTreeMap, fs, path::Path};

use eyaml_pkcs11_encryptor::{OptionValue, Options};
use serde::Deserialize;
use tracing::debug;

use crate::{
    cli_ensure,
    error::{CliError, result::CliResult},
};

/// Environment variable naming the configuration file
pub const EYAML_PKCS11_CONF_ENV: &str = "EYAML_PKCS11_CONF";

/// A scalar value of the configuration file
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConfValue {
    Boolean(bool),
    Integer(i64),
    String(String),
}

impl From<ConfValue> for OptionValue {
    fn from(value: ConfValue) -> Self {
        match value {
            ConfValue::Boolean(b) => Self::Boolean(b),
            ConfValue::Integer(i) => Self::Integer(i),
            ConfValue::String(s) => Self::String(s),
        }
    }
}

/// Options read from a TOML file holding a flat table of option names to values:
///
/// ```toml
/// mode = "hsm-direct"
/// hsm_library = "/usr/lib/softhsm/libsofthsm2.so"
/// hsm_slot_id = 1
/// key_label = "eyaml"
/// ```
#[derive(Deserialize, Debug, Default, PartialEq, Eq)]
pub struct CliConf {
    #[serde(flatten)]
    pub options: BTreeMap<String, ConfValue>,
}

impl CliConf {
    pub fn load(path: &Path) -> CliResult<Self> {
        debug!("reading the configuration file {}", path.display());
        cli_ensure!(
            path.is_file(),
            CliError::Configuration(format!(
                "configuration file not found: {}",
                path.display()
            ))
        );
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load the file when one is given, otherwise start empty.
    pub fn load_optional(path: Option<&Path>) -> CliResult<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    /// Overlay the file values onto `options`.
    /// Unknown option names and values of the wrong type are rejected.
    pub fn apply(&self, options: &mut Options) -> CliResult<()> {
        for (name, value) in &self.options {
            options.set(name, value.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use eyaml_pkcs11_encryptor::{
        DELEGATE_QUIET, HSM_SLOT_ID, KEY_LABEL, MODE, OptionSource,
    };

    use super::*;
    use crate::error::CliError;

    #[test]
    fn test_load_and_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eyaml-pkcs11.toml");
        fs::write(
            &path,
            "mode = \"offline\"\nhsm_slot_id = 2\ndelegate_quiet = false\nkey_label = \"prod\"\n",
        )
        .unwrap();
        let conf = CliConf::load(&path).unwrap();
        let mut options = Options::new();
        conf.apply(&mut options).unwrap();
        assert_eq!(options.option(MODE), Some(OptionValue::from("offline")));
        assert_eq!(options.option(HSM_SLOT_ID), Some(OptionValue::Integer(2)));
        assert_eq!(options.option(DELEGATE_QUIET), Some(OptionValue::Boolean(false)));
        assert_eq!(options.option(KEY_LABEL), Some(OptionValue::from("prod")));
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let conf: CliConf = toml::from_str("colour = \"blue\"").unwrap();
        assert!(matches!(
            conf.apply(&mut Options::new()),
            Err(CliError::Encryptor(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        match CliConf::load(Path::new("/nonexistent/eyaml-pkcs11.toml")) {
            Err(CliError::Configuration(msg)) => assert!(msg.contains("not found"), "{msg}"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(CliConf::load_optional(None).unwrap(), CliConf::default());
    }
}
