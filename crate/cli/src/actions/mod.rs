use std::path::PathBuf;

use clap::Args;
use eyaml_pkcs11_encryptor::{
    DELEGATE_COMMAND, DELEGATE_QUIET, ENCRYPT_METHOD, HSM_LIBRARY, HSM_PASSWORD, HSM_SLOT_ID,
    HSM_USERTYPE, KEY_LABEL, MODE, OFFLINE_PUBLICKEY, OPENSSL_PATH, OptionValue, Options,
    PRELOAD_PATH, SOFTCARD, TOOL_TIMEOUT,
};

use crate::{
    cli_ensure,
    config::CliConf,
    error::{CliError, result::CliResult},
};

pub mod decrypt;
pub mod encrypt;

/// The PKCS#11 encryptor options.
/// Values given here win over the environment, which wins over the configuration file.
#[derive(Args, Debug, Default, Clone)]
pub struct Pkcs11Args {
    /// Encryption method, only `pkcs11` is supported
    #[clap(long = "encrypt-method", default_value = "pkcs11")]
    pub encrypt_method: String,

    /// hsm-direct, interactive-delegate, cli-delegate or local-public-key
    #[clap(long = "pkcs11-mode", env = "EYAML_PKCS11_MODE")]
    pub mode: Option<String>,

    /// Label of the key pair inside the HSM
    #[clap(long = "pkcs11-key-label", env = "EYAML_PKCS11_KEY_LABEL")]
    pub key_label: Option<String>,

    /// HSM credential
    #[clap(
        long = "pkcs11-hsm-password",
        env = "EYAML_PKCS11_HSM_PASSWORD",
        hide_env_values = true
    )]
    pub hsm_password: Option<String>,

    /// HSM user type: USER, SO or CONTEXT_SPECIFIC
    #[clap(long = "pkcs11-hsm-usertype", env = "EYAML_PKCS11_HSM_USERTYPE")]
    pub hsm_usertype: Option<String>,

    /// Path to the PKCS#11 library of the HSM
    #[clap(long = "pkcs11-hsm-library", env = "EYAML_PKCS11_HSM_LIBRARY")]
    pub hsm_library: Option<String>,

    /// Slot of the HSM holding the key, counting from 1
    #[clap(long = "pkcs11-hsm-slot-id", env = "EYAML_PKCS11_HSM_SLOT_ID")]
    pub hsm_slot_id: Option<i64>,

    /// Softcard preloaded by the interactive-delegate mode
    #[clap(long = "pkcs11-softcard", env = "EYAML_PKCS11_SOFTCARD")]
    pub softcard: Option<String>,

    /// Path to the nCipher preload utility
    #[clap(long = "pkcs11-preload-path", env = "EYAML_PKCS11_PRELOAD_PATH")]
    pub preload_path: Option<PathBuf>,

    /// Path to the openssl binary providing the chil engine
    #[clap(long = "pkcs11-openssl-path", env = "EYAML_PKCS11_OPENSSL_PATH")]
    pub openssl_path: Option<PathBuf>,

    /// Seconds to wait for the interactive tool output, 0 waits forever
    #[clap(long = "pkcs11-tool-timeout", env = "EYAML_PKCS11_TOOL_TIMEOUT")]
    pub tool_timeout: Option<i64>,

    /// Command re-invoked by the cli-delegate mode
    #[clap(long = "pkcs11-delegate-command", env = "EYAML_PKCS11_DELEGATE_COMMAND")]
    pub delegate_command: Option<String>,

    /// Pass the quiet flag to the delegated command
    #[clap(long = "pkcs11-delegate-quiet", env = "EYAML_PKCS11_DELEGATE_QUIET")]
    pub delegate_quiet: Option<bool>,

    /// PEM file holding the RSA public key of the local-public-key mode
    #[clap(long = "pkcs11-offline-publickey", env = "EYAML_PKCS11_OFFLINE_PUBLICKEY")]
    pub offline_publickey: Option<PathBuf>,
}

impl Pkcs11Args {
    /// Schema defaults, overlaid with the configuration file, then with these arguments.
    pub fn options(&self, conf: &CliConf) -> CliResult<Options> {
        cli_ensure!(
            self.encrypt_method.eq_ignore_ascii_case(ENCRYPT_METHOD),
            CliError::Configuration(format!(
                "unsupported encryption method: {}",
                self.encrypt_method
            ))
        );
        let mut options = Options::new();
        conf.apply(&mut options)?;

        let path = |p: &PathBuf| OptionValue::String(p.to_string_lossy().into_owned());
        let overrides: [(&str, Option<OptionValue>); 13] = [
            (MODE, self.mode.clone().map(OptionValue::String)),
            (KEY_LABEL, self.key_label.clone().map(OptionValue::String)),
            (HSM_PASSWORD, self.hsm_password.clone().map(OptionValue::String)),
            (HSM_USERTYPE, self.hsm_usertype.clone().map(OptionValue::String)),
            (HSM_LIBRARY, self.hsm_library.clone().map(OptionValue::String)),
            (HSM_SLOT_ID, self.hsm_slot_id.map(OptionValue::Integer)),
            (SOFTCARD, self.softcard.clone().map(OptionValue::String)),
            (PRELOAD_PATH, self.preload_path.as_ref().map(path)),
            (OPENSSL_PATH, self.openssl_path.as_ref().map(path)),
            (TOOL_TIMEOUT, self.tool_timeout.map(OptionValue::Integer)),
            (DELEGATE_COMMAND, self.delegate_command.clone().map(OptionValue::String)),
            (DELEGATE_QUIET, self.delegate_quiet.map(OptionValue::Boolean)),
            (OFFLINE_PUBLICKEY, self.offline_publickey.as_ref().map(path)),
        ];
        for (name, value) in overrides {
            if let Some(value) = value {
                options.set(name, value)?;
            }
        }
        Ok(options)
    }
}
