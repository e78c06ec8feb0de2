mod mode;
mod options;

pub use mode::{
    CliDelegateConfig, HsmDirectConfig, InteractiveConfig, LocalKeyConfig, Mode, ModeConfig,
};
pub use options::{
    DELEGATE_COMMAND, DELEGATE_QUIET, HSM_LIBRARY, HSM_PASSWORD, HSM_SLOT_ID, HSM_USERTYPE,
    KEY_LABEL, MODE, OFFLINE_PUBLICKEY, OPENSSL_PATH, OptionDefault, OptionSource, OptionSpec,
    OptionType, OptionValue, Options, PKCS11_OPTIONS, PRELOAD_PATH, SOFTCARD, TOOL_TIMEOUT,
    option_spec,
};
