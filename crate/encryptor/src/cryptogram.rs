//! The `ENC[PKCS11,<base64>]` textual form of a ciphertext.

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::{EncryptorError, EncryptorResult};

pub const ENCRYPT_METHOD: &str = "PKCS11";

/// Wrap raw ciphertext bytes as `ENC[PKCS11,<base64>]`.
#[must_use]
pub fn wrap(ciphertext: &[u8]) -> String {
    format!("ENC[{ENCRYPT_METHOD},{}]", STANDARD.encode(ciphertext))
}

/// Extract the raw ciphertext from a wrapped cryptogram.
///
/// Surrounding whitespace and line breaks inside the base64 block are ignored.
pub fn unwrap(wrapped: &str) -> EncryptorResult<Vec<u8>> {
    let trimmed = wrapped.trim();
    let inner = trimmed
        .strip_prefix("ENC[")
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| {
            EncryptorError::InvalidConfiguration(format!("not a wrapped cryptogram: {trimmed:?}"))
        })?;
    let (method, payload) = inner.split_once(',').ok_or_else(|| {
        EncryptorError::InvalidConfiguration(format!(
            "wrapped cryptogram without encryption method: {trimmed:?}"
        ))
    })?;
    if method.trim() != ENCRYPT_METHOD {
        return Err(EncryptorError::InvalidConfiguration(format!(
            "unsupported encryption method: {method}"
        )));
    }
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(STANDARD.decode(payload)?)
}

/// Find the first wrapped cryptogram in a block of text, such as the output of a command.
#[must_use]
pub fn find(text: &str) -> Option<&str> {
    let prefix = format!("ENC[{ENCRYPT_METHOD},");
    let start = text.find(&prefix)?;
    let end = text.get(start..)?.find(']')?;
    text.get(start..=start + end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap() {
        assert_eq!(wrap(b"\x00\x01\x02"), "ENC[PKCS11,AAEC]");
    }

    #[test]
    fn test_unwrap_tolerates_whitespace() -> EncryptorResult<()> {
        assert_eq!(unwrap("  ENC[PKCS11,AA\nEC]\n")?, vec![0, 1, 2]);
        assert_eq!(unwrap("ENC[PKCS11,AA\r\n  EC]")?, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_unwrap_rejections() {
        assert!(matches!(
            unwrap("ENC[GPG,AAEC]"),
            Err(EncryptorError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            unwrap("AAEC"),
            Err(EncryptorError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            unwrap("ENC[PKCS11]"),
            Err(EncryptorError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            unwrap("ENC[PKCS11,***]"),
            Err(EncryptorError::Base64(_))
        ));
    }

    #[test]
    fn test_find() {
        let output = "[hiera-eyaml-core] Loaded config\nENC[PKCS11,AAEC]\n";
        assert_eq!(find(output), Some("ENC[PKCS11,AAEC]"));
        assert_eq!(find("nothing here"), None);
        assert_eq!(find("ENC[PKCS11,unterminated"), None);
    }
}
