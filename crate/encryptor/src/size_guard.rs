use crate::{EncryptorError, EncryptorResult, encryptor_ensure};

/// Largest plaintext, in bytes, accepted by the encrypt path.
///
/// RSA PKCS#1 v1.5 over a 2048-bit modulus leaves 245 bytes; the interactive tool scraping is
/// not reliable on larger payloads either.
pub const MAX_PLAINTEXT_SIZE: usize = 244;

/// Fail with `PayloadTooLarge` when `plaintext` exceeds [`MAX_PLAINTEXT_SIZE`].
pub fn check(plaintext: &[u8]) -> EncryptorResult<()> {
    encryptor_ensure!(
        plaintext.len() <= MAX_PLAINTEXT_SIZE,
        EncryptorError::PayloadTooLarge {
            size: plaintext.len(),
            max: MAX_PLAINTEXT_SIZE,
        }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling() {
        assert!(check(b"").is_ok());
        assert!(check(&[b'a'; MAX_PLAINTEXT_SIZE]).is_ok());
        match check(&[b'a'; MAX_PLAINTEXT_SIZE + 1]) {
            Err(EncryptorError::PayloadTooLarge { size, max }) => {
                assert_eq!(size, 245);
                assert_eq!(max, 244);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
