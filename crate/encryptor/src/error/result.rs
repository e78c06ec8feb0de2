use super::EncryptorError;

pub type EncryptorResult<R> = Result<R, EncryptorError>;

/// Attach context to errors converted into an `EncryptorError`.
pub trait EncryptorResultHelper<T> {
    fn context(self, context: &str) -> EncryptorResult<T>;
}

impl<T, E> EncryptorResultHelper<T> for Result<T, E>
where
    E: std::error::Error,
{
    fn context(self, context: &str) -> EncryptorResult<T> {
        self.map_err(|e| EncryptorError::Default(format!("{context}: {e}")))
    }
}

impl<T> EncryptorResultHelper<T> for Option<T> {
    fn context(self, context: &str) -> EncryptorResult<T> {
        self.ok_or_else(|| EncryptorError::Default(context.to_owned()))
    }
}
