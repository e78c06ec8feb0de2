use super::CliError;

pub type CliResult<R> = Result<R, CliError>;
