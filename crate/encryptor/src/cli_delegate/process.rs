use std::{
    io::Read,
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use crate::{EncryptorResult, encryptor_error};

/// What a finished process left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs a program to completion.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> EncryptorResult<ProcessOutput>;
}

/// Runs programs with a closed standard input, draining standard output and standard error
/// concurrently so that neither pipe can fill up and stall the child.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[String]) -> EncryptorResult<ProcessOutput> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| encryptor_error!("no stdout pipe for {program}"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| encryptor_error!("no stderr pipe for {program}"))?;

        let (stdout, stderr) = thread::scope(|scope| {
            let out = scope.spawn(move || {
                let mut buffer = Vec::new();
                stdout.read_to_end(&mut buffer).map(|_| buffer)
            });
            let err = scope.spawn(move || {
                let mut buffer = Vec::new();
                stderr.read_to_end(&mut buffer).map(|_| buffer)
            });
            (out.join(), err.join())
        });
        let status = child.wait()?;
        let stdout = stdout.map_err(|_| encryptor_error!("stdout reader of {program} panicked"))??;
        let stderr = stderr.map_err(|_| encryptor_error!("stderr reader of {program} panicked"))??;
        Ok(ProcessOutput {
            success: status.success(),
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

/// Blocking waits between delegation attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> EncryptorResult<ProcessOutput> {
        SystemCommandRunner.run("/bin/sh", &["-c".to_owned(), script.to_owned()])
    }

    #[test]
    fn test_captures_both_streams() -> EncryptorResult<()> {
        let output = sh("printf out; printf err >&2")?;
        assert!(output.success);
        assert_eq!(output.code, Some(0));
        assert_eq!(output.stdout, b"out");
        assert_eq!(output.stderr, b"err");
        Ok(())
    }

    #[test]
    fn test_large_outputs_do_not_deadlock() -> EncryptorResult<()> {
        let output = sh("head -c 200000 /dev/zero; head -c 200000 /dev/zero >&2; exit 3")?;
        assert!(!output.success);
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.len(), 200_000);
        assert_eq!(output.stderr.len(), 200_000);
        Ok(())
    }

    #[test]
    fn test_stdin_is_closed() -> EncryptorResult<()> {
        let output = sh("cat")?;
        assert!(output.success);
        assert!(output.stdout.is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_program_is_an_io_error() {
        let result = SystemCommandRunner.run("/nonexistent/eyaml", &[]);
        assert!(matches!(result, Err(crate::EncryptorError::Io(_))));
    }
}
