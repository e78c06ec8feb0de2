//! Processes attached to a pseudo-terminal.

use std::{
    collections::VecDeque,
    fs::File,
    io::{self, ErrorKind, Read, Write},
    mem::MaybeUninit,
    os::{
        fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
        unix::process::CommandExt,
    },
    process::{Child, Command, Stdio},
    ptr,
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread,
    time::Duration,
};

use tracing::{debug, trace, warn};

use crate::EncryptorResult;

/// A running process whose terminal is readable and writable through this value.
///
/// Reads return `ErrorKind::TimedOut` when no output arrived within the timeout.
pub trait TerminalProcess: Read + Write + Send {
    /// Kill the process if it is still running and reap it.
    fn terminate(&mut self) -> EncryptorResult<()>;
}

/// Starts shell command lines on a terminal.
pub trait TerminalSpawner: Send + Sync {
    fn spawn(
        &self,
        command_line: &str,
        timeout: Option<Duration>,
    ) -> EncryptorResult<Box<dyn TerminalProcess>>;
}

/// Runs command lines with `/bin/sh -c` in a new session controlled by a fresh pty.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtySpawner;

impl TerminalSpawner for PtySpawner {
    fn spawn(
        &self,
        command_line: &str,
        timeout: Option<Duration>,
    ) -> EncryptorResult<Box<dyn TerminalProcess>> {
        let (master, slave) = open_pty()?;
        let child = {
            let mut command = Command::new("/bin/sh");
            command
                .arg("-c")
                .arg(command_line)
                .stdin(Stdio::from(slave.try_clone()?))
                .stdout(Stdio::from(slave.try_clone()?))
                .stderr(Stdio::from(slave));
            #[allow(unsafe_code)]
            unsafe {
                command.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    if libc::ioctl(0, libc::TIOCSCTTY, 0) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
            command.spawn()?
            // the parent copies of the slave end are closed with `command`
        };
        debug!("spawned the interactive tool as pid {}", child.id());

        let reader = File::from(master.try_clone()?);
        let (sender, chunks) = mpsc::channel();
        thread::Builder::new()
            .name("pty-reader".to_owned())
            .spawn(move || pump(reader, &sender))?;

        Ok(Box::new(PtyProcess {
            child,
            writer: File::from(master),
            chunks,
            pending: VecDeque::new(),
            timeout,
            terminated: false,
        }))
    }
}

fn open_pty() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut master: RawFd = -1;
    let mut slave: RawFd = -1;
    #[allow(unsafe_code)]
    let rc = unsafe {
        libc::openpty(
            &raw mut master,
            &raw mut slave,
            ptr::null_mut(),
            ptr::null(),
            ptr::null(),
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    #[allow(unsafe_code)]
    let (master, slave) = unsafe { (OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave)) };
    disable_output_processing(&slave)?;
    Ok((master, slave))
}

/// Keep the terminal from turning `\n` into `\r\n` in the tool output.
fn disable_output_processing(fd: &OwnedFd) -> io::Result<()> {
    let mut termios = MaybeUninit::<libc::termios>::uninit();
    #[allow(unsafe_code)]
    let mut termios = unsafe {
        if libc::tcgetattr(fd.as_raw_fd(), termios.as_mut_ptr()) != 0 {
            return Err(io::Error::last_os_error());
        }
        termios.assume_init()
    };
    termios.c_oflag &= !libc::ONLCR;
    #[allow(unsafe_code)]
    if unsafe { libc::tcsetattr(fd.as_raw_fd(), libc::TCSANOW, &raw const termios) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Forward the pty output to the channel until the terminal is closed.
fn pump(mut reader: File, sender: &mpsc::Sender<Vec<u8>>) {
    let mut buffer = [0_u8; 4096];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if sender.send(buffer[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                // EIO once the last slave descriptor is closed
                trace!("pty closed: {e}");
                break;
            }
        }
    }
}

struct PtyProcess {
    child: Child,
    writer: File,
    chunks: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    timeout: Option<Duration>,
    terminated: bool,
}

impl Read for PtyProcess {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let chunk = match self.timeout {
                Some(timeout) => match self.chunks.recv_timeout(timeout) {
                    Ok(chunk) => chunk,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(io::Error::new(
                            ErrorKind::TimedOut,
                            format!("no output from the tool within {}s", timeout.as_secs()),
                        ));
                    }
                    Err(RecvTimeoutError::Disconnected) => return Ok(0),
                },
                None => match self.chunks.recv() {
                    Ok(chunk) => chunk,
                    Err(_) => return Ok(0),
                },
            };
            self.pending.extend(chunk);
        }
        self.pending.read(buf)
    }
}

impl Write for PtyProcess {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl TerminalProcess for PtyProcess {
    fn terminate(&mut self) -> EncryptorResult<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;
        if let Some(status) = self.child.try_wait()? {
            debug!("interactive tool exited with {status}");
            return Ok(());
        }
        // the shell leads its own process group, the pipeline members included
        if let Ok(pgid) = libc::pid_t::try_from(self.child.id()) {
            #[allow(unsafe_code)]
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
        if let Err(e) = self.child.kill() {
            trace!("kill: {e}");
        }
        let status = self.child.wait()?;
        debug!("interactive tool killed: {status}");
        Ok(())
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            warn!("failed to terminate the interactive tool: {e}");
        }
    }
}
