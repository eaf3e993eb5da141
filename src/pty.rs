/// Spawn a child attached to a pseudo-terminal and stream its output.
///
/// The child runs in its own session with the PTY slave as controlling
/// terminal and as stdin, stdout and stderr. The master end is drained by a
/// dedicated reader thread that forwards chunks over a channel, so the caller
/// can wait on output with an async deadline.
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::libc;
use nix::pty::{openpty, OpenptyResult};
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Size of a single read from the PTY master.
const READ_BUFFER_SIZE: usize = 4096;

/// Chunks buffered between the reader thread and the runner.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Errors that can occur while setting up the PTY session.
#[derive(Debug)]
pub enum PtyError {
    /// Failed to allocate the PTY pair.
    Allocate { source: nix::Error },
    /// Failed to mark a PTY descriptor close-on-exec.
    Cloexec { source: nix::Error },
    /// Failed to duplicate the slave descriptor for stdio.
    Slave { source: io::Error },
    /// Failed to spawn the executable.
    Spawn { path: PathBuf, source: io::Error },
    /// Failed to start the reader thread.
    Reader { source: io::Error },
}

impl std::fmt::Display for PtyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PtyError::Allocate { source } => write!(f, "failed to allocate PTY: {}", source),
            PtyError::Cloexec { source } => {
                write!(f, "failed to set close-on-exec on PTY: {}", source)
            }
            PtyError::Slave { source } => {
                write!(f, "failed to duplicate PTY slave: {}", source)
            }
            PtyError::Spawn { path, source } => {
                write!(f, "failed to spawn {}: {}", path.display(), source)
            }
            PtyError::Reader { source } => {
                write!(f, "failed to start PTY reader thread: {}", source)
            }
        }
    }
}

impl std::error::Error for PtyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PtyError::Allocate { source } => Some(source),
            PtyError::Cloexec { source } => Some(source),
            PtyError::Slave { source } => Some(source),
            PtyError::Spawn { source, .. } => Some(source),
            PtyError::Reader { source } => Some(source),
        }
    }
}

/// A running child and the receiving end of its combined output.
pub struct PtySession {
    /// Held so the handle outlives the wait; the child is never killed.
    #[allow(dead_code)]
    child: Child,
    pid: u32,
    output: mpsc::Receiver<Vec<u8>>,
}

impl PtySession {
    /// Spawn `program` with `cwd` as its working directory.
    pub fn spawn(program: &Path, cwd: &Path) -> Result<Self, PtyError> {
        let OpenptyResult { master, slave } =
            openpty(None, None).map_err(|e| PtyError::Allocate { source: e })?;
        // openpty leaves both ends inheritable. Any other child forked while
        // they are open would keep the slave alive and hide the hangup.
        set_cloexec(&master)?;
        set_cloexec(&slave)?;

        let stdin = slave
            .try_clone()
            .map_err(|e| PtyError::Slave { source: e })?;
        let stdout = slave
            .try_clone()
            .map_err(|e| PtyError::Slave { source: e })?;

        tracing::info!(
            program = %program.display(),
            cwd = %cwd.display(),
            "spawning under PTY"
        );

        let mut command = Command::new(program);
        command
            .current_dir(cwd)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(slave);

        // SAFETY: only async-signal-safe calls (setsid, ioctl) run between
        // fork and exec.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid()?;
                if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = command.spawn().map_err(|e| PtyError::Spawn {
            path: program.to_path_buf(),
            source: e,
        })?;
        // Close the parent's copies of the slave so the master reports EOF
        // once the child side hangs up.
        drop(command);

        let pid = child.id().unwrap_or(0);
        tracing::info!(pid, "child started");

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let reader = File::from(master);
        std::thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || read_loop(reader, tx))
            .map_err(|e| PtyError::Reader { source: e })?;

        Ok(Self {
            child,
            pid,
            output: rx,
        })
    }

    /// Child PID, 0 if it had already been reaped.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Next chunk of output, or `None` once the PTY has hung up.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.output.recv().await
    }
}

fn set_cloexec(fd: &OwnedFd) -> Result<(), PtyError> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map(drop)
        .map_err(|e| PtyError::Cloexec { source: e })
}

/// Blocking read loop over the PTY master.
///
/// Linux reports a hung-up PTY as `EIO` rather than a zero-length read; both
/// end the stream.
fn read_loop(mut master: File, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match master.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
            Err(e) => {
                tracing::warn!(error = %e, "PTY read failed");
                break;
            }
        }
    }
    tracing::debug!("PTY output closed");
}
