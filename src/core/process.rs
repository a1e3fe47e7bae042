//! Child process control
//!
//! Spawns the program with three plain byte pipes (no pseudo terminal),
//! tracks its lifecycle and delivers signals. The lifecycle state is owned
//! here; everything else only reads it.

use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Could not start {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to send {signal:?} to process {pid}: {source}")]
    Signal {
        pid: u32,
        signal: Signal,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write to process stdin: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to configure output pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error("Failed to start output relay: {0}")]
    RelayStart(#[source] io::Error),

    #[error("No process is running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// Signals the console knows how to deliver
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT, used for Ctrl+C and bulk kill
    Interrupt,
    /// SIGTERM, graceful stop
    Terminate,
    /// SIGKILL, last resort when a child ignores SIGTERM
    Kill,
}

impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Deliver `signal` to `pid`
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // Safety: kill(2) takes plain integers and touches no memory of ours
    let rc = unsafe { libc::kill(pid, signal.as_raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Lifecycle of the console's child
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcessState {
    /// Nothing spawned yet
    #[default]
    Idle,
    Running,
    /// Graceful stop requested, not yet reaped
    Exiting,
    Dead,
}

impl ProcessState {
    pub fn is_alive(self) -> bool {
        matches!(self, ProcessState::Running | ProcessState::Exiting)
    }
}

/// Read ends of the child's output pipes, switched to non-blocking mode
///
/// A read that would block returns `ErrorKind::WouldBlock`; `Ok(0)` is EOF.
pub struct OutputPipes {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

impl OutputPipes {
    fn new(stdout: ChildStdout, stderr: ChildStderr) -> io::Result<Self> {
        set_nonblocking(stdout.as_raw_fd())?;
        set_nonblocking(stderr.as_raw_fd())?;
        Ok(Self { stdout, stderr })
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // Safety: fcntl on a descriptor we own, no pointers involved
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

struct ChildProcess {
    child: Child,
    stdin: ChildStdin,
    pid: u32,
}

/// Owns the single child process of a console
pub struct ProcessController {
    process: Option<ChildProcess>,
    state: ProcessState,
    /// How long a replaced or stopped child gets to honor SIGTERM
    grace: Duration,
}

impl ProcessController {
    pub fn new(grace: Duration) -> Self {
        Self {
            process: None,
            state: ProcessState::Idle,
            grace,
        }
    }

    pub fn set_grace(&mut self, grace: Duration) {
        self.grace = grace;
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.pid)
    }

    /// Launch the executable at `path`
    ///
    /// A previous child is stopped and reaped first, so at most one process
    /// is ever attached. This blocks for up to the grace period when the
    /// previous child ignores SIGTERM.
    pub fn spawn(&mut self, path: &Path) -> Result<OutputPipes> {
        self.stop();

        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;
        let pid = child.id();

        let pipes = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => {
                OutputPipes::new(stdout, stderr).map(|pipes| (stdin, pipes))
            }
            _ => Err(io::Error::new(io::ErrorKind::Other, "child pipes were not created")),
        };
        let (stdin, pipes) = match pipes {
            Ok(parts) => parts,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessError::Pipe(e));
            }
        };

        info!("Spawned {} (pid {})", path.display(), pid);
        self.process = Some(ChildProcess { child, stdin, pid });
        self.state = ProcessState::Running;
        Ok(pipes)
    }

    /// Non-blocking liveness check
    pub fn poll(&mut self) -> bool {
        if !self.state.is_alive() {
            return false;
        }
        let Some(process) = self.process.as_mut() else {
            return false;
        };

        match process.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                info!("Process {} exited ({})", process.pid, status);
                self.state = ProcessState::Dead;
                false
            }
            Err(e) => {
                warn!("Failed to query process {}: {}", process.pid, e);
                self.state = ProcessState::Dead;
                false
            }
        }
    }

    /// Ask the child to stop (SIGTERM)
    pub fn terminate(&mut self) -> Result<()> {
        let pid = self.live_pid()?;
        Self::signal(pid, Signal::Terminate)?;
        self.state = ProcessState::Exiting;
        Ok(())
    }

    /// Interrupt the child (SIGINT)
    pub fn interrupt(&mut self) -> Result<()> {
        let pid = self.live_pid()?;
        Self::signal(pid, Signal::Interrupt)
    }

    /// Write bytes to the child's stdin and flush immediately
    pub fn write_input(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.state.is_alive() {
            return Err(ProcessError::NotRunning);
        }
        let process = self.process.as_mut().ok_or(ProcessError::NotRunning)?;
        process
            .stdin
            .write_all(bytes)
            .and_then(|()| process.stdin.flush())
            .map_err(ProcessError::Write)
    }

    /// Treat the child as dead after its output could not be read
    pub fn mark_dead(&mut self, reason: &str) {
        if !self.state.is_alive() {
            return;
        }
        if let Some(process) = self.process.as_mut() {
            warn!("Process {} considered dead: {}", process.pid, reason);
            if let Err(e) = send_signal(process.pid, Signal::Kill) {
                debug!("SIGKILL to {} failed: {}", process.pid, e);
            }
        }
        self.state = ProcessState::Dead;
    }

    /// Stop and reap the current child, if any
    ///
    /// SIGTERM first, SIGKILL once the grace period runs out.
    pub fn stop(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };

        if self.state.is_alive() {
            if let Err(e) = send_signal(process.pid, Signal::Terminate) {
                debug!("SIGTERM to {} failed: {}", process.pid, e);
            }
            if !wait_with_deadline(&mut process.child, self.grace) {
                warn!(
                    "Process {} ignored SIGTERM for {:?}, killing",
                    process.pid, self.grace
                );
                if let Err(e) = send_signal(process.pid, Signal::Kill) {
                    debug!("SIGKILL to {} failed: {}", process.pid, e);
                }
            }
        }

        if let Err(e) = process.child.wait() {
            debug!("Reaping {} failed: {}", process.pid, e);
        }
        self.state = ProcessState::Idle;
    }

    fn live_pid(&self) -> Result<u32> {
        match &self.process {
            Some(process) if self.state.is_alive() => Ok(process.pid),
            _ => Err(ProcessError::NotRunning),
        }
    }

    fn signal(pid: u32, signal: Signal) -> Result<()> {
        debug!("Sending {:?} to {}", signal, pid);
        send_signal(pid, signal).map_err(|source| ProcessError::Signal {
            pid,
            signal,
            source,
        })
    }
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll `child` until it exits or `limit` passes; true if it exited
fn wait_with_deadline(child: &mut Child, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
            Ok(None) | Err(_) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{retry_busy, wait_until, write_program};

    fn controller() -> ProcessController {
        ProcessController::new(Duration::from_millis(500))
    }

    fn pid_exists(pid: u32) -> bool {
        // Signal 0 only checks for existence
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[test]
    fn test_spawn_missing_path() {
        let mut ctl = controller();
        let err = ctl.spawn(Path::new("/nonexistent/run/main")).err().unwrap();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/run/main"));
        assert_eq!(ctl.state(), ProcessState::Idle);
        assert!(!ctl.poll());
    }

    #[test]
    fn test_spawn_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, "not a program").unwrap();

        let mut ctl = controller();
        assert!(matches!(ctl.spawn(&path), Err(ProcessError::Spawn { .. })));
    }

    #[test]
    fn test_poll_transitions_on_exit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(dir.path(), "exit 0");

        let mut ctl = controller();
        retry_busy(|| ctl.spawn(&path)).unwrap();
        assert_eq!(ctl.state(), ProcessState::Running);

        assert!(wait_until(Duration::from_secs(5), || !ctl.poll()));
        assert_eq!(ctl.state(), ProcessState::Dead);
        assert!(matches!(ctl.interrupt(), Err(ProcessError::NotRunning)));
        assert!(matches!(ctl.write_input(b"x"), Err(ProcessError::NotRunning)));
    }

    #[test]
    fn test_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(dir.path(), "exec sleep 10");

        let mut ctl = controller();
        retry_busy(|| ctl.spawn(&path)).unwrap();
        ctl.terminate().unwrap();
        assert_eq!(ctl.state(), ProcessState::Exiting);
        assert!(ctl.state().is_alive());

        assert!(wait_until(Duration::from_secs(5), || !ctl.poll()));
        assert_eq!(ctl.state(), ProcessState::Dead);
    }

    #[test]
    fn test_interrupt_stops_sleeper() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(dir.path(), "exec sleep 10");

        let mut ctl = controller();
        retry_busy(|| ctl.spawn(&path)).unwrap();
        ctl.interrupt().unwrap();
        assert_eq!(ctl.state(), ProcessState::Running);
        assert!(wait_until(Duration::from_secs(5), || !ctl.poll()));
    }

    #[test]
    fn test_respawn_reaps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(dir.path(), "exec sleep 10");

        let mut ctl = controller();
        retry_busy(|| ctl.spawn(&path)).unwrap();
        let first = ctl.pid().unwrap();

        retry_busy(|| ctl.spawn(&path)).unwrap();
        let second = ctl.pid().unwrap();

        assert_ne!(first, second);
        assert!(!pid_exists(first));
        assert!(ctl.poll());
    }

    #[test]
    fn test_mark_dead_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(dir.path(), "exec sleep 10");

        let mut ctl = controller();
        retry_busy(|| ctl.spawn(&path)).unwrap();
        let pid = ctl.pid().unwrap();

        ctl.mark_dead("stdout read failed");
        assert_eq!(ctl.state(), ProcessState::Dead);
        assert!(!ctl.poll());

        // Reaping returns at once because SIGKILL already went out
        let started = Instant::now();
        ctl.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!pid_exists(pid));
    }

    #[test]
    fn test_respawn_blocks_at_most_grace() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(dir.path(), "trap '' TERM\nwhile :; do sleep 0.05; done");

        let mut ctl = ProcessController::new(Duration::from_millis(200));
        retry_busy(|| ctl.spawn(&path)).unwrap();
        let first = ctl.pid().unwrap();
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        retry_busy(|| ctl.spawn(&path)).unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(2));
        assert!(!pid_exists(first));
        assert_eq!(ctl.state(), ProcessState::Running);
    }

    #[test]
    fn test_stop_kills_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(dir.path(), "trap '' TERM\nwhile :; do sleep 0.05; done");

        let mut ctl = ProcessController::new(Duration::from_millis(200));
        retry_busy(|| ctl.spawn(&path)).unwrap();
        let pid = ctl.pid().unwrap();
        // Let the shell install its trap
        thread::sleep(Duration::from_millis(100));

        ctl.stop();
        assert_eq!(ctl.state(), ProcessState::Idle);
        assert!(!pid_exists(pid));
    }
}
