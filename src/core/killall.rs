//! Bulk kill of running programs
//!
//! Finds every process whose command line contains an identifier (by default
//! `run/main`) and signals it. This lives outside the console: a console
//! notices the death of its own child through the next `poll`.

use std::fs;
use std::io;

use tracing::{info, warn};

use super::process::{send_signal, Signal};

/// Identifier shared by every program launched through a console
pub const DEFAULT_IDENTIFIER: &str = "run/main";

/// Reject identifiers that would match every process
fn check_identifier(identifier: &str) -> io::Result<()> {
    if identifier.trim().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "kill identifier must not be empty",
        ));
    }
    Ok(())
}

/// Pids of processes whose command line contains `identifier`
///
/// The calling process and processes without a command line (kernel
/// threads, zombies) are never included.
#[cfg(target_os = "linux")]
pub fn find_matching(identifier: &str) -> io::Result<Vec<u32>> {
    check_identifier(identifier)?;
    let own_pid = std::process::id();
    let mut pids = Vec::new();

    for entry in fs::read_dir("/proc")? {
        let entry = entry?;
        let Some(pid) = entry.file_name().to_str().and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == own_pid {
            continue;
        }

        // Processes may vanish between listing and reading
        let Ok(raw) = fs::read(entry.path().join("cmdline")) else {
            continue;
        };
        if raw.is_empty() {
            continue;
        }
        let command_line = String::from_utf8_lossy(&raw).replace('\0', " ");
        if command_line.contains(identifier) {
            pids.push(pid);
        }
    }

    pids.sort_unstable();
    Ok(pids)
}

#[cfg(not(target_os = "linux"))]
pub fn find_matching(identifier: &str) -> io::Result<Vec<u32>> {
    check_identifier(identifier)?;
    Ok(Vec::new())
}

/// Send `signal` to every process matching `identifier`
///
/// Returns how many processes were signalled. Processes that exit before
/// the signal lands are skipped.
pub fn kill_matching(identifier: &str, signal: Signal) -> io::Result<usize> {
    let mut signalled = 0;
    for pid in find_matching(identifier)? {
        match send_signal(pid, signal) {
            Ok(()) => {
                info!("Sent {:?} to {} (matched {:?})", signal, pid, identifier);
                signalled += 1;
            }
            Err(e) => warn!("Failed to signal {}: {}", pid, e),
        }
    }
    Ok(signalled)
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::core::process::ProcessController;
    use crate::core::test_support::{retry_busy, wait_until, write_program};
    use std::time::Duration;

    #[test]
    fn test_kill_matching_is_seen_by_poll() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_program(dir.path(), "while :; do sleep 0.05; done");
        // The temp dir name makes the identifier unique to this test
        let identifier = path.to_string_lossy().into_owned();

        let mut ctl = ProcessController::new(Duration::from_millis(500));
        let _pipes = retry_busy(|| ctl.spawn(&path)).unwrap();
        let pid = ctl.pid().unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            find_matching(&identifier).unwrap().contains(&pid)
        }));

        assert!(kill_matching(&identifier, Signal::Interrupt).unwrap() >= 1);
        assert!(wait_until(Duration::from_secs(5), || !ctl.poll()));
    }

    #[test]
    fn test_no_match() {
        let identifier = "no-such-program-7f3a9c/run/main";
        assert!(find_matching(identifier).unwrap().is_empty());
        assert_eq!(kill_matching(identifier, Signal::Interrupt).unwrap(), 0);
    }

    #[test]
    fn test_empty_identifier_is_rejected() {
        for identifier in ["", "   ", "\t\n"] {
            let err = find_matching(identifier).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
            let err = kill_matching(identifier, Signal::Interrupt).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn test_never_matches_self() {
        // The test binary's own command line contains its name
        let own = std::process::id();
        let exe = std::env::current_exe().unwrap();
        let name = exe.file_name().unwrap().to_string_lossy().into_owned();
        let pids = find_matching(&name).unwrap();
        assert!(!pids.contains(&own));
    }
}
