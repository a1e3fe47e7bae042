//! Helpers shared by the process-level tests

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::process::{ProcessError, Result};

/// Write a `/bin/sh` program to `<root>/run/main` and make it executable
pub fn write_program(root: &Path, body: &str) -> PathBuf {
    let path = root.join(super::console::PROGRAM_ENTRY);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Retry a spawn while the freshly written script is still reported busy
///
/// Another test thread forking while our write descriptor is open makes
/// exec fail with ETXTBSY for a short moment.
pub fn retry_busy<T>(mut spawn: impl FnMut() -> Result<T>) -> Result<T> {
    for _ in 0..50 {
        match spawn() {
            Err(ProcessError::Spawn { ref source, .. })
                if source.raw_os_error() == Some(libc::ETXTBSY) =>
            {
                thread::sleep(Duration::from_millis(20));
            }
            other => return other,
        }
    }
    spawn()
}

/// Poll `done` every few milliseconds until it holds or `limit` passes
pub fn wait_until(limit: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}
