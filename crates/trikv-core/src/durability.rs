//! Durable file replacement
//!
//! Snapshots are replaced with the atomic rename pattern:
//! 1. Write the new bytes to `<target>.tmp`
//! 2. `durable_sync` the temp file
//! 3. Rename it over the target (atomic on POSIX)
//! 4. `durable_sync` the parent directory so the rename itself survives
//!
//! A crash before step 3 leaves the previous snapshot intact and an orphaned
//! temp file, which the next save truncates.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{TrikvError, TrikvResult};

/// Flush file data to persistent media using the strongest primitive the
/// platform offers.
///
/// - Linux: `fdatasync()`
/// - macOS/iOS: `fcntl(F_FULLFSYNC)`, since plain `fsync()` stops at the drive cache
/// - Windows: `FlushFileBuffers()`
/// - Other: `File::sync_data()`
///
/// May block for a long time under heavy I/O; callers must not hold locks.
pub fn durable_sync(file: &File) -> io::Result<()> {
    platform_sync(file)
}

#[cfg(target_os = "linux")]
fn platform_sync(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor comes from a live `File` borrow.
    let rc = unsafe { libc::fdatasync(file.as_raw_fd()) };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn platform_sync(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // SAFETY: the descriptor comes from a live `File` borrow.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
    if rc == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(target_os = "windows")]
fn platform_sync(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::FlushFileBuffers;
    // SAFETY: the handle comes from a live `File` borrow.
    let rc = unsafe { FlushFileBuffers(file.as_raw_handle() as *mut _) };
    if rc != 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios", target_os = "windows")))]
fn platform_sync(file: &File) -> io::Result<()> {
    file.sync_data()
}

/// Sync a directory entry table. No-op on Windows, where directories cannot
/// be opened as files.
pub fn sync_directory(dir: &Path) -> TrikvResult<()> {
    if cfg!(windows) {
        return Ok(());
    }
    let handle = File::open(dir).map_err(|e| TrikvError::io_at(dir, &e, "Failed to open directory for sync"))?;
    durable_sync(&handle).map_err(|e| TrikvError::io_at(dir, &e, "Failed to sync directory"))
}

/// Path of the temp file used while replacing `target`.
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Atomically replace `target` with `bytes`.
pub fn replace_file(target: &Path, bytes: &[u8]) -> TrikvResult<()> {
    let tmp = temp_path(target);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| TrikvError::io_at(&tmp, &e, "Failed to create temp file"))?;
        file.write_all(bytes)
            .map_err(|e| TrikvError::io_at(&tmp, &e, "Failed to write temp file"))?;
        durable_sync(&file).map_err(|e| TrikvError::io_at(&tmp, &e, "Failed to sync temp file"))?;
    }

    fs::rename(&tmp, target).map_err(|e| TrikvError::io_at(target, &e, "Failed to rename temp file"))?;

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        sync_directory(parent)?;
    }
    Ok(())
}
