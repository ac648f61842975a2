//! Filesystem helpers shared by the codecs and the orchestrator.
//!
//! Permissions and timestamps are applied only after an entry's payload is
//! completely written. Failures to apply metadata, or to create special
//! files, are logged and never abort an installation.

use std::fs;
use std::path::Path;

use crate::Result;

/// File-type bits of a Unix mode.
pub(crate) const S_IFMT: u32 = 0o170000;
pub(crate) const S_IFDIR: u32 = 0o040000;
pub(crate) const S_IFREG: u32 = 0o100000;
pub(crate) const S_IFLNK: u32 = 0o120000;
pub(crate) const S_IFIFO: u32 = 0o010000;
pub(crate) const S_IFCHR: u32 = 0o020000;
pub(crate) const S_IFBLK: u32 = 0o060000;

/// Sets permission bits on an installed file.
#[cfg(unix)]
pub(crate) fn apply_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777)) {
        log::warn!("Failed to set permissions on '{}': {}", path.display(), e);
    }
}

#[cfg(not(unix))]
pub(crate) fn apply_mode(_path: &Path, _mode: u32) {}

/// Sets the modification time from a Unix timestamp.
pub(crate) fn apply_mtime(path: &Path, unix_secs: u64) {
    let mtime = filetime::FileTime::from_unix_time(unix_secs as i64, 0);
    if let Err(e) = filetime::set_file_mtime(path, mtime) {
        log::warn!(
            "Failed to set modification time on '{}': {}",
            path.display(),
            e
        );
    }
}

/// Converts an MS-DOS date/time pair (ZIP headers) into a Unix timestamp.
///
/// Returns `None` for dates that cannot be represented.
pub(crate) fn dos_to_unix(date: u16, time: u16) -> Option<u64> {
    let year = 1980 + i64::from(date >> 9);
    let month = i64::from((date >> 5) & 0x0f);
    let day = i64::from(date & 0x1f);
    if !(1..=12).contains(&month) || day == 0 {
        return None;
    }
    let hour = i64::from(time >> 11);
    let minute = i64::from((time >> 5) & 0x3f);
    let second = i64::from(time & 0x1f) * 2;

    // Days from the civil calendar date, proleptic Gregorian.
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;

    let secs = days * 86_400 + hour * 3_600 + minute * 60 + second;
    u64::try_from(secs).ok()
}

/// Creates a directory and its parents, then applies `mode` if given.
pub(crate) fn create_dir(path: &Path, mode: Option<u32>) -> Result<()> {
    fs::create_dir_all(path)?;
    if let Some(mode) = mode {
        apply_mode(path, mode);
    }
    Ok(())
}

/// Creates a symbolic link, replacing whatever non-directory entry is
/// already at `link_path`.
#[cfg(unix)]
pub(crate) fn create_symlink(link_path: &Path, target: &str) -> Result<()> {
    if let Some(parent) = link_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if let Ok(meta) = fs::symlink_metadata(link_path) {
        if !meta.is_dir() {
            fs::remove_file(link_path)?;
        }
    }
    std::os::unix::fs::symlink(target, link_path)?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn create_symlink(_link_path: &Path, _target: &str) -> Result<()> {
    Err(crate::Error::UnsupportedFeature {
        feature: "symbolic links on this platform",
    })
}

/// Combines a major/minor pair into a device number.
#[cfg(target_os = "linux")]
pub(crate) fn device_number(major: u32, minor: u32) -> u64 {
    libc::makedev(major, minor)
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn device_number(major: u32, minor: u32) -> u64 {
    (u64::from(major & 0xff) << 24) | u64::from(minor & 0x00ff_ffff)
}

/// Creates a FIFO or device node. `mode` carries the file-type bits.
///
/// Creating device nodes normally needs privileges, so a failure is only
/// logged.
#[cfg(unix)]
pub(crate) fn make_special(path: &Path, mode: u32, rdev: u64) {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            log::warn!("Failed to create '{}': {}", parent.display(), e);
            return;
        }
    }
    let _ = fs::remove_file(path);

    let c_path = match CString::new(path.as_os_str().as_bytes()) {
        Ok(p) => p,
        Err(_) => {
            log::warn!("Cannot create special file with NUL in name: {}", path.display());
            return;
        }
    };

    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe {
        if mode & S_IFMT == S_IFIFO {
            libc::mkfifo(c_path.as_ptr(), (mode & 0o7777) as libc::mode_t)
        } else {
            libc::mknod(c_path.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t)
        }
    };
    if rc != 0 {
        log::warn!(
            "Failed to create special file '{}': {}",
            path.display(),
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
pub(crate) fn make_special(path: &Path, _mode: u32, _rdev: u64) {
    log::warn!("Special files are not supported here: {}", path.display());
}

/// Returns true if the current process may write to `path`.
#[cfg(unix)]
pub(crate) fn is_writable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: c_path is a valid NUL-terminated string.
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(not(unix))]
pub(crate) fn is_writable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}
