//! Safety and resource limit utilities.
//!
//! This module provides path containment for archive entries, the symlink
//! target sanitizer, and the sanity ceilings every codec checks before it
//! trusts a size declared by an archive.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Sanity ceilings for values declared by archives.
///
/// A declared value above its ceiling is reported as corruption before any
/// allocation or copy is attempted.
///
/// ```rust
/// use installkit::safety::ResourceLimits;
///
/// let limits = ResourceLimits::default().max_entry_size(1 << 20);
/// assert!(limits.check_entry_size("entry size", 2 << 20).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Largest uncompressed or compressed size accepted for one entry.
    pub max_entry_size: u64,
    /// Longest entry name accepted, in bytes.
    pub max_name_len: usize,
    /// Longest symbolic link target accepted, in bytes.
    pub max_symlink_len: usize,
    /// Most entries accepted in one archive.
    pub max_entries: u64,
    /// Largest metadata header accepted (package headers).
    pub max_header_size: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_entry_size: 4 * 1024 * 1024 * 1024,
            max_name_len: 4096,
            max_symlink_len: 4096,
            max_entries: 1_000_000,
            max_header_size: 64 * 1024 * 1024,
        }
    }
}

impl ResourceLimits {
    /// Sets the entry size ceiling.
    pub fn max_entry_size(mut self, max: u64) -> Self {
        self.max_entry_size = max;
        self
    }

    /// Sets the entry name length ceiling.
    pub fn max_name_len(mut self, max: usize) -> Self {
        self.max_name_len = max;
        self
    }

    /// Sets the symlink target length ceiling.
    pub fn max_symlink_len(mut self, max: usize) -> Self {
        self.max_symlink_len = max;
        self
    }

    /// Sets the entry count ceiling.
    pub fn max_entries(mut self, max: u64) -> Self {
        self.max_entries = max;
        self
    }

    /// Sets the metadata header ceiling.
    pub fn max_header_size(mut self, max: u64) -> Self {
        self.max_header_size = max;
        self
    }

    /// Checks a declared entry size.
    pub fn check_entry_size(&self, what: &'static str, size: u64) -> Result<()> {
        check(what, size, self.max_entry_size)
    }

    /// Checks a declared name length.
    pub fn check_name_len(&self, len: u64) -> Result<()> {
        check("name length", len, self.max_name_len as u64)
    }

    /// Checks a declared symlink target length.
    pub fn check_symlink_len(&self, len: u64) -> Result<()> {
        check("symlink target length", len, self.max_symlink_len as u64)
    }

    /// Checks an entry count.
    pub fn check_entries(&self, count: u64) -> Result<()> {
        check("entry count", count, self.max_entries)
    }

    /// Checks a metadata header size.
    pub fn check_header_size(&self, size: u64) -> Result<()> {
        check("header size", size, self.max_header_size)
    }
}

fn check(what: &'static str, size: u64, limit: u64) -> Result<()> {
    if size > limit {
        log::error!("{} {} exceeds sanity ceiling {}", what, size, limit);
        return Err(Error::SizeOutOfBounds { what, size, limit });
    }
    Ok(())
}

/// Normalizes a slash-separated path without touching the filesystem.
///
/// Empty and `.` components are collapsed and `..` removes the component
/// consumed before it. A `..` with nothing left to remove is dropped, so
/// the result never climbs above its starting point. Leading slashes are
/// dropped as well: the result is always relative.
///
/// ```rust
/// use installkit::safety::sanitize_path;
///
/// assert_eq!(sanitize_path("a/./b"), "a/b");
/// assert_eq!(sanitize_path("a/../b"), "b");
/// assert_eq!(sanitize_path("../../etc/passwd"), "etc/passwd");
/// ```
pub fn sanitize_path(path: &str) -> String {
    normalize_components(path).0.join("/")
}

/// Returns the normalized components and whether a `..` had to be clamped.
fn normalize_components(path: &str) -> (Vec<&str>, bool) {
    let mut out: Vec<&str> = Vec::new();
    let mut clamped = false;
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if out.pop().is_none() {
                    clamped = true;
                }
            }
            other => out.push(other),
        }
    }
    (out, clamped)
}

/// Rewrites a symlink target so it cannot point outside the extraction root.
///
/// The target is resolved against the directory of `entry_path` (the link's
/// own location inside the archive), normalized with [`sanitize_path`], and
/// expressed again relative to the link's directory. Absolute targets are
/// treated as relative to the extraction root.
///
/// ```rust
/// use installkit::safety::contain_symlink_target;
///
/// assert_eq!(contain_symlink_target("link", "../../etc/passwd"), "etc/passwd");
/// assert_eq!(contain_symlink_target("lib/libfoo.so", "libfoo.so.1"), "libfoo.so.1");
/// assert_eq!(contain_symlink_target("a/b/link", "../c"), "../c");
/// ```
pub fn contain_symlink_target(entry_path: &str, target: &str) -> String {
    let (entry, _) = normalize_components(entry_path);
    let parent: Vec<&str> = match entry.split_last() {
        Some((_, dirs)) => dirs.to_vec(),
        None => Vec::new(),
    };

    let joined = if target.starts_with('/') {
        target.to_string()
    } else {
        let mut s = parent.join("/");
        s.push('/');
        s.push_str(target);
        s
    };
    let (resolved, clamped) = normalize_components(&joined);
    if clamped || target.starts_with('/') {
        log::warn!(
            "Symlink '{}' -> '{}' rewritten to stay inside the destination",
            entry_path,
            target
        );
    }

    let common = parent
        .iter()
        .zip(resolved.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut relative: Vec<&str> = std::iter::repeat_n("..", parent.len() - common).collect();
    relative.extend_from_slice(&resolved[common..]);
    if relative.is_empty() {
        ".".to_string()
    } else {
        relative.join("/")
    }
}

/// Resolves an archive entry name to a path under `dest`.
///
/// Leading `/` and `./` are stripped so absolute archive paths land inside
/// the destination. Any `..` component is rejected outright, as are names
/// containing NUL bytes.
///
/// The parent components are also checked on disk: if one of them already
/// exists below `dest` as a symbolic link, the entry is rejected. A link
/// extracted earlier could otherwise redirect later entries outside the
/// destination, even though every link target is contained on its own.
pub fn resolve_entry_path(dest: &Path, entry_name: &str) -> Result<PathBuf> {
    if entry_name.contains('\0') {
        return Err(Error::PathTraversal {
            path: entry_name.replace('\0', "\\0"),
        });
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in entry_name.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                log::error!("Archive entry '{}' tries to leave the destination", entry_name);
                return Err(Error::PathTraversal {
                    path: entry_name.to_string(),
                });
            }
            other => parts.push(other),
        }
    }

    let mut full = dest.to_path_buf();
    let mut on_disk = true;
    let parents = parts.len().saturating_sub(1);
    for (index, part) in parts.iter().enumerate() {
        full.push(part);
        if on_disk && index < parents {
            match fs::symlink_metadata(&full) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    log::error!(
                        "Archive entry '{}' would be written through the symlink '{}'",
                        entry_name,
                        full.display()
                    );
                    return Err(Error::PathTraversal {
                        path: entry_name.to_string(),
                    });
                }
                Ok(_) => {}
                Err(_) => on_disk = false,
            }
        }
    }
    Ok(full)
}
