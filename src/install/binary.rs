//! Binary lookup on the install media.
//!
//! Binaries are searched in platform-specific directories, most specific
//! first:
//!
//! ```text
//! bin/<os>/<arch>/<libc>/<name>
//! bin/<os>/<arch>/<name>
//! ```
//!
//! A `binpath` attribute replaces the search with one explicit path. When
//! the chosen file has a `<file>.check-dynamic.sh` probe next to it and the
//! probe succeeds, the sibling `<file>.dynamic` build is used instead.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::script::probe;
use crate::platform::Platform;
use crate::{Error, Result};

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Candidate paths for `name`, most specific first.
pub(crate) fn candidates(
    base: &Path,
    name: &str,
    binpath: Option<&str>,
    platform: &Platform,
) -> Vec<PathBuf> {
    if let Some(binpath) = binpath {
        return vec![base.join(binpath)];
    }
    let arch_dir = base.join("bin").join(&platform.os).join(&platform.arch);
    vec![arch_dir.join(&platform.libc).join(name), arch_dir.join(name)]
}

/// Finds the binary to install. A missing binary is fatal.
pub(crate) fn resolve(
    base: &Path,
    name: &str,
    binpath: Option<&str>,
    platform: &Platform,
    shell: &Path,
    env: &[(&str, OsString)],
) -> Result<PathBuf> {
    let searched = candidates(base, name, binpath, platform);
    let Some(found) = searched.iter().find(|p| p.is_file()) else {
        log::error!("Binary '{}' not found", name);
        return Err(Error::MissingBinary {
            name: name.to_string(),
            searched,
        });
    };

    let probe_script = with_suffix(found, ".check-dynamic.sh");
    let dynamic = with_suffix(found, ".dynamic");
    if probe_script.is_file() && dynamic.is_file() && probe(shell, &probe_script, env) {
        log::info!("Using dynamically linked build of '{}'", name);
        return Ok(dynamic);
    }
    Ok(found.clone())
}
