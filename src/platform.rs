//! Host platform description.
//!
//! The installer keys binaries and option filters on four strings: the
//! operating system, the CPU architecture, the C library flavor and the
//! Linux distribution. [`Platform::detect`] derives them from the build
//! target and `/etc/os-release`; tests construct a [`Platform`] explicitly.

use std::fs;
use std::path::Path;

/// The host as seen by option filters and binary lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Operating system name in `uname -s` form (`Linux`, `FreeBSD`, ...).
    pub os: String,
    /// CPU architecture (`x86`, `x86_64`, `aarch64`, ...).
    pub arch: String,
    /// C library flavor (`glibc`, `musl`, `libc`).
    pub libc: String,
    /// Distribution identifier from `/etc/os-release`, if known.
    pub distro: Option<String>,
}

impl Platform {
    /// Creates a platform description from explicit values.
    pub fn new(os: impl Into<String>, arch: impl Into<String>, libc: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
            libc: libc.into(),
            distro: None,
        }
    }

    /// Sets the distribution identifier.
    pub fn with_distro(mut self, distro: impl Into<String>) -> Self {
        self.distro = Some(distro.into());
        self
    }

    /// Describes the running host.
    pub fn detect() -> Self {
        let os = match std::env::consts::OS {
            "linux" => "Linux",
            "freebsd" => "FreeBSD",
            "openbsd" => "OpenBSD",
            "netbsd" => "NetBSD",
            "macos" => "Darwin",
            "solaris" | "illumos" => "SunOS",
            other => other,
        };
        let libc = if cfg!(target_env = "gnu") {
            "glibc"
        } else if cfg!(target_env = "musl") {
            "musl"
        } else {
            "libc"
        };
        let distro = if os == "Linux" {
            read_os_release_id(Path::new("/etc/os-release"))
        } else {
            None
        };

        Self {
            os: os.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            libc: libc.to_string(),
            distro,
        }
    }

    /// Names registered as always-true booleans for this host.
    ///
    /// These let conditions say `+(Linux,x86_64)` directly.
    pub fn boolean_names(&self) -> Vec<String> {
        let mut names = vec![self.os.clone(), self.arch.clone(), self.libc.clone()];
        if let Some(distro) = &self.distro {
            names.push(distro.clone());
        }
        names
    }

    /// Returns true if an `arch` attribute value matches this host.
    pub fn matches_arch(&self, value: Option<&str>) -> bool {
        matches_any(value, &self.arch)
    }

    /// Returns true if a `libc` attribute value matches this host.
    pub fn matches_libc(&self, value: Option<&str>) -> bool {
        matches_any(value, &self.libc)
    }

    /// Returns true if a `distro` attribute value matches this host.
    pub fn matches_distro(&self, value: Option<&str>) -> bool {
        match (value, &self.distro) {
            (None, _) => true,
            (Some(v), _) if v.trim().eq_ignore_ascii_case("any") => true,
            (Some(v), Some(d)) => list_contains(v, d),
            (Some(_), None) => false,
        }
    }
}

/// Matches a filter attribute against a host value.
///
/// An absent attribute or `any` matches everything; otherwise the attribute
/// is a whitespace- or comma-separated list of accepted values.
pub(crate) fn matches_any(value: Option<&str>, actual: &str) -> bool {
    match value {
        None => true,
        Some(v) if v.trim().eq_ignore_ascii_case("any") => true,
        Some(v) => list_contains(v, actual),
    }
}

fn list_contains(list: &str, actual: &str) -> bool {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .any(|s| s == actual)
}

fn read_os_release_id(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    parse_os_release_id(&content)
}

fn parse_os_release_id(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("ID="))
        .map(|id| id.trim().trim_matches('"').to_string())
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_release() {
        let content = "NAME=\"Debian GNU/Linux\"\nVERSION_ID=\"12\"\nID=debian\n";
        assert_eq!(parse_os_release_id(content), Some("debian".to_string()));
        assert_eq!(parse_os_release_id("ID=\"fedora\"\n"), Some("fedora".to_string()));
        assert_eq!(parse_os_release_id("ID_LIKE=debian\n"), None);
    }

    #[test]
    fn test_filters() {
        let platform = Platform::new("Linux", "x86_64", "glibc").with_distro("debian");
        assert!(platform.matches_arch(None));
        assert!(platform.matches_arch(Some("any")));
        assert!(platform.matches_arch(Some("x86 x86_64")));
        assert!(!platform.matches_arch(Some("x86")));
        assert!(platform.matches_libc(Some("glibc,musl")));
        assert!(platform.matches_distro(Some("debian")));
        assert!(!platform.matches_distro(Some("fedora")));
        assert!(!Platform::new("Linux", "x86", "glibc").matches_distro(Some("debian")));
    }

    #[test]
    fn test_detect_is_consistent() {
        let platform = Platform::detect();
        assert_eq!(platform.arch, std::env::consts::ARCH);
        assert!(platform.boolean_names().contains(&platform.os));
    }
}
