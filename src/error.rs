//! Error types for archive extraction and installation.
//!
//! This module provides the [`Error`] enum which represents every failure
//! an installation run can report, along with a convenient [`Result<T>`]
//! type alias.
//!
//! # Error Categories
//!
//! | Category | Variants | Policy |
//! |----------|----------|--------|
//! | Integrity | [`CrcMismatch`][Error::CrcMismatch], [`ChecksumMismatch`][Error::ChecksumMismatch], [`CorruptHeader`][Error::CorruptHeader], [`InvalidFormat`][Error::InvalidFormat], [`SizeOutOfBounds`][Error::SizeOutOfBounds], [`Truncated`][Error::Truncated] | Fatal |
//! | Security | [`PathTraversal`][Error::PathTraversal], [`SymlinkTargetEscape`][Error::SymlinkTargetEscape] | Fatal |
//! | Resource | [`Io`][Error::Io] | Fatal |
//! | Install | [`MissingBinary`][Error::MissingBinary], [`ScriptFailed`][Error::ScriptFailed], [`PackageTool`][Error::PackageTool] | Fatal |
//! | User | [`Cancelled`][Error::Cancelled] | Fatal, no cleanup warning |
//!
//! Soft per-file problems (a missing plain file, an unknown archive entry
//! type) never surface as an `Err`: they are logged and contribute zero bytes.
//!
//! ```rust
//! use installkit::Error;
//!
//! fn describe(error: &Error) -> &'static str {
//!     if error.is_security_error() {
//!         "the archive tried to write outside the install directory"
//!     } else if error.is_corruption() {
//!         "the installation media looks damaged"
//!     } else {
//!         "installation failed"
//!     }
//! }
//! ```

use std::io;
use std::path::PathBuf;

/// The main error type for extraction and installation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The input is not a valid archive of the expected format.
    #[error("Invalid {format} archive: {reason}")]
    InvalidFormat {
        /// Format name (e.g. `"zip"`).
        format: &'static str,
        /// What was expected vs. found.
        reason: String,
    },

    /// An archive header is corrupt.
    #[error("Corrupt {format} header at offset {offset:#x}: {reason}")]
    CorruptHeader {
        /// Format name.
        format: &'static str,
        /// Byte offset where corruption was detected.
        offset: u64,
        /// Description of the corruption.
        reason: String,
    },

    /// The archive ended in the middle of an entry.
    #[error("Truncated {format} archive: {}", path.display())]
    Truncated {
        /// Format name.
        format: &'static str,
        /// The archive being read.
        path: PathBuf,
    },

    /// A size field declared by the archive exceeds a sanity ceiling.
    ///
    /// Reported before any allocation or copy is attempted.
    #[error("Declared {what} of {size} bytes exceeds limit of {limit} bytes")]
    SizeOutOfBounds {
        /// Which field was out of bounds.
        what: &'static str,
        /// The declared value.
        size: u64,
        /// The configured ceiling.
        limit: u64,
    },

    /// A feature used by the archive is not supported.
    #[error("Unsupported feature: {feature}")]
    UnsupportedFeature {
        /// The name of the unsupported feature.
        feature: &'static str,
    },

    /// The archive uses a compression method that is not supported.
    #[error("Unsupported compression method: {method}")]
    UnsupportedMethod {
        /// Method identifier as found in the archive.
        method: String,
    },

    /// An entry's CRC does not match the value recorded in the archive.
    #[error("CRC mismatch for '{entry}': expected {expected:#x}, got {actual:#x}")]
    CrcMismatch {
        /// The entry name.
        entry: String,
        /// The expected value from the archive.
        expected: u32,
        /// The value computed over the extracted data.
        actual: u32,
    },

    /// A source file's MD5 does not match the option node's `md5sum`.
    #[error("Checksum mismatch for '{}': expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        /// The file that failed verification.
        path: PathBuf,
        /// Expected hex digest.
        expected: String,
        /// Actual hex digest.
        actual: String,
    },

    /// An archive entry would be written outside the destination.
    #[error("Path traversal detected: {path}")]
    PathTraversal {
        /// The offending entry path.
        path: String,
    },

    /// A symbolic link target would resolve outside the destination.
    #[error("Symbolic link target escapes destination: {path} -> {target}")]
    SymlinkTargetEscape {
        /// The symlink entry.
        path: String,
        /// The rejected target.
        target: String,
    },

    /// The operation was cancelled through the progress reporter.
    #[error("Operation cancelled")]
    Cancelled,

    /// A binary listed by the option tree could not be found.
    ///
    /// Binaries are mandatory, unlike plain files.
    #[error("Binary '{name}' not found (searched {searched:?})")]
    MissingBinary {
        /// Binary name from the option tree.
        name: String,
        /// Candidate paths that were tried.
        searched: Vec<PathBuf>,
    },

    /// An install script exited unsuccessfully.
    #[error("Script '{name}' failed with status {status}")]
    ScriptFailed {
        /// Short description of the script.
        name: String,
        /// Exit code, or -1 if terminated by a signal.
        status: i32,
    },

    /// The platform package tool reported a failure.
    #[error("Package tool failed: {0}")]
    PackageTool(String),

    /// An archive entry is encrypted and no interactive recovery is allowed.
    #[error("Password required for '{archive}'")]
    PasswordRequired {
        /// The archive path.
        archive: String,
    },

    /// A multi-volume archive requested another volume.
    #[error("Removable volume requested: {volume}")]
    VolumeRequired {
        /// The requested volume name.
        volume: String,
    },

    /// A condition expression could not be parsed.
    #[error("Invalid condition '{expr}': {reason}")]
    Condition {
        /// The expression text.
        expr: String,
        /// What went wrong.
        reason: String,
    },

    /// A source glob pattern is malformed.
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern text.
        pattern: String,
        /// Parser message.
        reason: String,
    },
}

impl Error {
    /// Returns `true` if this error indicates damaged or hostile input data.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::InvalidFormat { .. }
                | Error::CorruptHeader { .. }
                | Error::Truncated { .. }
                | Error::SizeOutOfBounds { .. }
                | Error::CrcMismatch { .. }
                | Error::ChecksumMismatch { .. }
        )
    }

    /// Returns `true` if this error indicates an attempt to escape the
    /// destination directory.
    pub fn is_security_error(&self) -> bool {
        matches!(
            self,
            Error::PathTraversal { .. } | Error::SymlinkTargetEscape { .. }
        )
    }

    /// Returns `true` if the installation cannot continue after this error.
    ///
    /// Every variant is fatal except [`Error::UnsupportedFeature`]: a
    /// source file that needs an unsupported feature is logged and skipped,
    /// like an unknown entry type.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::UnsupportedFeature { .. })
    }

    /// Maps an I/O error from a sequential archive read, turning a short
    /// read into [`Error::Truncated`].
    ///
    /// An [`Error`] that a decoding reader smuggled through `io::Error` is
    /// unwrapped and returned as-is.
    pub(crate) fn from_archive_io(
        err: io::Error,
        format: &'static str,
        path: &std::path::Path,
    ) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(Ok(inner)) = err.into_inner().map(|b| b.downcast::<Error>()) {
                return *inner;
            }
            return Error::InvalidFormat {
                format,
                reason: "decoder failed".to_string(),
            };
        }
        if err.kind() == io::ErrorKind::UnexpectedEof {
            log::error!("{} archive '{}' ends mid-entry", format, path.display());
            Error::Truncated {
                format,
                path: path.to_path_buf(),
            }
        } else {
            Error::Io(err)
        }
    }
}

/// A specialized Result type for installation operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_classification() {
        let err = Error::CrcMismatch {
            entry: "a.txt".into(),
            expected: 1,
            actual: 2,
        };
        assert!(err.is_corruption());
        assert!(err.is_fatal());
        assert!(!err.is_security_error());

        let err = Error::SizeOutOfBounds {
            what: "entry size",
            size: 10,
            limit: 5,
        };
        assert!(err.is_corruption());
    }

    #[test]
    fn test_security_classification() {
        let err = Error::PathTraversal {
            path: "../etc/passwd".into(),
        };
        assert!(err.is_security_error());
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_truncated_mapping() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "short");
        let err = Error::from_archive_io(io_err, "tar", std::path::Path::new("x.tar"));
        assert!(matches!(err, Error::Truncated { format: "tar", .. }));

        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let err = Error::from_archive_io(io_err, "tar", std::path::Path::new("x.tar"));
        assert!(matches!(err, Error::Io(_)));

        let io_err = io::Error::other(Error::SizeOutOfBounds {
            what: "chunk size",
            size: 9,
            limit: 1,
        });
        let err = Error::from_archive_io(io_err, "uz2", std::path::Path::new("x.uz2"));
        assert!(matches!(err, Error::SizeOutOfBounds { size: 9, .. }));
    }

    #[test]
    fn test_display_messages() {
        let err = Error::SizeOutOfBounds {
            what: "chunk size",
            size: 70000,
            limit: 33096,
        };
        assert_eq!(
            err.to_string(),
            "Declared chunk size of 70000 bytes exceeds limit of 33096 bytes"
        );
        assert_eq!(Error::Cancelled.to_string(), "Operation cancelled");
    }
}
