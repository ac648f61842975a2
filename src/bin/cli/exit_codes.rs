//! Exit codes for the CLI tool.

use installkit::Error;

/// Exit code constants
pub const SUCCESS: i32 = 0;
/// Operation completed with warnings, or a condition evaluated to false
pub const WARNING: i32 = 1;
/// Fatal error occurred
pub const FATAL_ERROR: i32 = 2;
/// Archive format error
pub const BAD_ARCHIVE: i32 = 3;
/// Password or volume needed
pub const NEEDS_INPUT: i32 = 4;
/// I/O error
pub const IO_ERROR: i32 = 5;
/// Install script or package tool failed
pub const SCRIPT_ERROR: i32 = 6;
/// Ctrl+C (128 + SIGINT)
pub const USER_INTERRUPT: i32 = 130;
/// Invalid command line arguments
pub const BAD_ARGS: i32 = 255;

/// Exit code enum for structured handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Warning,
    FatalError,
    BadArchive,
    NeedsInput,
    IoError,
    ScriptError,
    UserInterrupt,
    BadArgs,
}

impl ExitCode {
    /// Returns the numeric exit code
    pub fn code(self) -> i32 {
        match self {
            Self::Success => SUCCESS,
            Self::Warning => WARNING,
            Self::FatalError => FATAL_ERROR,
            Self::BadArchive => BAD_ARCHIVE,
            Self::NeedsInput => NEEDS_INPUT,
            Self::IoError => IO_ERROR,
            Self::ScriptError => SCRIPT_ERROR,
            Self::UserInterrupt => USER_INTERRUPT,
            Self::BadArgs => BAD_ARGS,
        }
    }
}

/// Converts an installkit error to an exit code
pub fn error_to_exit_code(error: &Error) -> ExitCode {
    match error {
        Error::Io(_) => ExitCode::IoError,
        e if e.is_corruption() => ExitCode::BadArchive,
        Error::UnsupportedMethod { .. } | Error::UnsupportedFeature { .. } => ExitCode::BadArchive,
        Error::PathTraversal { .. } | Error::SymlinkTargetEscape { .. } => ExitCode::FatalError,
        Error::PasswordRequired { .. } | Error::VolumeRequired { .. } => ExitCode::NeedsInput,
        Error::ScriptFailed { .. } | Error::PackageTool(_) => ExitCode::ScriptError,
        Error::Condition { .. } | Error::InvalidPattern { .. } => ExitCode::BadArgs,
        Error::Cancelled => ExitCode::UserInterrupt,
        // Future error variants - required by #[non_exhaustive]
        _ => ExitCode::FatalError,
    }
}
