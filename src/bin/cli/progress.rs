//! Progress bar implementation for CLI operations.

use indicatif::{ProgressBar, ProgressStyle};
use installkit::progress::{ProgressReporter, ProgressUpdate};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Byte-level progress bar fed by the installer.
///
/// Per-file reports are folded into one running total: when the reported
/// path changes, the previous file's final count is added to `done`.
pub struct CliProgress {
    bar: ProgressBar,
    done: u64,
    current: Option<(PathBuf, u64)>,
    warnings: usize,
    interrupted: Arc<AtomicBool>,
}

impl CliProgress {
    /// Creates a new progress display
    pub fn new(quiet: bool, interrupted: Arc<AtomicBool>) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {wide_msg}")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        };

        Self {
            bar,
            done: 0,
            current: None,
            warnings: 0,
            interrupted,
        }
    }

    /// Number of warnings seen
    pub fn warnings(&self) -> usize {
        self.warnings
    }

    /// Finishes with a custom message
    pub fn finish_with_message(&self, msg: impl Into<String>) {
        self.bar.finish_with_message(msg.into());
    }

    /// Removes the bar after a failure
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

impl ProgressReporter for CliProgress {
    fn on_total(&mut self, total_bytes: u64) {
        self.bar.set_length(total_bytes);
    }

    fn on_progress(&mut self, update: &ProgressUpdate<'_>) -> bool {
        match &mut self.current {
            Some((path, bytes)) if path.as_path() == update.path => *bytes = update.current,
            current => {
                if let Some((_, bytes)) = current.take() {
                    self.done += bytes;
                }
                *current = Some((update.path.to_path_buf(), update.current));
                let name = update.path.file_name().unwrap_or_default().to_string_lossy();
                self.bar.set_message(name.into_owned());
            }
        }
        self.bar.set_position(self.done + update.current);
        !self.should_cancel()
    }

    fn on_warning(&mut self, message: &str) {
        self.warnings += 1;
        self.bar.println(format!("warning: {}", message));
    }

    fn should_cancel(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}
