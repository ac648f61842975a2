//! Progress reporting for extraction and installation.
//!
//! The progress reporter is the only point where archive codecs and the
//! orchestrator call back into caller code. It is invoked from inside tight
//! decode loops, so implementations must return quickly. Returning `false`
//! from [`ProgressReporter::on_progress`] cancels the current operation at
//! the next chunk boundary; [`ProgressReporter::should_cancel`] is polled
//! between files.
//!
//! # Example
//!
//! ```rust
//! use installkit::progress::{ProgressReporter, progress_fn};
//!
//! let mut reporter = progress_fn(|update| {
//!     println!("{}: {}/{}", update.path.display(), update.current, update.total);
//!     true
//! });
//! # let _ = &mut reporter as &mut dyn ProgressReporter;
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::install::InstallState;

/// IEC byte unit: 1 KiB = 1024 bytes.
pub const BYTES_KIB: u64 = 1024;
/// IEC byte unit: 1 MiB = 1024 KiB.
pub const BYTES_MIB: u64 = 1024 * BYTES_KIB;
/// IEC byte unit: 1 GiB = 1024 MiB.
pub const BYTES_GIB: u64 = 1024 * BYTES_MIB;

/// A single progress notification.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate<'a> {
    /// The installation state as of the start of the current item.
    pub state: &'a InstallState,
    /// Destination path of the item being written.
    pub path: &'a Path,
    /// Bytes written so far for this item.
    pub current: u64,
    /// Expected bytes for this item (an estimate; may be 0 if unknown).
    pub total: u64,
    /// Label of the option being installed.
    pub label: &'a str,
}

/// Progress reporting trait for installation operations.
pub trait ProgressReporter {
    /// Called once before installation starts with the estimated total.
    fn on_total(&mut self, total_bytes: u64) {
        let _ = total_bytes;
    }

    /// Called at least once per meaningfully-sized chunk.
    ///
    /// Returns `true` to continue or `false` to request cancellation.
    fn on_progress(&mut self, update: &ProgressUpdate<'_>) -> bool {
        let _ = update;
        true
    }

    /// Called for soft failures that were skipped.
    fn on_warning(&mut self, message: &str) {
        let _ = message;
    }

    /// Checks if cancellation has been requested.
    ///
    /// Polled between files without waiting for the next `on_progress`.
    fn should_cancel(&self) -> bool {
        false
    }
}

/// A progress reporter that does nothing (null object pattern).
#[derive(Debug, Default, Clone)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {}

/// A progress reporter that collects statistics.
///
/// Tracks the last byte count reported for every item, so the sum of
/// [`reported_bytes`](Self::reported_bytes) can be compared against the
/// final installed-byte total.
#[derive(Debug, Default, Clone)]
pub struct StatisticsProgress {
    /// Estimated total passed to `on_total`.
    pub total_bytes: u64,
    /// Number of `on_progress` calls.
    pub updates: usize,
    /// Last `current` value seen per destination path.
    pub items: BTreeMap<PathBuf, u64>,
    /// Labels seen, in order of first appearance.
    pub labels: Vec<String>,
    /// Whether cancellation was requested.
    pub cancelled: bool,
    /// Warnings collected.
    pub warnings: Vec<String>,
}

impl StatisticsProgress {
    /// Creates a new statistics progress reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of the final byte counts reported for each item.
    pub fn reported_bytes(&self) -> u64 {
        self.items.values().sum()
    }
}

impl ProgressReporter for StatisticsProgress {
    fn on_total(&mut self, total_bytes: u64) {
        self.total_bytes = total_bytes;
    }

    fn on_progress(&mut self, update: &ProgressUpdate<'_>) -> bool {
        self.updates += 1;
        self.items.insert(update.path.to_path_buf(), update.current);
        if !self.labels.iter().any(|l| l == update.label) {
            self.labels.push(update.label.to_string());
        }
        !self.cancelled
    }

    fn on_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    fn should_cancel(&self) -> bool {
        self.cancelled
    }
}

/// A progress reporter that rate-limits callbacks.
///
/// Completion of an item (`current >= total`) is always forwarded.
pub struct ThrottledProgress<P> {
    inner: P,
    min_interval: Duration,
    last_callback: Instant,
}

impl<P: ProgressReporter> ThrottledProgress<P> {
    /// Creates a new throttled progress reporter.
    pub fn new(inner: P, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            last_callback: Instant::now(),
        }
    }

    /// Creates with default 100ms interval.
    pub fn default_interval(inner: P) -> Self {
        Self::new(inner, Duration::from_millis(100))
    }

    /// Returns the inner reporter.
    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: ProgressReporter> ProgressReporter for ThrottledProgress<P> {
    fn on_total(&mut self, total_bytes: u64) {
        self.inner.on_total(total_bytes);
    }

    fn on_progress(&mut self, update: &ProgressUpdate<'_>) -> bool {
        let now = Instant::now();
        if update.current >= update.total
            || now.duration_since(self.last_callback) >= self.min_interval
        {
            self.last_callback = now;
            self.inner.on_progress(update)
        } else {
            !self.inner.should_cancel()
        }
    }

    fn on_warning(&mut self, message: &str) {
        self.inner.on_warning(message);
    }

    fn should_cancel(&self) -> bool {
        self.inner.should_cancel()
    }
}

/// A thread-safe progress reporter using atomics.
///
/// Lets another thread (a signal handler, a UI thread) observe progress and
/// request cancellation through an externally polled flag.
#[derive(Debug)]
pub struct AtomicProgress {
    total_bytes: AtomicU64,
    current_bytes: AtomicU64,
    cancelled: AtomicBool,
    start_time: Instant,
}

impl Default for AtomicProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicProgress {
    /// Creates a new atomic progress reporter.
    pub fn new() -> Self {
        Self {
            total_bytes: AtomicU64::new(0),
            current_bytes: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            start_time: Instant::now(),
        }
    }

    /// Creates a shared atomic progress reporter.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns the estimated total.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Returns installed bytes as of the last update.
    pub fn current_bytes(&self) -> u64 {
        self.current_bytes.load(Ordering::Relaxed)
    }

    /// Returns whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Returns completion percentage (0.0 - 100.0).
    pub fn percentage(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            0.0
        } else {
            (self.current_bytes() as f64 / total as f64) * 100.0
        }
    }

    /// Returns elapsed time since creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl ProgressReporter for Arc<AtomicProgress> {
    fn on_total(&mut self, total_bytes: u64) {
        self.total_bytes.store(total_bytes, Ordering::Relaxed);
    }

    fn on_progress(&mut self, update: &ProgressUpdate<'_>) -> bool {
        self.current_bytes.store(
            update.state.installed_bytes() + update.current,
            Ordering::Relaxed,
        );
        !self.is_cancelled()
    }

    fn should_cancel(&self) -> bool {
        self.is_cancelled()
    }
}

/// A progress reporter that calls a closure.
pub struct ClosureProgress<F> {
    callback: F,
}

impl<F> ClosureProgress<F>
where
    F: FnMut(&ProgressUpdate<'_>) -> bool,
{
    /// Creates a progress reporter from a closure.
    ///
    /// The closure returns `true` to continue or `false` to cancel.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgress<F>
where
    F: FnMut(&ProgressUpdate<'_>) -> bool,
{
    fn on_progress(&mut self, update: &ProgressUpdate<'_>) -> bool {
        (self.callback)(update)
    }
}

/// Creates a closure-based progress reporter.
pub fn progress_fn<F>(f: F) -> ClosureProgress<F>
where
    F: FnMut(&ProgressUpdate<'_>) -> bool,
{
    ClosureProgress::new(f)
}

/// Formats bytes as a human-readable string using IEC units (KiB, MiB, GiB).
///
/// ```rust
/// use installkit::progress::format_bytes_iec;
///
/// assert_eq!(format_bytes_iec(512), "512 B");
/// assert_eq!(format_bytes_iec(1536), "1.5 KiB");
/// ```
pub fn format_bytes_iec(bytes: u64) -> String {
    let value = bytes as f64;
    if bytes < BYTES_KIB {
        format!("{} B", bytes)
    } else if bytes < BYTES_MIB {
        format!("{:.1} KiB", value / BYTES_KIB as f64)
    } else if bytes < BYTES_GIB {
        format!("{:.1} MiB", value / BYTES_MIB as f64)
    } else {
        format!("{:.1} GiB", value / BYTES_GIB as f64)
    }
}
