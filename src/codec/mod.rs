//! Archive codecs and the contract they implement.
//!
//! A [`Codec`] handles one archive or compression format. It estimates
//! the uncompressed size of a source file and extracts it into a
//! destination directory, reporting progress through a [`CopyContext`].
//! The [`CodecRegistry`] maps file-name suffixes to codecs.
//!
//! # Contract
//!
//! - `size` is an estimate for progress totals and free-space checks; it is
//!   never used to validate the result of `copy`.
//! - `copy` returns the bytes actually written. Each destination path is
//!   reported with a final `current` equal to the bytes written to it, and
//!   every written file is recorded in the install state, so the sum of the
//!   last reported values equals the installed-byte total.
//! - Sizes declared by an archive are checked against
//!   [`ResourceLimits`](crate::safety::ResourceLimits) before use.
//! - Parent directories are created before writing; permissions are set
//!   only after a payload is completely written.
//! - Nothing is written outside the destination directory.

pub mod cpio;
pub mod rar;
pub mod registry;
pub mod rpm;
pub mod tar;
pub mod uz2;
pub mod zip;

pub use registry::{CodecRegistry, ModuleHandle};

use std::io::{Read, Write};
use std::path::Path;

use crate::checksum::Md5;
use crate::install::{FileRef, InstallOptions, InstallState, InstalledFile, OptionNode};
use crate::progress::{ProgressReporter, ProgressUpdate};
use crate::stream::{InputStream, OutputStream};
use crate::{Error, Result};

/// Static description of a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecInfo {
    /// Short format name.
    pub name: &'static str,
    /// Codec version.
    pub version: &'static str,
    /// Codec author.
    pub author: &'static str,
    /// File-name suffixes handled, matched case-sensitively.
    pub suffixes: &'static [&'static str],
}

/// One archive format.
pub trait Codec {
    /// Returns the codec descriptor.
    fn info(&self) -> &CodecInfo;

    /// Called once when the codec is registered.
    fn init(&mut self) -> bool {
        true
    }

    /// Called once at registry teardown.
    fn free(&mut self) -> bool {
        true
    }

    /// Estimates the uncompressed size of `path`.
    fn size(&self, path: &Path) -> Result<u64>;

    /// Extracts `path` under `dest`, returning the bytes written.
    fn copy(&self, ctx: &mut CopyContext<'_>, path: &Path, dest: &Path) -> Result<u64>;
}

/// Everything a codec needs while extracting one source file.
pub struct CopyContext<'a> {
    /// Label of the option being installed.
    pub label: &'a str,
    /// The option-tree node that listed the source, if any.
    pub node: Option<OptionNode<'a>>,
    /// Installation settings.
    pub options: &'a InstallOptions,
    /// Installation bookkeeping.
    pub state: &'a mut InstallState,
    /// Caller's progress reporter.
    pub progress: &'a mut dyn ProgressReporter,
}

impl std::fmt::Debug for CopyContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopyContext")
            .field("label", &self.label)
            .field("node", &self.node.map(|n| n.id()))
            .finish_non_exhaustive()
    }
}

impl<'a> CopyContext<'a> {
    /// Creates a context.
    pub fn new(
        label: &'a str,
        node: Option<OptionNode<'a>>,
        options: &'a InstallOptions,
        state: &'a mut InstallState,
        progress: &'a mut dyn ProgressReporter,
    ) -> Self {
        Self {
            label,
            node,
            options,
            state,
            progress,
        }
    }

    /// Reports progress for one destination path.
    ///
    /// Returns [`Error::Cancelled`] if the reporter asks to stop.
    pub fn report(&mut self, path: &Path, current: u64, total: u64) -> Result<()> {
        let update = ProgressUpdate {
            state: &*self.state,
            path,
            current,
            total,
            label: self.label,
        };
        if self.progress.on_progress(&update) {
            Ok(())
        } else {
            log::info!("Installation cancelled while writing '{}'", path.display());
            Err(Error::Cancelled)
        }
    }

    /// Polls the reporter's cancellation flag.
    pub fn check_cancel(&self) -> Result<()> {
        if self.progress.should_cancel() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Forwards a soft failure to the reporter and the log.
    pub fn warn(&mut self, message: &str) {
        log::warn!("{}", message);
        self.progress.on_warning(message);
    }

    /// Whether the listing node marks its files as mutable.
    pub fn is_mutable(&self) -> bool {
        self.flag("mutable")
    }

    /// Boolean attribute of the listing node.
    pub fn flag(&self, name: &str) -> bool {
        self.node.is_some_and(|n| n.flag(name))
    }

    /// Attribute of the listing node.
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.node.and_then(|n| n.attr(name))
    }

    /// Permission override from the listing node's `mode` attribute.
    pub fn mode_override(&self) -> Option<u32> {
        let raw = self.attr("mode")?;
        match u32::from_str_radix(raw.trim(), 8) {
            Ok(mode) => Some(mode),
            Err(_) => {
                log::warn!("Ignoring invalid mode '{}'", raw);
                None
            }
        }
    }

    /// Records a written file. Mutable files lose their content hash.
    pub fn record(&mut self, mut file: InstalledFile) -> FileRef {
        if self.is_mutable() {
            file.md5 = None;
        }
        self.state.record_file(file)
    }
}

/// Verifies a source file against the listing node's `md5sum` attribute.
///
/// The hash is taken over the raw source bytes before any decoding.
pub(crate) fn verify_source_md5(ctx: &CopyContext<'_>, path: &Path) -> Result<()> {
    let Some(expected) = ctx.attr("md5sum") else {
        return Ok(());
    };
    let mut stream = InputStream::open_raw(path)?.hashed();
    std::io::copy(&mut stream, &mut std::io::sink())?;
    let actual = stream.md5_hex().unwrap_or_default();
    if Md5::matches(expected, &actual) {
        Ok(())
    } else {
        log::error!(
            "Checksum mismatch for '{}': expected {}, got {}",
            path.display(),
            expected,
            actual
        );
        Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.trim().to_string(),
            actual,
        })
    }
}

/// Chunk size for payload copies: 64 TAR blocks.
pub(crate) const COPY_CHUNK: usize = 64 * 512;

/// A regular file about to be written by a codec.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FileWrite<'p> {
    /// Destination path.
    pub path: &'p Path,
    /// Exact payload length, or `None` to copy until the reader ends.
    pub size: Option<u64>,
    /// Expected length for progress reports.
    pub total: u64,
    /// Permission bits from the archive.
    pub mode: Option<u32>,
    /// Modification time from the archive.
    pub mtime: Option<u64>,
    /// MD5 the written content must have.
    pub md5: Option<&'p str>,
    /// Size of the decode buffer flushed to the destination.
    pub chunk: usize,
}

impl<'p> FileWrite<'p> {
    pub(crate) fn exact(path: &'p Path, size: u64) -> Self {
        Self {
            path,
            size: Some(size),
            total: size,
            mode: None,
            mtime: None,
            md5: None,
            chunk: COPY_CHUNK,
        }
    }

    /// A payload that runs until the reader ends; `total` is an estimate.
    pub(crate) fn streamed(path: &'p Path, total: u64) -> Self {
        Self {
            path,
            size: None,
            total,
            mode: None,
            mtime: None,
            md5: None,
            chunk: COPY_CHUNK,
        }
    }

    pub(crate) fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub(crate) fn mtime(mut self, mtime: u64) -> Self {
        self.mtime = Some(mtime);
        self
    }

    pub(crate) fn expect_md5(mut self, md5: &'p str) -> Self {
        self.md5 = Some(md5);
        self
    }

    pub(crate) fn chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }
}

/// Writes one regular file from `reader`, reporting progress per chunk.
///
/// Read failures are mapped with [`Error::from_archive_io`], so a short
/// payload becomes [`Error::Truncated`]. Permissions and mtime are applied
/// after the file is closed, then the file is recorded.
pub(crate) fn write_file(
    ctx: &mut CopyContext<'_>,
    reader: &mut dyn Read,
    file: FileWrite<'_>,
    format: &'static str,
    archive: &Path,
) -> Result<u64> {
    write_file_record(ctx, reader, file, format, archive).map(|(written, _)| written)
}

/// [`write_file`], also returning the record of the written file.
///
/// An expected MD5 is checked after the file is recorded, so a mismatching
/// file is still known to the rollback layer. A copy that fails part way
/// (short payload, decode error, cancellation) removes the partial file;
/// if it cannot be removed it is recorded with the bytes written so far.
pub(crate) fn write_file_record(
    ctx: &mut CopyContext<'_>,
    reader: &mut dyn Read,
    file: FileWrite<'_>,
    format: &'static str,
    archive: &Path,
) -> Result<(u64, FileRef)> {
    let mut out = OutputStream::create(file.path, ctx.options.overwrite_in_place)?;
    if let Err(e) = copy_payload(ctx, reader, &mut out, &file, format, archive) {
        discard_partial(ctx, out, file.path);
        return Err(e);
    }

    let md5 = out.md5_hex();
    let written = out.finish()?;
    if let Some(mode) = ctx.mode_override().or(file.mode) {
        crate::metadata::apply_mode(file.path, mode);
    }
    if let Some(mtime) = file.mtime {
        crate::metadata::apply_mtime(file.path, mtime);
    }
    let record = ctx.record(InstalledFile::regular(file.path, written, Some(md5.clone())));
    if let Some(expected) = file.md5 {
        if !Md5::matches(expected, &md5) {
            log::error!(
                "Checksum mismatch for '{}': expected {}, got {}",
                file.path.display(),
                expected,
                md5
            );
            return Err(Error::ChecksumMismatch {
                path: file.path.to_path_buf(),
                expected: expected.trim().to_string(),
                actual: md5,
            });
        }
    }
    Ok((written, record))
}

fn copy_payload(
    ctx: &mut CopyContext<'_>,
    reader: &mut dyn Read,
    out: &mut OutputStream,
    file: &FileWrite<'_>,
    format: &'static str,
    archive: &Path,
) -> Result<()> {
    let mut buf = vec![0u8; file.chunk];
    let mut remaining = file.size;
    ctx.report(file.path, 0, file.total)?;

    loop {
        let want = match remaining {
            Some(0) => break,
            Some(n) => n.min(buf.len() as u64) as usize,
            None => buf.len(),
        };
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) if remaining.is_some() => {
                return Err(Error::from_archive_io(
                    std::io::ErrorKind::UnexpectedEof.into(),
                    format,
                    archive,
                ));
            }
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::from_archive_io(e, format, archive)),
        };
        out.write_all(&buf[..n])?;
        if let Some(r) = remaining.as_mut() {
            *r -= n as u64;
        }
        ctx.report(file.path, out.written(), file.total.max(out.written()))?;
    }
    Ok(())
}

fn discard_partial(ctx: &mut CopyContext<'_>, out: OutputStream, path: &Path) {
    let written = out.written();
    drop(out);
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed partial file '{}'", path.display()),
        Err(e) => {
            log::warn!("Failed to remove partial file '{}': {}", path.display(), e);
            ctx.record(InstalledFile::regular(path, written, None));
        }
    }
}

/// Creates a symlink entry with a contained target and records it.
pub(crate) fn write_symlink(
    ctx: &mut CopyContext<'_>,
    link: &Path,
    entry_name: &str,
    target: &str,
) -> Result<()> {
    let contained = crate::safety::contain_symlink_target(entry_name, target);
    crate::metadata::create_symlink(link, &contained)?;
    ctx.report(link, 0, 0)?;
    ctx.record(InstalledFile::symlink(link, contained));
    Ok(())
}
