//! Byte-stream layer.
//!
//! [`InputStream`] opens a source for sequential reading, transparently
//! decompressing gzip (and bzip2 with the `bzip2` feature) input, counting
//! bytes and optionally hashing the decoded content. [`OutputStream`]
//! creates a destination file, creating parent directories first and
//! honoring the overwrite-in-place policy.
//!
//! Both types close their file when dropped, so every exit path of the
//! routine that opened them releases the descriptor.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::Result;
use crate::checksum::{Checksum, Md5};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: [u8; 3] = *b"BZh";

/// Compression detected on an input stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCompression {
    /// Raw bytes.
    None,
    /// gzip wrapper, decoded transparently.
    Gzip,
    /// bzip2 wrapper, decoded transparently.
    Bzip2,
}

impl StreamCompression {
    /// Detects the wrapper from the first bytes of a stream.
    pub fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(&GZIP_MAGIC) {
            StreamCompression::Gzip
        } else if cfg!(feature = "bzip2") && magic.starts_with(&BZIP2_MAGIC) {
            StreamCompression::Bzip2
        } else {
            StreamCompression::None
        }
    }
}

/// A sequential source stream.
pub struct InputStream {
    path: PathBuf,
    reader: Box<dyn Read>,
    disk_size: u64,
    compression: StreamCompression,
    bytes_read: u64,
    hasher: Option<Md5>,
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream")
            .field("path", &self.path)
            .field("compression", &self.compression)
            .field("bytes_read", &self.bytes_read)
            .finish_non_exhaustive()
    }
}

impl InputStream {
    /// Opens a file, decoding a compression wrapper if one is detected.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), true)
    }

    /// Opens a file without any transparent decompression.
    pub fn open_raw(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path.as_ref(), false)
    }

    fn open_with(path: &Path, decode: bool) -> Result<Self> {
        let file = File::open(path)?;
        let disk_size = file.metadata()?.len();
        let mut buffered = BufReader::new(file);

        let compression = if decode {
            StreamCompression::detect(buffered.fill_buf()?)
        } else {
            StreamCompression::None
        };

        let reader: Box<dyn Read> = match compression {
            StreamCompression::Gzip => Box::new(flate2::bufread::MultiGzDecoder::new(buffered)),
            #[cfg(feature = "bzip2")]
            StreamCompression::Bzip2 => Box::new(bzip2::bufread::MultiBzDecoder::new(buffered)),
            _ => Box::new(buffered),
        };

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            disk_size,
            compression,
            bytes_read: 0,
            hasher: None,
        })
    }

    /// Enables MD5 hashing of the decoded content.
    pub fn hashed(mut self) -> Self {
        self.hasher = Some(Md5::new());
        self
    }

    /// Returns the path this stream was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the on-disk size of the source (compressed size for wrapped input).
    pub fn size(&self) -> u64 {
        self.disk_size
    }

    /// Returns the wrapper detected at open time.
    pub fn compression(&self) -> StreamCompression {
        self.compression
    }

    /// Returns the number of decoded bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Returns the MD5 of the decoded bytes read so far, if hashing is enabled.
    pub fn md5_hex(&self) -> Option<String> {
        self.hasher.as_ref().map(Md5::finalize_hex)
    }

    /// Discards exactly `n` bytes.
    ///
    /// Fails with `UnexpectedEof` if the stream ends first.
    pub fn skip(&mut self, n: u64) -> io::Result<()> {
        let copied = io::copy(&mut self.by_ref().take(n), &mut io::sink())?;
        if copied < n {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended {} bytes early", n - copied),
            ));
        }
        Ok(())
    }
}

impl Read for InputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.bytes_read += n as u64;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}

/// A destination file being written.
pub struct OutputStream {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
    hasher: Md5,
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("path", &self.path)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

impl OutputStream {
    /// Creates (or replaces) a destination file.
    ///
    /// Parent directories are created first. Unless `overwrite_in_place` is
    /// set, an existing file is unlinked so the new content gets a fresh
    /// inode and running programs keep their old image; with
    /// `overwrite_in_place` the existing file is truncated and rewritten.
    pub fn create(path: impl AsRef<Path>, overwrite_in_place: bool) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        if !overwrite_in_place {
            if let Ok(meta) = fs::symlink_metadata(path) {
                if !meta.is_dir() {
                    fs::remove_file(path)?;
                }
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
            hasher: Md5::new(),
        })
    }

    /// Returns the destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Returns the MD5 of everything written so far.
    pub fn md5_hex(&self) -> String {
        self.hasher.finalize_hex()
    }

    /// Flushes buffered data and closes the file, returning bytes written.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.written)
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.written += n as u64;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
