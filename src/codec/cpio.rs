//! CPIO codec.
//!
//! Three header variants are recognized by their 6-byte magic:
//!
//! | Magic | Variant | Fixed part after magic | Padding |
//! |-------|---------|------------------------|---------|
//! | `070707` | portable (odc), octal fields | 70 bytes | none |
//! | `070701` | new ASCII (newc), hex fields | 104 bytes | name and data to 4 bytes |
//! | `070702` | new ASCII with checksum | 104 bytes | name and data to 4 bytes |
//!
//! The name field's declared length includes its NUL terminator. An entry
//! named `TRAILER!!!` ends the stream. In the checksum variant a non-zero
//! check field must equal the 32-bit byte sum of the payload.
//!
//! [`CpioReader`] is shared with the RPM codec, whose payload is a CPIO
//! stream.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use super::{Codec, CodecInfo, CopyContext, FileWrite, verify_source_md5, write_file, write_symlink};
use crate::checksum::{ByteSum, Checksum};
use crate::format::reader::{field_str, parse_ascii, read_full};
use crate::format::{CPIO_MAGIC_CRC, CPIO_MAGIC_NEWC, CPIO_MAGIC_ODC, CPIO_TRAILER};
use crate::install::InstalledFile;
use crate::metadata::{self, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG};
use crate::safety::{ResourceLimits, resolve_entry_path};
use crate::stream::InputStream;
use crate::{Error, Result};

const FORMAT: &str = "cpio";

const INFO: CodecInfo = CodecInfo {
    name: "cpio",
    version: "1.0",
    author: "installkit",
    suffixes: &[".cpio", ".cpio.gz", ".cpio.bz2"],
};

/// Header variant of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Variant {
    Odc,
    Newc,
    Crc,
}

/// A parsed CPIO entry header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CpioEntry {
    pub name: String,
    pub mode: u32,
    pub size: u64,
    pub mtime: u64,
    pub rdev: u64,
    pub check: u32,
    pub variant: Variant,
}

impl CpioEntry {
    fn file_type(&self) -> u32 {
        self.mode & S_IFMT
    }
}

/// Sequential CPIO entry reader.
pub(crate) struct CpioReader<'a, R> {
    inner: R,
    archive: &'a Path,
    limits: &'a ResourceLimits,
    offset: u64,
    entries: u64,
}

impl<'a, R: Read> CpioReader<'a, R> {
    pub(crate) fn new(inner: R, archive: &'a Path, limits: &'a ResourceLimits) -> Self {
        Self {
            inner,
            archive,
            limits,
            offset: 0,
            entries: 0,
        }
    }

    fn io_err(&self, e: io::Error) -> Error {
        Error::from_archive_io(e, FORMAT, self.archive)
    }

    fn corrupt(&self, offset: u64, reason: impl Into<String>) -> Error {
        let reason = reason.into();
        log::error!("Corrupt cpio header in '{}': {}", self.archive.display(), reason);
        Error::CorruptHeader {
            format: FORMAT,
            offset,
            reason,
        }
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let result = self.inner.read_exact(buf);
        result.map_err(|e| self.io_err(e))?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        let result = io::copy(&mut (&mut self.inner).take(n), &mut io::sink());
        let copied = result.map_err(|e| self.io_err(e))?;
        if copied < n {
            return Err(self.io_err(io::ErrorKind::UnexpectedEof.into()));
        }
        self.offset += n;
        Ok(())
    }

    fn align(&mut self, variant: Variant) -> Result<()> {
        if variant == Variant::Odc {
            return Ok(());
        }
        let pad = (4 - self.offset % 4) % 4;
        self.skip(pad)
    }

    /// Reads the next entry header and name. `None` at the trailer.
    pub(crate) fn next_entry(&mut self) -> Result<Option<CpioEntry>> {
        let header_offset = self.offset;
        let mut magic = [0u8; 6];
        let n = read_full(&mut self.inner, &mut magic).map_err(|e| self.io_err(e))?;
        if n == 0 {
            log::warn!("cpio archive '{}' has no trailer", self.archive.display());
            return Ok(None);
        }
        if n < magic.len() {
            return Err(self.io_err(io::ErrorKind::UnexpectedEof.into()));
        }
        self.offset += magic.len() as u64;

        let variant = match &magic {
            m if m == CPIO_MAGIC_ODC => Variant::Odc,
            m if m == CPIO_MAGIC_NEWC => Variant::Newc,
            m if m == CPIO_MAGIC_CRC => Variant::Crc,
            _ => {
                return Err(self.corrupt(
                    header_offset,
                    format!("unknown magic {:?}", magic.escape_ascii().to_string()),
                ));
            }
        };

        let (mode, mtime, namesize, size, rdev, check) = match variant {
            Variant::Odc => {
                let mut h = [0u8; 70];
                self.read_exact(&mut h)?;
                let field = |start: usize, len: usize| parse_ascii(&h[start..start + len], 8);
                let parsed = (|| {
                    Some((
                        field(12, 6)?,
                        field(42, 11)?,
                        field(53, 6)?,
                        field(59, 11)?,
                        field(36, 6)?,
                    ))
                })();
                let Some((mode, mtime, namesize, size, rdev)) = parsed else {
                    return Err(self.corrupt(header_offset, "invalid octal field"));
                };
                (mode, mtime, namesize, size, rdev, 0)
            }
            Variant::Newc | Variant::Crc => {
                let mut h = [0u8; 104];
                self.read_exact(&mut h)?;
                let field = |index: usize| parse_ascii(&h[index * 8..index * 8 + 8], 16);
                let parsed = (|| {
                    Some((
                        field(1)?,
                        field(5)?,
                        field(11)?,
                        field(6)?,
                        metadata::device_number(field(9)? as u32, field(10)? as u32),
                        field(12)? as u32,
                    ))
                })();
                let Some(fields) = parsed else {
                    return Err(self.corrupt(header_offset, "invalid hex field"));
                };
                fields
            }
        };

        if namesize == 0 {
            return Err(self.corrupt(header_offset, "zero-length name"));
        }
        self.limits.check_name_len(namesize)?;
        self.limits.check_entry_size("entry size", size)?;

        let mut name_buf = vec![0u8; namesize as usize];
        self.read_exact(&mut name_buf)?;
        self.align(variant)?;
        let name = field_str(&name_buf);

        if name == CPIO_TRAILER {
            return Ok(None);
        }

        self.entries += 1;
        self.limits.check_entries(self.entries)?;

        Ok(Some(CpioEntry {
            name,
            mode: mode as u32,
            size,
            mtime,
            rdev,
            check,
            variant,
        }))
    }

    /// Reader limited to the current entry's payload.
    pub(crate) fn payload(&mut self, size: u64) -> io::Take<&mut R> {
        self.offset += size;
        (&mut self.inner).take(size)
    }

    /// Consumes the padding after a payload read through [`payload`](Self::payload).
    pub(crate) fn finish_payload(&mut self, entry: &CpioEntry) -> Result<()> {
        self.align(entry.variant)
    }

    /// Skips the current entry's payload and padding.
    pub(crate) fn skip_payload(&mut self, entry: &CpioEntry) -> Result<()> {
        self.skip(entry.size)?;
        self.align(entry.variant)
    }
}

/// Counts the byte sum of everything read through it.
struct SumReader<R> {
    inner: R,
    sum: ByteSum,
}

impl<R: Read> Read for SumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.sum.update(&buf[..n]);
        Ok(n)
    }
}

/// Extracts a CPIO stream under `dest`.
///
/// `map_name` rewrites each entry name before it is resolved against
/// `dest`; returning `None` skips the entry.
pub(crate) fn extract_stream<R: Read>(
    ctx: &mut CopyContext<'_>,
    reader: &mut CpioReader<'_, R>,
    dest: &Path,
    map_name: &dyn Fn(&str) -> Option<String>,
) -> Result<u64> {
    let archive = reader.archive;
    let limits = reader.limits;
    let mut written = 0u64;
    let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

    while let Some(entry) = reader.next_entry()? {
        ctx.check_cancel()?;
        let Some(name) = map_name(&entry.name) else {
            log::debug!("Skipping relocated-away entry '{}'", entry.name);
            reader.skip_payload(&entry)?;
            continue;
        };
        let out = resolve_entry_path(dest, &name)?;
        log::trace!("cpio entry '{}' mode {:o}", entry.name, entry.mode);

        match entry.file_type() {
            S_IFREG | 0 => {
                let file = FileWrite::exact(&out, entry.size)
                    .mode(entry.mode)
                    .mtime(entry.mtime);
                let mut payload = SumReader {
                    inner: reader.payload(entry.size),
                    sum: ByteSum::new(),
                };
                written += write_file(ctx, &mut payload, file, FORMAT, archive)?;
                let actual = payload.sum.finalize();
                reader.finish_payload(&entry)?;
                if entry.variant == Variant::Crc && entry.check != 0 && entry.check != actual {
                    log::error!("Checksum mismatch for cpio entry '{}'", entry.name);
                    return Err(Error::CrcMismatch {
                        entry: entry.name,
                        expected: entry.check,
                        actual,
                    });
                }
            }
            S_IFDIR => {
                metadata::create_dir(&out, None)?;
                dir_modes.push((out.clone(), entry.mode));
                ctx.record(InstalledFile::directory(&out));
                reader.skip_payload(&entry)?;
            }
            S_IFLNK => {
                limits.check_symlink_len(entry.size)?;
                let mut target = vec![0u8; entry.size as usize];
                reader.payload(entry.size).read_exact(&mut target).map_err(|e| {
                    Error::from_archive_io(e, FORMAT, archive)
                })?;
                reader.finish_payload(&entry)?;
                write_symlink(ctx, &out, &name, &field_str(&target))?;
            }
            S_IFIFO | S_IFCHR | S_IFBLK => {
                metadata::make_special(&out, entry.mode, entry.rdev);
                ctx.record(InstalledFile::special(&out));
                reader.skip_payload(&entry)?;
            }
            other => {
                ctx.warn(&format!(
                    "Skipping '{}' with unsupported cpio file type {:o}",
                    entry.name, other
                ));
                reader.skip_payload(&entry)?;
            }
        }
    }

    for (dir, mode) in dir_modes.iter().rev() {
        metadata::apply_mode(dir, *mode);
    }
    Ok(written)
}

/// Sums the sizes of regular entries in a CPIO stream.
pub(crate) fn stream_size<R: Read>(reader: &mut CpioReader<'_, R>) -> Result<u64> {
    let mut total = 0u64;
    while let Some(entry) = reader.next_entry()? {
        if matches!(entry.file_type(), S_IFREG | 0) {
            total = total.saturating_add(entry.size);
        }
        reader.skip_payload(&entry)?;
    }
    Ok(total)
}

/// CPIO archive codec.
#[derive(Debug, Clone)]
pub struct CpioCodec {
    limits: ResourceLimits,
}

impl CpioCodec {
    /// Creates the codec with the given sanity ceilings.
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }
}

impl Default for CpioCodec {
    fn default() -> Self {
        Self::new(ResourceLimits::default())
    }
}

impl Codec for CpioCodec {
    fn info(&self) -> &CodecInfo {
        &INFO
    }

    fn size(&self, path: &Path) -> Result<u64> {
        let stream = InputStream::open(path)?;
        stream_size(&mut CpioReader::new(stream, path, &self.limits))
    }

    fn copy(&self, ctx: &mut CopyContext<'_>, path: &Path, dest: &Path) -> Result<u64> {
        verify_source_md5(ctx, path)?;
        let stream = InputStream::open(path)?;
        let mut reader = CpioReader::new(stream, path, &self.limits);
        extract_stream(ctx, &mut reader, dest, &|name| Some(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn newc(name: &str, mode: u32, data: &[u8]) -> Vec<u8> {
        let namesize = name.len() + 1;
        let mut out = format!(
            "070701{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}",
            1,
            mode,
            0,
            0,
            1,
            0,
            data.len(),
            0,
            0,
            0,
            0,
            namesize,
            0
        )
        .into_bytes();
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out.extend_from_slice(data);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }

    #[test]
    fn test_newc_headers_and_padding() {
        let mut data = newc("a.txt", S_IFREG | 0o644, b"hello");
        data.extend(newc("dir", S_IFDIR | 0o755, b""));
        data.extend(newc(CPIO_TRAILER, 0, b""));

        let limits = ResourceLimits::default();
        let mut reader = CpioReader::new(&data[..], Path::new("t.cpio"), &limits);
        let a = reader.next_entry().unwrap().unwrap();
        assert_eq!(a.name, "a.txt");
        assert_eq!(a.size, 5);
        assert_eq!(a.mode, S_IFREG | 0o644);
        reader.skip_payload(&a).unwrap();
        let dir = reader.next_entry().unwrap().unwrap();
        assert_eq!(dir.file_type(), S_IFDIR);
        reader.skip_payload(&dir).unwrap();
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_stream_size_counts_regular_files() {
        let mut data = newc("a", S_IFREG | 0o644, b"12345");
        data.extend(newc("l", S_IFLNK | 0o777, b"a"));
        data.extend(newc("b", S_IFREG | 0o644, b"123"));
        data.extend(newc(CPIO_TRAILER, 0, b""));
        let limits = ResourceLimits::default();
        let mut reader = CpioReader::new(&data[..], Path::new("t.cpio"), &limits);
        assert_eq!(stream_size(&mut reader).unwrap(), 8);
    }

    #[test]
    fn test_bad_magic() {
        let data = b"070709xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx";
        let limits = ResourceLimits::default();
        let mut reader = CpioReader::new(&data[..], Path::new("t.cpio"), &limits);
        assert!(matches!(
            reader.next_entry(),
            Err(Error::CorruptHeader { offset: 0, .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let data = newc("a", S_IFREG | 0o644, b"12345");
        let limits = ResourceLimits::default();
        let mut reader = CpioReader::new(&data[..40], Path::new("t.cpio"), &limits);
        assert!(matches!(reader.next_entry(), Err(Error::Truncated { .. })));
    }

    #[test]
    fn test_name_ceiling() {
        let data = newc("a-rather-long-name", S_IFREG, b"");
        let limits = ResourceLimits::default().max_name_len(4);
        let mut reader = CpioReader::new(&data[..], Path::new("t.cpio"), &limits);
        assert!(matches!(reader.next_entry(), Err(Error::SizeOutOfBounds { .. })));
    }
}
