//! ZIP codec.
//!
//! The end of central directory record is found by scanning backward over
//! the last `22 + 65535` bytes of the file, the largest region a maximal
//! archive comment allows. The distance between where the central
//! directory is recorded to start and where it actually ends up before the
//! EOCD record gives a prefix length, so self-extracting archives with any
//! number of prepended bytes decode unchanged.
//!
//! Entries are stored or raw-deflated. Each local header is re-validated
//! before its payload is read, and every file's CRC-32 is checked after it
//! is written. Unix symlink entries (symlink type bits in the external
//! attributes, created on a Unix-family host, non-empty) are written as
//! links with their target passed through
//! [`contain_symlink_target`](crate::safety::contain_symlink_target).
//! ZIP64 archives are not supported; encrypted entries are skipped with a
//! warning.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::{Codec, CodecInfo, CopyContext, FileWrite, verify_source_md5, write_file, write_symlink};
use crate::checksum::{Checksum, Crc32};
use crate::format::reader::{u16_at, u32_at};
use crate::format::{ZIP_CENTRAL_SIG, ZIP_EOCD_LEN, ZIP_EOCD_SIG, ZIP_LOCAL_SIG, ZIP_MAX_COMMENT};
use crate::install::InstalledFile;
use crate::metadata::{self, S_IFLNK, S_IFMT};
use crate::safety::{ResourceLimits, resolve_entry_path};
use crate::{Error, Result};

const FORMAT: &str = "zip";

const INFO: CodecInfo = CodecInfo {
    name: "zip",
    version: "1.0",
    author: "installkit",
    suffixes: &[".zip"],
};

/// Input buffer for compressed data.
const INPUT_BUFFER: usize = 64 * 1024;
/// Output buffer for decoded data, flushed to the destination when full.
const OUTPUT_BUFFER: usize = 512 * 1024;

const CENTRAL_LEN: usize = 46;
const LOCAL_LEN: usize = 30;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

const HOST_UNIX: u8 = 3;
const HOST_OSX: u8 = 19;

/// One central directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ZipEntry {
    pub name: String,
    pub method: u16,
    pub flags: u16,
    pub crc: u32,
    pub compressed_size: u64,
    pub size: u64,
    /// Local header offset, prefix already applied.
    pub local_offset: u64,
    pub external_attr: u32,
    pub creator_os: u8,
    pub mtime: Option<u64>,
}

impl ZipEntry {
    fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    fn from_unix_host(&self) -> bool {
        matches!(self.creator_os, HOST_UNIX | HOST_OSX)
    }

    fn unix_mode(&self) -> Option<u32> {
        let mode = self.external_attr >> 16;
        (self.from_unix_host() && mode != 0).then_some(mode)
    }

    fn is_symlink(&self) -> bool {
        self.from_unix_host() && (self.external_attr >> 16) & S_IFMT == S_IFLNK && self.size > 0
    }
}

/// The parsed central directory of an archive.
#[derive(Debug, Clone)]
pub(crate) struct ZipDirectory {
    pub entries: Vec<ZipEntry>,
    /// Bytes found before the archive proper.
    pub prefix: u64,
}

fn corrupt(archive: &Path, offset: u64, reason: impl Into<String>) -> Error {
    let reason = reason.into();
    log::error!("Corrupt zip archive '{}': {}", archive.display(), reason);
    Error::CorruptHeader {
        format: FORMAT,
        offset,
        reason,
    }
}

fn io_err(archive: &Path) -> impl Fn(io::Error) -> Error + '_ {
    move |e| Error::from_archive_io(e, FORMAT, archive)
}

/// Locates the end of central directory record and parses the directory.
pub(crate) fn read_directory<F: Read + Seek>(
    file: &mut F,
    archive: &Path,
    limits: &ResourceLimits,
) -> Result<ZipDirectory> {
    let file_len = file.seek(SeekFrom::End(0))?;
    if file_len < ZIP_EOCD_LEN as u64 {
        return Err(Error::InvalidFormat {
            format: FORMAT,
            reason: format!("file is only {} bytes", file_len),
        });
    }

    let tail_len = file_len.min((ZIP_EOCD_LEN + ZIP_MAX_COMMENT) as u64);
    let tail_start = file_len - tail_len;
    let mut tail = vec![0u8; tail_len as usize];
    file.seek(SeekFrom::Start(tail_start))?;
    file.read_exact(&mut tail).map_err(io_err(archive))?;

    let sig = ZIP_EOCD_SIG.to_le_bytes();
    let eocd = (0..=tail.len() - ZIP_EOCD_LEN)
        .rev()
        .find(|&i| tail[i..i + 4] == sig)
        .ok_or_else(|| Error::InvalidFormat {
            format: FORMAT,
            reason: "end of central directory not found".to_string(),
        })?;
    let record = &tail[eocd..eocd + ZIP_EOCD_LEN];
    let eocd_pos = tail_start + eocd as u64;

    let total_entries = u16_at(record, 10);
    let cd_size = u32_at(record, 12);
    let cd_offset = u32_at(record, 16);
    if total_entries == 0xFFFF || cd_size == 0xFFFF_FFFF || cd_offset == 0xFFFF_FFFF {
        return Err(Error::UnsupportedFeature { feature: "zip64" });
    }
    if u16_at(record, 4) != 0 || u16_at(record, 6) != 0 {
        return Err(Error::UnsupportedFeature {
            feature: "multi-disk zip",
        });
    }

    let recorded_end = u64::from(cd_offset) + u64::from(cd_size);
    let prefix = eocd_pos
        .checked_sub(recorded_end)
        .ok_or_else(|| corrupt(archive, eocd_pos, "central directory past end of file"))?;
    if prefix > 0 {
        log::debug!("zip archive '{}' has {} prefix bytes", archive.display(), prefix);
    }

    limits.check_header_size(u64::from(cd_size))?;
    limits.check_entries(u64::from(total_entries))?;

    let cd_start = u64::from(cd_offset) + prefix;
    let mut cd = vec![0u8; cd_size as usize];
    file.seek(SeekFrom::Start(cd_start))?;
    file.read_exact(&mut cd).map_err(io_err(archive))?;

    let mut entries = Vec::with_capacity(usize::from(total_entries));
    let mut pos = 0usize;
    for _ in 0..total_entries {
        let at = cd_start + pos as u64;
        let fixed = cd
            .get(pos..pos + CENTRAL_LEN)
            .ok_or_else(|| corrupt(archive, at, "central directory record truncated"))?;
        if u32_at(fixed, 0) != ZIP_CENTRAL_SIG {
            return Err(corrupt(archive, at, "bad central directory signature"));
        }

        let creator_os = fixed[5];
        let flags = u16_at(fixed, 8);
        let method = u16_at(fixed, 10);
        let time = u16_at(fixed, 12);
        let date = u16_at(fixed, 14);
        let crc = u32_at(fixed, 16);
        let compressed_size = u32_at(fixed, 20);
        let size = u32_at(fixed, 24);
        let name_len = usize::from(u16_at(fixed, 28));
        let extra_len = usize::from(u16_at(fixed, 30));
        let comment_len = usize::from(u16_at(fixed, 32));
        let external_attr = u32_at(fixed, 38);
        let local_offset = u32_at(fixed, 42);

        if compressed_size == 0xFFFF_FFFF || size == 0xFFFF_FFFF || local_offset == 0xFFFF_FFFF {
            return Err(Error::UnsupportedFeature { feature: "zip64" });
        }
        limits.check_name_len(name_len as u64)?;
        limits.check_entry_size("compressed size", u64::from(compressed_size))?;
        limits.check_entry_size("uncompressed size", u64::from(size))?;

        let name_start = pos + CENTRAL_LEN;
        let name = cd
            .get(name_start..name_start + name_len)
            .ok_or_else(|| corrupt(archive, at, "entry name truncated"))?;
        let name = String::from_utf8_lossy(name).into_owned();
        pos = name_start + name_len + extra_len + comment_len;
        if pos > cd.len() {
            return Err(corrupt(archive, at, "entry extra field truncated"));
        }

        entries.push(ZipEntry {
            name,
            method,
            flags,
            crc,
            compressed_size: u64::from(compressed_size),
            size: u64::from(size),
            local_offset: u64::from(local_offset) + prefix,
            external_attr,
            creator_os,
            mtime: metadata::dos_to_unix(date, time),
        });
    }

    Ok(ZipDirectory { entries, prefix })
}

/// Validates an entry's local header and returns its payload offset.
fn payload_offset<F: Read + Seek>(file: &mut F, archive: &Path, entry: &ZipEntry) -> Result<u64> {
    let mut local = [0u8; LOCAL_LEN];
    file.seek(SeekFrom::Start(entry.local_offset))?;
    file.read_exact(&mut local).map_err(io_err(archive))?;
    if u32_at(&local, 0) != ZIP_LOCAL_SIG {
        return Err(corrupt(
            archive,
            entry.local_offset,
            format!("bad local header signature for '{}'", entry.name),
        ));
    }
    if u16_at(&local, 8) != entry.method {
        return Err(corrupt(
            archive,
            entry.local_offset,
            format!("local header method differs for '{}'", entry.name),
        ));
    }
    let name_len = u64::from(u16_at(&local, 26));
    let extra_len = u64::from(u16_at(&local, 28));
    Ok(entry.local_offset + LOCAL_LEN as u64 + name_len + extra_len)
}

/// Computes the CRC-32 of everything read through it.
struct CrcReader<R> {
    inner: R,
    crc: Crc32,
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.crc.update(&buf[..n]);
        Ok(n)
    }
}

/// Opens a decoding reader over an entry's payload.
fn entry_reader<'f>(
    file: &'f mut File,
    archive: &Path,
    entry: &ZipEntry,
) -> Result<CrcReader<Box<dyn Read + 'f>>> {
    let offset = payload_offset(file, archive, entry)?;
    file.seek(SeekFrom::Start(offset))?;
    let raw = BufReader::with_capacity(INPUT_BUFFER, file.take(entry.compressed_size));

    let inner: Box<dyn Read + 'f> = match entry.method {
        METHOD_STORED => {
            if entry.compressed_size != entry.size {
                return Err(corrupt(
                    archive,
                    entry.local_offset,
                    format!("stored entry '{}' has mismatched sizes", entry.name),
                ));
            }
            Box::new(raw)
        }
        METHOD_DEFLATED => Box::new(flate2::bufread::DeflateDecoder::new(raw)),
        other => {
            return Err(Error::UnsupportedMethod {
                method: format!("zip method {}", other),
            });
        }
    };
    Ok(CrcReader {
        inner,
        crc: Crc32::new(),
    })
}

fn check_crc(entry: &ZipEntry, actual: u32) -> Result<()> {
    if actual != entry.crc {
        log::error!("CRC mismatch for zip entry '{}'", entry.name);
        return Err(Error::CrcMismatch {
            entry: entry.name.clone(),
            expected: entry.crc,
            actual,
        });
    }
    Ok(())
}

/// ZIP archive codec.
#[derive(Debug, Clone)]
pub struct ZipCodec {
    limits: ResourceLimits,
}

impl ZipCodec {
    /// Creates the codec with the given sanity ceilings.
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }
}

impl Default for ZipCodec {
    fn default() -> Self {
        Self::new(ResourceLimits::default())
    }
}

impl Codec for ZipCodec {
    fn info(&self) -> &CodecInfo {
        &INFO
    }

    fn size(&self, path: &Path) -> Result<u64> {
        let mut file = File::open(path)?;
        let directory = read_directory(&mut file, path, &self.limits)?;
        Ok(directory
            .entries
            .iter()
            .filter(|e| !e.is_dir() && !e.is_symlink())
            .map(|e| e.size)
            .fold(0u64, u64::saturating_add))
    }

    fn copy(&self, ctx: &mut CopyContext<'_>, path: &Path, dest: &Path) -> Result<u64> {
        verify_source_md5(ctx, path)?;
        let mut file = File::open(path)?;
        let directory = read_directory(&mut file, path, &self.limits)?;
        let mut written = 0u64;
        let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

        for entry in &directory.entries {
            ctx.check_cancel()?;
            if entry.flags & 1 != 0 {
                ctx.warn(&format!("Skipping encrypted zip entry '{}'", entry.name));
                continue;
            }
            let out = resolve_entry_path(dest, &entry.name)?;
            log::trace!("zip entry '{}' method {}", entry.name, entry.method);

            if entry.is_dir() {
                metadata::create_dir(&out, None)?;
                if let Some(mode) = entry.unix_mode() {
                    dir_modes.push((out.clone(), mode));
                }
                ctx.record(InstalledFile::directory(&out));
                continue;
            }

            if entry.is_symlink() {
                self.limits.check_symlink_len(entry.size)?;
                let mut reader = entry_reader(&mut file, path, entry)?;
                let mut target = vec![0u8; entry.size as usize];
                reader.read_exact(&mut target).map_err(io_err(path))?;
                let actual = reader.crc.finalize();
                drop(reader);
                check_crc(entry, actual)?;
                let end = target.iter().position(|&b| b == 0).unwrap_or(target.len());
                let target = String::from_utf8_lossy(&target[..end]).into_owned();
                write_symlink(ctx, &out, &entry.name, &target)?;
                continue;
            }

            let mut write = FileWrite::exact(&out, entry.size).chunk(OUTPUT_BUFFER);
            if let Some(mode) = entry.unix_mode() {
                write = write.mode(mode);
            }
            if let Some(mtime) = entry.mtime {
                write = write.mtime(mtime);
            }
            let mut reader = entry_reader(&mut file, path, entry)?;
            written += write_file(ctx, &mut reader, write, FORMAT, path)?;
            let actual = reader.crc.finalize();
            drop(reader);
            check_crc(entry, actual)?;
        }

        for (dir, mode) in dir_modes.iter().rev() {
            metadata::apply_mode(dir, *mode);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn eocd(entries: u16, cd_size: u32, cd_offset: u32, comment: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ZIP_EOCD_SIG.to_le_bytes());
        out.extend_from_slice(&[0, 0, 0, 0]);
        out.extend_from_slice(&entries.to_le_bytes());
        out.extend_from_slice(&entries.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        out.extend_from_slice(comment);
        out
    }

    #[test]
    fn test_empty_archive_with_comment() {
        let data = eocd(0, 0, 0, b"a trailing comment");
        let limits = ResourceLimits::default();
        let dir = read_directory(&mut Cursor::new(data), Path::new("t.zip"), &limits).unwrap();
        assert!(dir.entries.is_empty());
        assert_eq!(dir.prefix, 0);
    }

    #[test]
    fn test_prefix_is_detected() {
        let mut data = vec![0xAAu8; 100];
        data.extend(eocd(0, 0, 0, b""));
        let limits = ResourceLimits::default();
        let dir = read_directory(&mut Cursor::new(data), Path::new("t.zip"), &limits).unwrap();
        assert_eq!(dir.prefix, 100);
    }

    #[test]
    fn test_missing_eocd() {
        let data = vec![0u8; 64];
        let limits = ResourceLimits::default();
        assert!(matches!(
            read_directory(&mut Cursor::new(data), Path::new("t.zip"), &limits),
            Err(Error::InvalidFormat { .. })
        ));
        assert!(matches!(
            read_directory(&mut Cursor::new(vec![1u8; 4]), Path::new("t.zip"), &limits),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_directory_past_eof_is_corrupt() {
        let data = eocd(1, 46, 1000, b"");
        let limits = ResourceLimits::default();
        assert!(matches!(
            read_directory(&mut Cursor::new(data), Path::new("t.zip"), &limits),
            Err(Error::CorruptHeader { .. })
        ));
    }

    #[test]
    fn test_zip64_marker_is_unsupported() {
        let data = eocd(0xFFFF, 0, 0, b"");
        let limits = ResourceLimits::default();
        assert!(matches!(
            read_directory(&mut Cursor::new(data), Path::new("t.zip"), &limits),
            Err(Error::UnsupportedFeature { feature: "zip64" })
        ));
    }

    #[test]
    fn test_entry_classification() {
        let mut entry = ZipEntry {
            name: "bin/link".into(),
            method: 0,
            flags: 0,
            crc: 0,
            compressed_size: 4,
            size: 4,
            local_offset: 0,
            external_attr: (S_IFLNK | 0o777) << 16,
            creator_os: HOST_UNIX,
            mtime: None,
        };
        assert!(entry.is_symlink());
        entry.creator_os = 0;
        assert!(!entry.is_symlink());
        assert_eq!(entry.unix_mode(), None);
        entry.creator_os = HOST_OSX;
        entry.size = 0;
        assert!(!entry.is_symlink());
        entry.name = "dir/".into();
        assert!(entry.is_dir());
    }
}
