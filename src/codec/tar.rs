//! POSIX ustar TAR codec.
//!
//! Archives are read sequentially through [`InputStream`], so gzip (and,
//! with the `bzip2` feature, bzip2) wrapped archives are handled without a
//! separate codec. All-zero records are padding and scanning continues past
//! them until the stream ends.
//!
//! Supported entry types: regular files (`0`, NUL, `7`), hard links (`1`),
//! symbolic links (`2`), character and block devices (`3`, `4`),
//! directories (`5`) and FIFOs (`6`). GNU long names (`L`) and long link
//! names (`K`) apply to the next entry; pax headers (`x`, `g`) are skipped.
//! Any other type is logged and its payload skipped.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use super::{Codec, CodecInfo, CopyContext, FileWrite, verify_source_md5, write_file, write_symlink};
use crate::format::TAR_BLOCK;
use crate::format::reader::{field_str, parse_ascii, parse_tar_number, read_full};
use crate::install::InstalledFile;
use crate::metadata::{self, S_IFBLK, S_IFCHR, S_IFIFO};
use crate::safety::{ResourceLimits, resolve_entry_path};
use crate::stream::InputStream;
use crate::{Error, Result};

const FORMAT: &str = "tar";

const INFO: CodecInfo = CodecInfo {
    name: "tar",
    version: "1.0",
    author: "installkit",
    suffixes: &[".tar", ".tar.gz", ".tgz", ".tar.bz2", ".tbz2", ".tbz"],
};

/// TAR archive codec.
#[derive(Debug, Clone)]
pub struct TarCodec {
    limits: ResourceLimits,
}

impl TarCodec {
    /// Creates the codec with the given sanity ceilings.
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }
}

impl Default for TarCodec {
    fn default() -> Self {
        Self::new(ResourceLimits::default())
    }
}

/// A parsed TAR header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TarHeader {
    pub name: String,
    pub mode: u32,
    pub size: u64,
    pub mtime: u64,
    pub typeflag: u8,
    pub linkname: String,
    pub devmajor: u32,
    pub devminor: u32,
}

impl TarHeader {
    fn is_regular(&self) -> bool {
        matches!(self.typeflag, b'0' | 0 | b'7')
    }
}

/// Sequential TAR header reader.
pub(crate) struct TarReader<'a, R> {
    inner: R,
    archive: &'a Path,
    limits: &'a ResourceLimits,
    offset: u64,
    entries: u64,
}

impl<'a, R: Read> TarReader<'a, R> {
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
        log::error!("Corrupt tar header in '{}': {}", self.archive.display(), reason);
        Error::CorruptHeader {
            format: FORMAT,
            offset,
            reason,
        }
    }

    /// Reads headers up to the next real entry. `None` at end of stream.
    pub(crate) fn next_entry(&mut self) -> Result<Option<TarHeader>> {
        let mut long_name: Option<String> = None;
        let mut long_link: Option<String> = None;

        loop {
            let mut block = [0u8; TAR_BLOCK];
            let n = read_full(&mut self.inner, &mut block).map_err(|e| self.io_err(e))?;
            if n == 0 {
                return Ok(None);
            }
            if n < TAR_BLOCK {
                return Err(self.io_err(io::ErrorKind::UnexpectedEof.into()));
            }
            let header_offset = self.offset;
            self.offset += TAR_BLOCK as u64;

            if block.iter().all(|&b| b == 0) {
                continue;
            }

            verify_checksum(&block).map_err(|reason| self.corrupt(header_offset, reason))?;

            let number = |range: std::ops::Range<usize>, what: &str| {
                parse_tar_number(&block[range]).ok_or_else(|| format!("invalid {} field", what))
            };
            let mode = number(100..108, "mode").map_err(|r| self.corrupt(header_offset, r))?;
            let size = number(124..136, "size").map_err(|r| self.corrupt(header_offset, r))?;
            let mtime = number(136..148, "mtime").map_err(|r| self.corrupt(header_offset, r))?;
            let typeflag = block[156];

            self.limits.check_entry_size("entry size", size)?;

            match typeflag {
                b'L' | b'K' => {
                    self.limits.check_name_len(size)?;
                    let mut data = vec![0u8; size as usize];
                    self.inner.read_exact(&mut data).map_err(|e| self.io_err(e))?;
                    self.skip_padding(size)?;
                    let text = field_str(&data);
                    if typeflag == b'L' {
                        long_name = Some(text);
                    } else {
                        long_link = Some(text);
                    }
                    continue;
                }
                b'x' | b'g' => {
                    log::debug!("Skipping pax header at offset {:#x}", header_offset);
                    self.skip_payload(size)?;
                    continue;
                }
                _ => {}
            }

            let mut name = field_str(&block[0..100]);
            if &block[257..262] == b"ustar" {
                let prefix = field_str(&block[345..500]);
                if !prefix.is_empty() {
                    name = format!("{}/{}", prefix, name);
                }
            }
            let name = long_name.take().unwrap_or(name);
            let linkname = long_link.take().unwrap_or_else(|| field_str(&block[157..257]));
            if name.is_empty() {
                return Err(self.corrupt(header_offset, "empty entry name"));
            }

            self.entries += 1;
            self.limits.check_entries(self.entries)?;

            return Ok(Some(TarHeader {
                name,
                mode: mode as u32,
                size,
                mtime,
                typeflag,
                linkname,
                devmajor: parse_ascii(&block[329..337], 8).unwrap_or(0) as u32,
                devminor: parse_ascii(&block[337..345], 8).unwrap_or(0) as u32,
            }));
        }
    }

    /// Skips an entry's payload and its padding.
    pub(crate) fn skip_payload(&mut self, size: u64) -> Result<()> {
        self.skip(padded(size))
    }

    /// Skips the padding after a payload of `size` bytes.
    pub(crate) fn skip_padding(&mut self, size: u64) -> Result<()> {
        self.skip(padded(size) - size)
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

    /// Reader limited to the current entry's payload.
    pub(crate) fn payload(&mut self, size: u64) -> io::Take<&mut R> {
        self.offset += size;
        (&mut self.inner).take(size)
    }
}

fn padded(size: u64) -> u64 {
    size.div_ceil(TAR_BLOCK as u64) * TAR_BLOCK as u64
}

fn verify_checksum(block: &[u8; TAR_BLOCK]) -> std::result::Result<(), String> {
    let stored = parse_ascii(&block[148..156], 8).ok_or("invalid checksum field")?;
    let mut unsigned: u64 = 0;
    let mut signed: i64 = 0;
    for (i, &b) in block.iter().enumerate() {
        let b = if (148..156).contains(&i) { b' ' } else { b };
        unsigned += u64::from(b);
        signed += i64::from(b as i8);
    }
    if stored == unsigned || i64::try_from(stored).is_ok_and(|s| s == signed) {
        Ok(())
    } else {
        Err(format!(
            "header checksum {:o} does not match computed {:o}",
            stored, unsigned
        ))
    }
}

impl Codec for TarCodec {
    fn info(&self) -> &CodecInfo {
        &INFO
    }

    fn size(&self, path: &Path) -> Result<u64> {
        let stream = InputStream::open(path)?;
        let mut reader = TarReader::new(stream, path, &self.limits);
        let mut total = 0u64;
        while let Some(header) = reader.next_entry()? {
            if header.is_regular() {
                total = total.saturating_add(header.size);
            }
            reader.skip_payload(header.size)?;
        }
        Ok(total)
    }

    fn copy(&self, ctx: &mut CopyContext<'_>, path: &Path, dest: &Path) -> Result<u64> {
        verify_source_md5(ctx, path)?;
        let stream = InputStream::open(path)?;
        let mut reader = TarReader::new(stream, path, &self.limits);
        let mut written = 0u64;
        let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();

        while let Some(header) = reader.next_entry()? {
            ctx.check_cancel()?;
            let out = resolve_entry_path(dest, &header.name)?;
            log::trace!("tar entry '{}' type {:?}", header.name, header.typeflag as char);

            match header.typeflag {
                b'0' | 0 | b'7' => {
                    let file = FileWrite::exact(&out, header.size)
                        .mode(header.mode)
                        .mtime(header.mtime);
                    let mut payload = reader.payload(header.size);
                    written += write_file(ctx, &mut payload, file, FORMAT, path)?;
                    reader.skip_padding(header.size)?;
                }
                b'1' => {
                    let target = resolve_entry_path(dest, &header.linkname)?;
                    let _ = fs::remove_file(&out);
                    match fs::hard_link(&target, &out) {
                        Ok(()) => {
                            ctx.record(InstalledFile::regular(&out, 0, None));
                        }
                        Err(e) => ctx.warn(&format!(
                            "Failed to link '{}' to '{}': {}",
                            out.display(),
                            target.display(),
                            e
                        )),
                    }
                    reader.skip_payload(header.size)?;
                }
                b'2' => {
                    self.limits.check_symlink_len(header.linkname.len() as u64)?;
                    write_symlink(ctx, &out, &header.name, &header.linkname)?;
                    reader.skip_payload(header.size)?;
                }
                b'5' => {
                    metadata::create_dir(&out, None)?;
                    dir_modes.push((out.clone(), header.mode));
                    ctx.record(InstalledFile::directory(&out));
                    reader.skip_payload(header.size)?;
                }
                b'3' | b'4' | b'6' => {
                    let kind = match header.typeflag {
                        b'3' => S_IFCHR,
                        b'4' => S_IFBLK,
                        _ => S_IFIFO,
                    };
                    let rdev = metadata::device_number(header.devmajor, header.devminor);
                    metadata::make_special(&out, kind | (header.mode & 0o7777), rdev);
                    ctx.record(InstalledFile::special(&out));
                    reader.skip_payload(header.size)?;
                }
                other => {
                    ctx.warn(&format!(
                        "Skipping '{}' with unsupported tar type '{}'",
                        header.name,
                        other.escape_ascii()
                    ));
                    reader.skip_payload(header.size)?;
                }
            }
        }

        for (dir, mode) in dir_modes.iter().rev() {
            metadata::apply_mode(dir, *mode);
        }
        Ok(written)
    }
}
