//! UZ2 chunked-deflate codec.
//!
//! A UZ2 file is a sequence of independent records:
//!
//! ```text
//! [u32 LE compressed size][u32 LE uncompressed size][zlib stream]
//! ```
//!
//! Each record inflates to at most 32 KiB. Size fields beyond the format's
//! bounds are treated as corruption before anything is allocated. The
//! output file is the source name without its `.uz2` suffix.

use std::io::{self, Read};
use std::path::Path;

use flate2::{Decompress, FlushDecompress, Status};

use super::{Codec, CodecInfo, CopyContext, FileWrite, verify_source_md5, write_file};
use crate::format::reader::read_full;
use crate::safety::ResourceLimits;
use crate::stream::InputStream;
use crate::{Error, Result};

const FORMAT: &str = "uz2";

const INFO: CodecInfo = CodecInfo {
    name: "uz2",
    version: "1.0",
    author: "installkit",
    suffixes: &[".uz2"],
};

/// Largest uncompressed record.
pub(crate) const MAX_CHUNK: usize = 32768;

/// Largest compressed record: zlib's worst-case expansion of `MAX_CHUNK`.
pub(crate) const MAX_COMPRESSED_CHUNK: usize = 33096;

fn out_of_bounds(what: &'static str, size: u32, limit: usize) -> io::Error {
    log::error!("uz2 {} {} exceeds {}", what, size, limit);
    io::Error::other(Error::SizeOutOfBounds {
        what,
        size: u64::from(size),
        limit: limit as u64,
    })
}

fn corrupt(offset: u64, reason: impl Into<String>) -> io::Error {
    io::Error::other(Error::CorruptHeader {
        format: FORMAT,
        offset,
        reason: reason.into(),
    })
}

/// Reads one record header. `None` at a clean end of stream.
fn read_record_header<R: Read>(inner: &mut R) -> io::Result<Option<(u32, u32)>> {
    let mut header = [0u8; 8];
    match read_full(inner, &mut header)? {
        0 => Ok(None),
        8 => {
            let csize = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let ulen = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            if csize as usize > MAX_COMPRESSED_CHUNK {
                return Err(out_of_bounds("compressed chunk size", csize, MAX_COMPRESSED_CHUNK));
            }
            if ulen as usize > MAX_CHUNK {
                return Err(out_of_bounds("chunk size", ulen, MAX_CHUNK));
            }
            Ok(Some((csize, ulen)))
        }
        _ => Err(io::ErrorKind::UnexpectedEof.into()),
    }
}

/// Decoding reader over a UZ2 stream.
///
/// Errors specific to the format travel inside [`io::Error`] and are
/// recovered by [`Error::from_archive_io`].
pub(crate) struct Uz2Reader<R> {
    inner: R,
    inflater: Decompress,
    compressed: Vec<u8>,
    chunk: Vec<u8>,
    pos: usize,
    offset: u64,
}

impl<R: Read> Uz2Reader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            inflater: Decompress::new(true),
            compressed: Vec::with_capacity(MAX_COMPRESSED_CHUNK),
            chunk: Vec::with_capacity(MAX_CHUNK),
            pos: 0,
            offset: 0,
        }
    }

    /// Inflates the next record. Returns false at end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        let Some((csize, ulen)) = read_record_header(&mut self.inner)? else {
            return Ok(false);
        };
        let record_offset = self.offset;
        self.offset += 8 + u64::from(csize);

        self.compressed.resize(csize as usize, 0);
        self.inner.read_exact(&mut self.compressed)?;

        self.chunk.clear();
        self.chunk.resize(MAX_CHUNK, 0);
        self.inflater.reset(true);
        let status = self
            .inflater
            .decompress(&self.compressed, &mut self.chunk, FlushDecompress::Finish)
            .map_err(|e| corrupt(record_offset, format!("inflate failed: {}", e)))?;
        let produced = self.inflater.total_out() as usize;
        if status != Status::StreamEnd || produced != ulen as usize {
            return Err(corrupt(
                record_offset,
                format!("record inflated to {} bytes, header says {}", produced, ulen),
            ));
        }
        self.chunk.truncate(produced);
        self.pos = 0;
        Ok(true)
    }
}

impl<R: Read> Read for Uz2Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.chunk.len() {
            if !self.fill()? {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Output file name for a UZ2 source.
fn output_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_string_lossy();
    let stem = name.strip_suffix(".uz2").unwrap_or(&name);
    (!stem.is_empty()).then(|| stem.to_string())
}

/// UZ2 codec.
///
/// Record bounds are fixed by the format; the entry-size ceiling applies to
/// the whole decoded file.
#[derive(Debug, Clone, Default)]
pub struct Uz2Codec {
    limits: ResourceLimits,
}

impl Uz2Codec {
    /// Creates the codec with the given sanity ceilings.
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }
}

impl Codec for Uz2Codec {
    fn info(&self) -> &CodecInfo {
        &INFO
    }

    fn size(&self, path: &Path) -> Result<u64> {
        let mut stream = InputStream::open_raw(path)?;
        let mut total = 0u64;
        loop {
            let header = read_record_header(&mut stream)
                .map_err(|e| Error::from_archive_io(e, FORMAT, path))?;
            let Some((csize, ulen)) = header else {
                return Ok(total);
            };
            stream
                .skip(u64::from(csize))
                .map_err(|e| Error::from_archive_io(e, FORMAT, path))?;
            total += u64::from(ulen);
        }
    }

    fn copy(&self, ctx: &mut CopyContext<'_>, path: &Path, dest: &Path) -> Result<u64> {
        verify_source_md5(ctx, path)?;
        let name = output_name(path).ok_or_else(|| Error::InvalidFormat {
            format: FORMAT,
            reason: format!("no output name for '{}'", path.display()),
        })?;
        let total = self.size(path)?;
        self.limits.check_entry_size("uz2 output size", total)?;
        let out = dest.join(name);
        let mut reader = Uz2Reader::new(InputStream::open_raw(path)?);
        write_file(ctx, &mut reader, FileWrite::streamed(&out, total), FORMAT, path)
    }
}
