//! RPM lead and header structures.
//!
//! ```text
//! lead (96 bytes)
//! signature header, padded to 8 bytes
//! main header
//! payload (compressed CPIO)
//! ```
//!
//! A header is a 16-byte preamble (magic, reserved, index count, store
//! size), then `count` 16-byte index entries `(tag, type, offset, count)`
//! and the data store they point into. All integers are big-endian.

use std::io::Read;
use std::path::Path;

use crate::format::reader::{read_full, u32_be_at};
use crate::format::{RPM_HEADER_MAGIC, RPM_LEAD_LEN, RPM_LEAD_MAGIC};
use crate::safety::ResourceLimits;
use crate::{Error, Result};

const FORMAT: &str = "rpm";

pub(crate) const TAG_NAME: u32 = 1000;
pub(crate) const TAG_VERSION: u32 = 1001;
pub(crate) const TAG_RELEASE: u32 = 1002;
pub(crate) const TAG_SIZE: u32 = 1009;
pub(crate) const TAG_PREIN: u32 = 1023;
pub(crate) const TAG_POSTIN: u32 = 1024;
pub(crate) const TAG_PREUN: u32 = 1025;
pub(crate) const TAG_POSTUN: u32 = 1026;
pub(crate) const TAG_PREFIXES: u32 = 1098;
pub(crate) const TAG_PAYLOADCOMPRESSOR: u32 = 1125;
pub(crate) const TAG_LONGSIZE: u32 = 5009;

const TYPE_INT32: u32 = 4;
const TYPE_INT64: u32 = 5;
const TYPE_STRING: u32 = 6;
const TYPE_STRING_ARRAY: u32 = 8;
const TYPE_I18NSTRING: u32 = 9;

const INDEX_ENTRY_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexEntry {
    tag: u32,
    kind: u32,
    offset: u32,
    count: u32,
}

/// A parsed header: index plus data store.
#[derive(Debug, Clone, Default)]
pub(crate) struct Header {
    index: Vec<IndexEntry>,
    store: Vec<u8>,
}

impl Header {
    fn find(&self, tag: u32) -> Option<&IndexEntry> {
        self.index.iter().find(|e| e.tag == tag)
    }

    fn data(&self, entry: &IndexEntry) -> Option<&[u8]> {
        self.store.get(entry.offset as usize..)
    }

    /// All strings of a string-typed tag.
    pub(crate) fn strings(&self, tag: u32) -> Vec<String> {
        let Some(entry) = self.find(tag) else {
            return Vec::new();
        };
        if !matches!(entry.kind, TYPE_STRING | TYPE_STRING_ARRAY | TYPE_I18NSTRING) {
            return Vec::new();
        }
        let Some(data) = self.data(entry) else {
            return Vec::new();
        };
        let count = if entry.kind == TYPE_STRING { 1 } else { entry.count as usize };
        data.split(|&b| b == 0)
            .take(count)
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect()
    }

    /// First string of a string-typed tag.
    pub(crate) fn string(&self, tag: u32) -> Option<String> {
        self.strings(tag).into_iter().next()
    }

    /// First value of an integer tag.
    pub(crate) fn int(&self, tag: u32) -> Option<u64> {
        let entry = self.find(tag)?;
        let data = self.data(entry)?;
        match entry.kind {
            TYPE_INT32 if data.len() >= 4 => Some(u64::from(u32_be_at(data, 0))),
            TYPE_INT64 if data.len() >= 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&data[..8]);
                Some(u64::from_be_bytes(raw))
            }
            _ => None,
        }
    }
}

/// Tracks the stream offset for error reports.
pub(crate) struct HeaderReader<'a, R> {
    inner: &'a mut R,
    archive: &'a Path,
    limits: &'a ResourceLimits,
    offset: u64,
}

impl<'a, R: Read> HeaderReader<'a, R> {
    pub(crate) fn new(inner: &'a mut R, archive: &'a Path, limits: &'a ResourceLimits) -> Self {
        Self {
            inner,
            archive,
            limits,
            offset: 0,
        }
    }

    fn corrupt(&self, reason: impl Into<String>) -> Error {
        let reason = reason.into();
        log::error!("Corrupt rpm '{}': {}", self.archive.display(), reason);
        Error::CorruptHeader {
            format: FORMAT,
            offset: self.offset,
            reason,
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = read_full(self.inner, buf)?;
        if n < buf.len() {
            log::error!("rpm '{}' ends inside its headers", self.archive.display());
            return Err(Error::Truncated {
                format: FORMAT,
                path: self.archive.to_path_buf(),
            });
        }
        self.offset += n as u64;
        Ok(())
    }

    /// Reads and checks the lead.
    pub(crate) fn lead(&mut self) -> Result<()> {
        let mut lead = [0u8; RPM_LEAD_LEN];
        self.fill(&mut lead)?;
        if lead[..4] != RPM_LEAD_MAGIC {
            return Err(Error::InvalidFormat {
                format: FORMAT,
                reason: "missing lead magic".to_string(),
            });
        }
        Ok(())
    }

    /// Reads one header structure. `pad` aligns the end to 8 bytes.
    pub(crate) fn header(&mut self, pad: bool) -> Result<Header> {
        let mut preamble = [0u8; 16];
        self.fill(&mut preamble)?;
        if preamble[..4] != RPM_HEADER_MAGIC {
            return Err(self.corrupt("bad header magic"));
        }
        let count = u64::from(u32_be_at(&preamble, 8));
        let store_len = u64::from(u32_be_at(&preamble, 12));
        let total = count * INDEX_ENTRY_LEN as u64 + store_len;
        self.limits.check_header_size(total)?;

        let mut raw = vec![0u8; count as usize * INDEX_ENTRY_LEN];
        self.fill(&mut raw)?;
        let index = raw
            .chunks_exact(INDEX_ENTRY_LEN)
            .map(|e| IndexEntry {
                tag: u32_be_at(e, 0),
                kind: u32_be_at(e, 4),
                offset: u32_be_at(e, 8),
                count: u32_be_at(e, 12),
            })
            .collect::<Vec<_>>();
        if let Some(bad) = index.iter().find(|e| u64::from(e.offset) > store_len) {
            return Err(self.corrupt(format!("tag {} points past the data store", bad.tag)));
        }

        let mut store = vec![0u8; store_len as usize];
        self.fill(&mut store)?;

        if pad {
            let padding = (8 - (store_len % 8)) % 8;
            let mut skip = [0u8; 8];
            self.fill(&mut skip[..padding as usize])?;
        }
        Ok(Header { index, store })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds a header structure from `(tag, type, count, data)` entries.
    pub(crate) fn build_header(entries: &[(u32, u32, u32, Vec<u8>)]) -> Vec<u8> {
        let mut index = Vec::new();
        let mut store = Vec::new();
        for (tag, kind, count, data) in entries {
            if *kind == TYPE_INT32 {
                while store.len() % 4 != 0 {
                    store.push(0);
                }
            }
            index.extend_from_slice(&tag.to_be_bytes());
            index.extend_from_slice(&kind.to_be_bytes());
            index.extend_from_slice(&(store.len() as u32).to_be_bytes());
            index.extend_from_slice(&count.to_be_bytes());
            store.extend_from_slice(data);
        }
        let mut out = RPM_HEADER_MAGIC.to_vec();
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&((entries.len()) as u32).to_be_bytes());
        out.extend_from_slice(&(store.len() as u32).to_be_bytes());
        out.extend(index);
        out.extend(store);
        out
    }

    pub(crate) fn string(tag: u32, value: &str) -> (u32, u32, u32, Vec<u8>) {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        (tag, TYPE_STRING, 1, data)
    }

    pub(crate) fn int32(tag: u32, value: u32) -> (u32, u32, u32, Vec<u8>) {
        (tag, TYPE_INT32, 1, value.to_be_bytes().to_vec())
    }

    #[test]
    fn test_header_values() {
        let mut prefixes = b"/opt/app".to_vec();
        prefixes.push(0);
        prefixes.extend_from_slice(b"/etc\0");
        let raw = build_header(&[
            string(TAG_NAME, "hello"),
            int32(TAG_SIZE, 1234),
            (TAG_PREFIXES, TYPE_STRING_ARRAY, 2, prefixes),
        ]);
        let limits = ResourceLimits::default();
        let mut cursor = Cursor::new(raw);
        let header = HeaderReader::new(&mut cursor, Path::new("p.rpm"), &limits)
            .header(false)
            .unwrap();
        assert_eq!(header.string(TAG_NAME).as_deref(), Some("hello"));
        assert_eq!(header.int(TAG_SIZE), Some(1234));
        assert_eq!(header.strings(TAG_PREFIXES), vec!["/opt/app", "/etc"]);
        assert_eq!(header.string(TAG_VERSION), None);
        assert_eq!(header.int(TAG_NAME), None);
    }

    #[test]
    fn test_padding_is_consumed() {
        let mut raw = build_header(&[string(TAG_NAME, "abc")]);
        assert_eq!((raw.len() - 32) % 8, 4);
        raw.extend_from_slice(&[0; 4]);
        raw.extend_from_slice(b"NEXT");
        let limits = ResourceLimits::default();
        let mut cursor = Cursor::new(raw);
        HeaderReader::new(&mut cursor, Path::new("p.rpm"), &limits)
            .header(true)
            .unwrap();
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"NEXT");
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut raw = RPM_HEADER_MAGIC.to_vec();
        raw.extend_from_slice(&[0; 4]);
        raw.extend_from_slice(&u32::MAX.to_be_bytes());
        raw.extend_from_slice(&u32::MAX.to_be_bytes());
        let limits = ResourceLimits::default();
        let mut cursor = Cursor::new(raw);
        let err = HeaderReader::new(&mut cursor, Path::new("p.rpm"), &limits)
            .header(false)
            .unwrap_err();
        assert!(matches!(err, Error::SizeOutOfBounds { .. }));
    }

    #[test]
    fn test_bad_lead() {
        let mut cursor = Cursor::new(vec![0u8; RPM_LEAD_LEN]);
        let limits = ResourceLimits::default();
        let err = HeaderReader::new(&mut cursor, Path::new("p.rpm"), &limits)
            .lead()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { .. }));

        let mut cursor = Cursor::new(RPM_LEAD_MAGIC.to_vec());
        let err = HeaderReader::new(&mut cursor, Path::new("p.rpm"), &limits)
            .lead()
            .unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }
}
