//! Shared test utilities for integration tests.
//!
//! Archive builders for every built-in codec, producing bytes in memory.
//!
//! Note: `#![allow(dead_code)]` is required because each integration test file
//! compiles as a separate crate and may only use a subset of these helpers.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};

pub const TAR_BLOCK: usize = 512;

/// Gzip-compresses `data`.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Computes the MD5 of `data` as lowercase hex.
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Writes `data` to `dir/name`, creating parents, and returns the path.
pub fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, data).unwrap();
    path
}

// ---------------------------------------------------------------------------
// TAR
// ---------------------------------------------------------------------------

/// Builds ustar archives.
#[derive(Default)]
pub struct TarBuilder {
    data: Vec<u8>,
}

impl TarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn header(&mut self, name: &str, typeflag: u8, size: u64, mode: u32, linkname: &str) {
        let mut block = [0u8; TAR_BLOCK];
        block[..name.len()].copy_from_slice(name.as_bytes());
        block[100..107].copy_from_slice(format!("{:07o}", mode).as_bytes());
        block[108..115].copy_from_slice(b"0000000");
        block[116..123].copy_from_slice(b"0000000");
        block[124..135].copy_from_slice(format!("{:011o}", size).as_bytes());
        block[136..147].copy_from_slice(b"14000000000");
        block[156] = typeflag;
        block[157..157 + linkname.len()].copy_from_slice(linkname.as_bytes());
        block[257..263].copy_from_slice(b"ustar\0");
        block[263..265].copy_from_slice(b"00");
        block[148..156].copy_from_slice(b"        ");
        let sum: u32 = block.iter().map(|&b| u32::from(b)).sum();
        block[148..156].copy_from_slice(format!("{:06o}\0 ", sum).as_bytes());
        self.data.extend_from_slice(&block);
    }

    fn payload(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
        let pad = (TAR_BLOCK - data.len() % TAR_BLOCK) % TAR_BLOCK;
        self.data.extend(std::iter::repeat_n(0u8, pad));
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.header(name, b'0', data.len() as u64, 0o644, "");
        self.payload(data);
        self
    }

    pub fn file_mode(mut self, name: &str, data: &[u8], mode: u32) -> Self {
        self.header(name, b'0', data.len() as u64, mode, "");
        self.payload(data);
        self
    }

    pub fn dir(mut self, name: &str) -> Self {
        self.header(name, b'5', 0, 0o755, "");
        self
    }

    pub fn symlink(mut self, name: &str, target: &str) -> Self {
        self.header(name, b'2', 0, 0o777, target);
        self
    }

    pub fn hardlink(mut self, name: &str, target: &str) -> Self {
        self.header(name, b'1', 0, 0o644, target);
        self
    }

    /// An entry with an arbitrary type flag and payload.
    pub fn raw(mut self, name: &str, typeflag: u8, data: &[u8]) -> Self {
        self.header(name, typeflag, data.len() as u64, 0o644, "");
        self.payload(data);
        self
    }

    /// An entry header whose declared size is larger than the payload
    /// that follows; the archive ends right after `data`.
    pub fn truncated_file(mut self, name: &str, declared: u64, data: &[u8]) -> Vec<u8> {
        self.header(name, b'0', declared, 0o644, "");
        self.data.extend_from_slice(data);
        self.data
    }

    /// Appends the two zero records.
    pub fn finish(mut self) -> Vec<u8> {
        self.data.extend_from_slice(&[0u8; TAR_BLOCK * 2]);
        self.data
    }
}

// ---------------------------------------------------------------------------
// CPIO
// ---------------------------------------------------------------------------

/// CPIO header variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpioFormat {
    Odc,
    Newc,
    Crc,
}

/// Builds CPIO archives.
pub struct CpioBuilder {
    format: CpioFormat,
    data: Vec<u8>,
    ino: u32,
}

impl CpioBuilder {
    pub fn new(format: CpioFormat) -> Self {
        Self {
            format,
            data: Vec::new(),
            ino: 1,
        }
    }

    fn align(&mut self) {
        if self.format != CpioFormat::Odc {
            while self.data.len() % 4 != 0 {
                self.data.push(0);
            }
        }
    }

    /// Appends an entry with an explicit check field (newc/crc only).
    pub fn entry_with_check(mut self, name: &str, mode: u32, data: &[u8], check: u32) -> Self {
        let namesize = name.len() + 1;
        match self.format {
            CpioFormat::Odc => {
                let header = format!(
                    "070707{:06o}{:06o}{:06o}{:06o}{:06o}{:06o}{:06o}{:011o}{:06o}{:011o}",
                    0,
                    self.ino,
                    mode,
                    0,
                    0,
                    1,
                    0,
                    1_500_000_000u64,
                    namesize,
                    data.len()
                );
                self.data.extend_from_slice(header.as_bytes());
            }
            CpioFormat::Newc | CpioFormat::Crc => {
                let magic = if self.format == CpioFormat::Newc { "070701" } else { "070702" };
                let fields = [
                    self.ino,
                    mode,
                    0,
                    0,
                    1,
                    1_500_000_000,
                    data.len() as u32,
                    0,
                    0,
                    0,
                    0,
                    namesize as u32,
                    check,
                ];
                self.data.extend_from_slice(magic.as_bytes());
                for field in fields {
                    self.data.extend_from_slice(format!("{:08X}", field).as_bytes());
                }
            }
        }
        self.data.extend_from_slice(name.as_bytes());
        self.data.push(0);
        self.align();
        self.data.extend_from_slice(data);
        self.align();
        self.ino += 1;
        self
    }

    pub fn entry(self, name: &str, mode: u32, data: &[u8]) -> Self {
        let check = if self.format == CpioFormat::Crc {
            data.iter().fold(0u32, |sum, &b| sum.wrapping_add(u32::from(b)))
        } else {
            0
        };
        self.entry_with_check(name, mode, data, check)
    }

    pub fn file(self, name: &str, data: &[u8]) -> Self {
        self.entry(name, 0o100644, data)
    }

    pub fn dir(self, name: &str) -> Self {
        self.entry(name, 0o040755, b"")
    }

    pub fn symlink(self, name: &str, target: &str) -> Self {
        self.entry(name, 0o120777, target.as_bytes())
    }

    /// Appends the trailer.
    pub fn finish(self) -> Vec<u8> {
        self.entry_with_check("TRAILER!!!", 0, b"", 0).data
    }
}

// ---------------------------------------------------------------------------
// ZIP
// ---------------------------------------------------------------------------

struct ZipItem {
    name: String,
    method: u16,
    flags: u16,
    crc: u32,
    compressed: Vec<u8>,
    size: u32,
    external_attr: u32,
}

/// Builds ZIP archives with Unix host attributes.
#[derive(Default)]
pub struct ZipBuilder {
    items: Vec<ZipItem>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &str, data: &[u8], deflate: bool, mode: u32, flags: u16) -> Self {
        let compressed = if deflate {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).unwrap();
            encoder.finish().unwrap()
        } else {
            data.to_vec()
        };
        self.items.push(ZipItem {
            name: name.to_string(),
            method: if deflate { 8 } else { 0 },
            flags,
            crc: crc32fast::hash(data),
            compressed,
            size: data.len() as u32,
            external_attr: mode << 16,
        });
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, false, 0o100644, 0)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, true, 0o100644, 0)
    }

    pub fn executable(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, true, 0o100755, 0)
    }

    pub fn dir(self, name: &str) -> Self {
        self.push(name, b"", false, 0o040755, 0)
    }

    pub fn symlink(self, name: &str, target: &str) -> Self {
        self.push(name, target.as_bytes(), false, 0o120777, 0)
    }

    pub fn encrypted(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, false, 0o100644, 1)
    }

    /// Corrupts the recorded CRC of the last entry.
    pub fn bad_crc(mut self) -> Self {
        if let Some(item) = self.items.last_mut() {
            item.crc ^= 0xdead_beef;
        }
        self
    }

    /// Serializes the archive after `prefix` bytes (e.g. a self-extractor
    /// stub). Offsets in the directory are relative to the archive start.
    pub fn finish(self, prefix: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        let mut central = Vec::new();
        for item in &self.items {
            let offset = body.len() as u32;
            body.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
            body.extend_from_slice(&20u16.to_le_bytes());
            body.extend_from_slice(&item.flags.to_le_bytes());
            body.extend_from_slice(&item.method.to_le_bytes());
            body.extend_from_slice(&0u16.to_le_bytes());
            body.extend_from_slice(&0x2821u16.to_le_bytes());
            body.extend_from_slice(&item.crc.to_le_bytes());
            body.extend_from_slice(&(item.compressed.len() as u32).to_le_bytes());
            body.extend_from_slice(&item.size.to_le_bytes());
            body.extend_from_slice(&(item.name.len() as u16).to_le_bytes());
            body.extend_from_slice(&0u16.to_le_bytes());
            body.extend_from_slice(item.name.as_bytes());
            body.extend_from_slice(&item.compressed);

            central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
            central.extend_from_slice(&((3u16 << 8) | 20).to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&item.flags.to_le_bytes());
            central.extend_from_slice(&item.method.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0x2821u16.to_le_bytes());
            central.extend_from_slice(&item.crc.to_le_bytes());
            central.extend_from_slice(&(item.compressed.len() as u32).to_le_bytes());
            central.extend_from_slice(&item.size.to_le_bytes());
            central.extend_from_slice(&(item.name.len() as u16).to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&item.external_attr.to_le_bytes());
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(item.name.as_bytes());
        }

        let mut out = prefix.to_vec();
        out.extend_from_slice(&body);
        out.extend_from_slice(&central);
        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(self.items.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.items.len() as u16).to_le_bytes());
        out.extend_from_slice(&(central.len() as u32).to_le_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }
}

// ---------------------------------------------------------------------------
// UZ2
// ---------------------------------------------------------------------------

/// Encodes `data` as a sequence of zlib records of at most 32 KiB.
pub fn uz2(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in data.chunks(32768) {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(chunk).unwrap();
        let compressed = encoder.finish().unwrap();
        out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(&compressed);
    }
    out
}

// ---------------------------------------------------------------------------
// RPM
// ---------------------------------------------------------------------------

pub const RPMTAG_NAME: u32 = 1000;
pub const RPMTAG_VERSION: u32 = 1001;
pub const RPMTAG_RELEASE: u32 = 1002;
pub const RPMTAG_SIZE: u32 = 1009;
pub const RPMTAG_PREIN: u32 = 1023;
pub const RPMTAG_POSTIN: u32 = 1024;
pub const RPMTAG_PREUN: u32 = 1025;
pub const RPMTAG_POSTUN: u32 = 1026;
pub const RPMTAG_PREFIXES: u32 = 1098;

/// A header value.
pub enum RpmValue<'a> {
    Int32(u32),
    Str(&'a str),
    StrArray(&'a [&'a str]),
}

fn rpm_header(tags: &[(u32, RpmValue<'_>)]) -> Vec<u8> {
    let mut index = Vec::new();
    let mut store: Vec<u8> = Vec::new();
    for (tag, value) in tags {
        let (kind, count, data) = match value {
            RpmValue::Int32(v) => {
                while store.len() % 4 != 0 {
                    store.push(0);
                }
                (4u32, 1u32, v.to_be_bytes().to_vec())
            }
            RpmValue::Str(s) => {
                let mut data = s.as_bytes().to_vec();
                data.push(0);
                (6, 1, data)
            }
            RpmValue::StrArray(items) => {
                let mut data = Vec::new();
                for s in items.iter() {
                    data.extend_from_slice(s.as_bytes());
                    data.push(0);
                }
                (8, items.len() as u32, data)
            }
        };
        index.extend_from_slice(&tag.to_be_bytes());
        index.extend_from_slice(&kind.to_be_bytes());
        index.extend_from_slice(&(store.len() as u32).to_be_bytes());
        index.extend_from_slice(&count.to_be_bytes());
        store.extend_from_slice(&data);
    }
    let mut out = vec![0x8e, 0xad, 0xe8, 0x01, 0, 0, 0, 0];
    out.extend_from_slice(&(tags.len() as u32).to_be_bytes());
    out.extend_from_slice(&(store.len() as u32).to_be_bytes());
    out.extend(index);
    out.extend(store);
    out
}

/// Builds a package: lead, signature, main header and a gzip CPIO payload.
pub fn rpm_package(tags: &[(u32, RpmValue<'_>)], cpio: &[u8]) -> Vec<u8> {
    let mut out = vec![0xed, 0xab, 0xee, 0xdb];
    out.resize(96, 0);
    out.extend(rpm_header(&[(1000, RpmValue::Int32(0))]));
    while out.len() % 8 != 0 {
        out.push(0);
    }
    out.extend(rpm_header(tags));
    out.extend(gzip(cpio));
    out
}
