//! Checksum computation utilities.
//!
//! - [`Crc32`]: IEEE CRC-32 as recorded in ZIP central directories.
//! - [`Md5`]: content hash compared against an option node's `md5sum`.
//! - [`ByteSum`]: the 32-bit wrapping byte sum used by the CPIO CRC variant.
//!
//! # Example
//!
//! ```rust
//! use installkit::checksum::{Checksum, Crc32, Md5};
//!
//! assert_eq!(Crc32::compute(b"Hello, World!"), 0xEC4AC3D0);
//! assert_eq!(Md5::hex(&Md5::compute(b"")), "d41d8cd98f00b204e9800998ecf8427e");
//! ```

use std::io::{self, Read};

use crate::READ_BUFFER_SIZE;

/// Common trait for checksum computation.
pub trait Checksum: Default + Clone {
    /// The output type of this checksum.
    type Output: Copy + Eq + std::fmt::Debug;

    /// Creates a new checksum calculator.
    fn new() -> Self;

    /// Updates the checksum with additional data.
    fn update(&mut self, data: &[u8]);

    /// Returns the checksum of everything seen so far.
    fn finalize(&self) -> Self::Output;

    /// Computes the checksum of a single slice in one call.
    fn compute(data: &[u8]) -> Self::Output {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Computes the checksum by reading from a reader.
    fn compute_reader<R: Read>(reader: &mut R) -> io::Result<Self::Output> {
        let mut hasher = Self::new();
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hasher.finalize())
    }
}

/// CRC-32 checksum calculator (IEEE 802.3 polynomial).
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("current", &self.hasher.clone().finalize())
            .finish()
    }
}

impl Checksum for Crc32 {
    type Output = u32;

    fn new() -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

/// MD5 content hash.
#[derive(Clone)]
pub struct Md5 {
    context: md5::Context,
}

impl Default for Md5 {
    fn default() -> Self {
        Self {
            context: md5::Context::new(),
        }
    }
}

impl std::fmt::Debug for Md5 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Md5").finish_non_exhaustive()
    }
}

impl Md5 {
    /// Formats a digest as lowercase hex, the form used by `md5sum`.
    pub fn hex(digest: &[u8; 16]) -> String {
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Returns the current digest as lowercase hex.
    pub fn finalize_hex(&self) -> String {
        Self::hex(&self.finalize())
    }

    /// Compares a computed digest against an expected hex string.
    ///
    /// Comparison ignores case and surrounding whitespace.
    pub fn matches(expected: &str, actual: &str) -> bool {
        expected.trim().eq_ignore_ascii_case(actual.trim())
    }
}

impl Checksum for Md5 {
    type Output = [u8; 16];

    fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn finalize(&self) -> [u8; 16] {
        self.context.clone().compute().0
    }
}

/// Wrapping 32-bit sum of all bytes (CPIO "new CRC" format).
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteSum {
    sum: u32,
}

impl Checksum for ByteSum {
    type Output = u32;

    fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.sum = self.sum.wrapping_add(b as u32);
        }
    }

    fn finalize(&self) -> u32 {
        self.sum
    }
}
