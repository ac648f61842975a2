//! Magic numbers and low-level field parsing shared by the archive codecs.

pub mod reader;

/// TAR record size.
pub const TAR_BLOCK: usize = 512;

/// CPIO magic for the portable (old ASCII octal) header.
pub const CPIO_MAGIC_ODC: &[u8; 6] = b"070707";
/// CPIO magic for the new ASCII hex header.
pub const CPIO_MAGIC_NEWC: &[u8; 6] = b"070701";
/// CPIO magic for the new ASCII hex header with payload checksum.
pub const CPIO_MAGIC_CRC: &[u8; 6] = b"070702";
/// Name of the entry that ends a CPIO stream.
pub const CPIO_TRAILER: &str = "TRAILER!!!";

/// ZIP local file header signature.
pub const ZIP_LOCAL_SIG: u32 = 0x0403_4b50;
/// ZIP central directory record signature.
pub const ZIP_CENTRAL_SIG: u32 = 0x0201_4b50;
/// ZIP end of central directory signature.
pub const ZIP_EOCD_SIG: u32 = 0x0605_4b50;
/// Fixed size of the end of central directory record.
pub const ZIP_EOCD_LEN: usize = 22;
/// Longest archive comment a ZIP file can carry.
pub const ZIP_MAX_COMMENT: usize = 65_535;

/// RPM lead magic.
pub const RPM_LEAD_MAGIC: [u8; 4] = [0xed, 0xab, 0xee, 0xdb];
/// RPM header structure magic (with version byte).
pub const RPM_HEADER_MAGIC: [u8; 4] = [0x8e, 0xad, 0xe8, 0x01];
/// Size of the RPM lead.
pub const RPM_LEAD_LEN: usize = 96;
