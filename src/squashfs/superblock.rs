// Superblock parsing and validation.

use bitflags::bitflags;

use super::{MAGIC, SUPERBLOCK_SIZE};
use crate::error::{Error, Result};
use crate::image::ImageFile;

bitflags! {
    /// Superblock flags bitset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u16 {
        const INODES_UNCOMPRESSED = 0x0001;
        const DATA_UNCOMPRESSED = 0x0002;
        const FRAGMENTS_UNCOMPRESSED = 0x0008;
        const FRAGMENTS_UNUSED = 0x0010;
        const FRAGMENTS_ALWAYS = 0x0020;
        const DUPLICATES_REMOVED = 0x0040;
        const EXPORT_TABLE = 0x0080;
        const XATTRS_UNCOMPRESSED = 0x0100;
        const NO_XATTRS = 0x0200;
        const COMPRESSOR_OPTIONS = 0x0400;
        const ID_TABLE_UNCOMPRESSED = 0x0800;
    }
}

/// Parsed and validated SquashFS 4.0 superblock.
///
/// Only the fields the delta pipeline consumes are retained; the directory,
/// id, xattr and export table offsets play no role here.
#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub inodes: u32,
    pub block_size: u32,
    pub fragments: u32,
    pub compression: u16,
    pub block_log: u16,
    pub flags: Flags,
    pub inode_table_start: u64,
    pub fragment_table_start: u64,
}

impl Superblock {
    /// Parse the superblock at offset 0 and check every invariant the rest
    /// of the pipeline relies on.
    pub fn parse(image: &ImageFile) -> Result<Self> {
        if (image.len() as usize) < SUPERBLOCK_SIZE {
            return Err(Error::NotASquashFs);
        }
        let raw: [u8; SUPERBLOCK_SIZE] = image.read_array(0)?;

        let u16_at = |off: usize| u16::from_le_bytes(raw[off..off + 2].try_into().unwrap());
        let u32_at = |off: usize| u32::from_le_bytes(raw[off..off + 4].try_into().unwrap());
        let u64_at = |off: usize| u64::from_le_bytes(raw[off..off + 8].try_into().unwrap());

        if u32_at(0) != MAGIC {
            return Err(Error::NotASquashFs);
        }

        let major = u16_at(28);
        let minor = u16_at(30);
        if (major, minor) != (4, 0) {
            return Err(Error::UnsupportedVersion { major, minor });
        }

        let block_size = u32_at(12);
        let block_log = u16_at(22);
        let log_matches = block_log < 32 && 1u32 << block_log == block_size;
        if !log_matches || !(4096..=1 << 20).contains(&block_size) {
            return Err(Error::BlockSizeMismatch {
                block_size,
                block_log,
            });
        }

        let sb = Self {
            inodes: u32_at(4),
            block_size,
            fragments: u32_at(16),
            compression: u16_at(20),
            block_log,
            flags: Flags::from_bits_retain(u16_at(24)),
            inode_table_start: u64_at(64),
            fragment_table_start: u64_at(80),
        };

        if sb.inode_table_start >= image.len() {
            return Err(Error::MalformedImage(format!(
                "inode table offset {} past end of image",
                sb.inode_table_start
            )));
        }
        if sb.fragments > 0 && sb.fragment_table_start >= image.len() {
            return Err(Error::MalformedImage(format!(
                "fragment table offset {} past end of image",
                sb.fragment_table_start
            )));
        }

        Ok(sb)
    }

    pub fn has_compressor_options(&self) -> bool {
        self.flags.contains(Flags::COMPRESSOR_OPTIONS)
    }
}
