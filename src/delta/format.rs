// Patch envelope format.
//
// All integers defined by this format are big-endian, deliberately unlike
// the little-endian SquashFS payload it wraps. The same 16-byte header and
// 16-byte block records appear in two places: header-first in the patch
// file, trailer-style at the end of each expanded image.

use std::io::{self, Read, Write};

use super::collect::BlockDesc;

/// `"Sq"` followed by two non-ASCII bytes.
pub const PATCH_MAGIC: u32 = 0x5371_CEB4;

/// On-disk size of the header and of one block record.
pub const RECORD_SIZE: usize = 16;

/// Patch/expanded-image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchHeader {
    /// Reserved; written as zero.
    pub flags: u32,
    /// Compression identifier of the images the patch applies to.
    pub compression: u32,
    pub block_count: u32,
}

impl PatchHeader {
    pub fn new(compression: u16, block_count: u32) -> Self {
        Self {
            flags: 0,
            compression: u32::from(compression),
            block_count,
        }
    }

    /// Layout: magic, flags, compression, block_count; all u32 BE.
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&PATCH_MAGIC.to_be_bytes())?;
        w.write_all(&self.flags.to_be_bytes())?;
        w.write_all(&self.compression.to_be_bytes())?;
        w.write_all(&self.block_count.to_be_bytes())
    }

    pub fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; RECORD_SIZE];
        r.read_exact(&mut buf)?;
        let u32_at =
            |off: usize| u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
        if u32_at(0) != PATCH_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad patch magic {:#010x}", u32_at(0)),
            ));
        }
        Ok(Self {
            flags: u32_at(4),
            compression: u32_at(8),
            block_count: u32_at(12),
        })
    }
}

/// Layout: offset u64 BE, length u32 BE, uncompressed_length u32 BE.
pub fn write_block_record<W: Write>(w: &mut W, desc: &BlockDesc) -> io::Result<()> {
    w.write_all(&desc.offset.to_be_bytes())?;
    w.write_all(&desc.length.to_be_bytes())?;
    w.write_all(&desc.uncompressed_length.to_be_bytes())
}

pub fn read_block_record<R: Read>(r: &mut R) -> io::Result<BlockDesc> {
    let mut buf = [0u8; RECORD_SIZE];
    r.read_exact(&mut buf)?;
    Ok(BlockDesc {
        offset: u64::from_be_bytes(buf[0..8].try_into().unwrap()),
        length: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
        uncompressed_length: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
        hash: 0,
    })
}
