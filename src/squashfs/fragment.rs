// Fragment table walker.
//
// The superblock points at an index: one u64 offset per 512-entry group,
// each locating a metadata block of 16-byte fragment entries. The groups
// are written back to back, so the walker streams the metadata chain from
// the first group's offset and exposes that offset for hashing.

use super::metadata::MetadataReader;
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::image::ImageFile;
use crate::squashfs::superblock::Superblock;

/// One fragment descriptor.
#[derive(Debug, Clone, Copy)]
pub struct FragmentEntry {
    /// Absolute offset of the fragment's data block.
    pub start_block: u64,
    /// 32-bit size word with the data-block uncompressed-bit encoding.
    pub size: u32,
}

pub struct FragmentTableReader<'a> {
    meta: MetadataReader<'a>,
    remaining: u32,
    /// Absolute offset of the first fragment metadata block.
    pub start_offset: u64,
}

impl<'a> FragmentTableReader<'a> {
    /// Follow the index at `fragment_table_start` to the first fragment
    /// metadata block. Must not be called with zero fragments; the
    /// collector skips the walk entirely in that case.
    pub fn new(image: &'a ImageFile, sb: &Superblock, codec: &'a mut Codec) -> Result<Self> {
        debug_assert!(sb.fragments > 0);
        let start_offset = u64::from_le_bytes(image.read_array::<8>(sb.fragment_table_start)?);
        if start_offset >= image.len() {
            return Err(Error::MalformedImage(format!(
                "fragment metadata offset {start_offset} past end of image"
            )));
        }
        Ok(Self {
            meta: MetadataReader::new(image, start_offset, codec),
            remaining: sb.fragments,
            start_offset,
        })
    }

    /// Read the next fragment entry, or `None` past the last one.
    pub fn next_entry(&mut self) -> Result<Option<FragmentEntry>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let start_block = self.meta.read_u64()?;
        let size = self.meta.read_u32()?;
        self.meta.skip(4)?; // unused
        Ok(Some(FragmentEntry { start_block, size }))
    }

    /// On-disk metadata blocks the fragment table occupied.
    pub fn block_num(&self) -> Result<usize> {
        self.meta.block_num()
    }
}
