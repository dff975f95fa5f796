// Block collection: enumerate every compressed block of one image.
//
// Data blocks come from walking the inode table, fragment blocks from the
// fragment table, and the compressed metadata blocks of both tables are
// picked up by re-walking the chains raw. The result is one flat list of
// descriptors, hashed over the on-disk compressed bytes.

use log::debug;
use rayon::prelude::*;

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::hash::murmur3_32;
use crate::image::ImageFile;
use crate::squashfs::fragment::FragmentTableReader;
use crate::squashfs::inode::{InodeReader, InodeRecord};
use crate::squashfs::metadata::MetaBlockIter;
use crate::squashfs::superblock::Superblock;
use crate::squashfs::DATA_UNCOMPRESSED_BIT;

/// One compressed block: its on-disk span, its content hash, and (once the
/// expander has run) its decompressed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDesc {
    pub offset: u64,
    pub length: u32,
    pub uncompressed_length: u32,
    /// MurmurHash3 (seed 0) of the on-disk compressed bytes.
    pub hash: u32,
}

impl BlockDesc {
    fn new(offset: u64, length: u32) -> Self {
        Self {
            offset,
            length,
            uncompressed_length: 0,
            hash: 0,
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.length)
    }
}

/// Append descriptors for one regular file's block list.
///
/// The size words use the data-block encoding: zero is a sparse hole
/// (no descriptor, no offset advance), the uncompressed bit means the
/// payload is stored verbatim (advance only), anything else is a
/// compressed block.
fn push_file_blocks(
    data: &mut Vec<BlockDesc>,
    start_block: u64,
    block_sizes: &[u32],
    block_size: u32,
) -> Result<()> {
    let mut offset = start_block;
    for &word in block_sizes {
        if word == 0 {
            continue;
        }
        if word & DATA_UNCOMPRESSED_BIT != 0 {
            let stored = word & (DATA_UNCOMPRESSED_BIT - 1);
            if stored > block_size {
                return Err(Error::MalformedImage(format!(
                    "uncompressed data block of {stored} bytes exceeds block size {block_size}"
                )));
            }
            offset += u64::from(stored);
            continue;
        }
        if word > block_size {
            return Err(Error::MalformedImage(format!(
                "compressed data block of {word} bytes exceeds block size {block_size}"
            )));
        }
        data.push(BlockDesc::new(offset, word));
        offset += u64::from(word);
    }
    Ok(())
}

/// Hash the compressed metadata blocks of one table chain.
fn push_metadata_blocks(
    meta: &mut Vec<BlockDesc>,
    image: &ImageFile,
    table_offset: u64,
    block_count: usize,
) -> Result<()> {
    let mut iter = MetaBlockIter::new(image, table_offset);
    for _ in 0..block_count {
        let block = iter.next_block()?;
        if !block.compressed {
            continue;
        }
        let bytes = image.read_at(block.payload_offset, block.payload_len as usize)?;
        let mut desc = BlockDesc::new(block.payload_offset, u32::from(block.payload_len));
        desc.hash = murmur3_32(bytes, 0);
        meta.push(desc);
    }
    Ok(())
}

/// Sort the data list by offset, drop exact-offset duplicates (asserting
/// equal length), and verify the surviving spans are in bounds and
/// non-overlapping.
fn sort_and_dedup_offsets(data: &mut Vec<BlockDesc>, image_len: u64) -> Result<()> {
    data.sort_unstable_by_key(|d| d.offset);

    let mut retained: Vec<BlockDesc> = Vec::with_capacity(data.len());
    for desc in data.iter() {
        if let Some(prev) = retained.last() {
            if prev.offset == desc.offset {
                if prev.length != desc.length {
                    return Err(Error::MalformedImage(format!(
                        "blocks at offset {} disagree on length ({} vs {})",
                        desc.offset, prev.length, desc.length
                    )));
                }
                continue;
            }
            if desc.offset < prev.end() {
                return Err(Error::MalformedImage(format!(
                    "overlapping data blocks at offsets {} and {}",
                    prev.offset, desc.offset
                )));
            }
        }
        if desc.end() > image_len {
            return Err(Error::MalformedImage(format!(
                "data block at offset {} runs past end of image",
                desc.offset
            )));
        }
        retained.push(*desc);
    }
    *data = retained;
    Ok(())
}

/// Enumerate, deduplicate and hash every compressed block of `image`.
///
/// The returned list concatenates metadata and data descriptors; the
/// downstream stages do not care about provenance.
pub fn collect_blocks(
    image: &ImageFile,
    sb: &Superblock,
    codec: &mut Codec,
) -> Result<Vec<BlockDesc>> {
    let mut meta = Vec::new();
    let mut data = Vec::new();

    // Inode table: data-block descriptors, then the table's own blocks.
    let inode_blocks = {
        let mut reader = InodeReader::new(image, sb, codec);
        while let Some(record) = reader.next_inode()? {
            if let InodeRecord::Regular(file) = record {
                push_file_blocks(&mut data, file.start_block, &file.block_sizes, sb.block_size)?;
            }
        }
        reader.block_num()?
    };
    push_metadata_blocks(&mut meta, image, sb.inode_table_start, inode_blocks)?;

    // Fragment table, when the image has one.
    if sb.fragments > 0 {
        let (start_offset, fragment_blocks) = {
            let mut reader = FragmentTableReader::new(image, sb, codec)?;
            while let Some(entry) = reader.next_entry()? {
                if entry.size == 0 || entry.size & DATA_UNCOMPRESSED_BIT != 0 {
                    continue;
                }
                if entry.size > sb.block_size {
                    return Err(Error::MalformedImage(format!(
                        "fragment block of {} bytes exceeds block size {}",
                        entry.size, sb.block_size
                    )));
                }
                data.push(BlockDesc::new(entry.start_block, entry.size));
            }
            (reader.start_offset, reader.block_num()?)
        };
        push_metadata_blocks(&mut meta, image, start_offset, fragment_blocks)?;
    }

    sort_and_dedup_offsets(&mut data, image.len())?;

    // Hash the surviving data blocks over the mapped bytes. Ordering does
    // not matter here; the dedup stage re-sorts by (length, hash).
    let bytes = image.bytes();
    data.par_iter_mut().for_each(|d| {
        d.hash = murmur3_32(&bytes[d.offset as usize..d.end() as usize], 0);
    });

    debug!(
        "{}: collected {} metadata + {} data blocks",
        image.path().display(),
        meta.len(),
        data.len()
    );

    meta.extend(data);
    Ok(meta)
}
