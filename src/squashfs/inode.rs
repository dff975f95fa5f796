// Inode table walker.
//
// Decodes `sb.inodes` consecutive inodes from the metadata stream rooted
// at `inode_table_start`. Only regular-file variants carry data-block
// lists; every other variant is length-decoded so the stream cursor keeps
// advancing correctly.

use super::metadata::MetadataReader;
use super::INVALID_FRAG;
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::image::ImageFile;
use crate::squashfs::superblock::Superblock;

pub const BASIC_DIR: u16 = 1;
pub const BASIC_REG: u16 = 2;
pub const BASIC_SYMLINK: u16 = 3;
pub const BASIC_BLOCKDEV: u16 = 4;
pub const BASIC_CHARDEV: u16 = 5;
pub const BASIC_FIFO: u16 = 6;
pub const BASIC_SOCKET: u16 = 7;
pub const EXT_DIR: u16 = 8;
pub const EXT_REG: u16 = 9;
pub const EXT_SYMLINK: u16 = 10;
pub const EXT_BLOCKDEV: u16 = 11;
pub const EXT_CHARDEV: u16 = 12;
pub const EXT_FIFO: u16 = 13;
pub const EXT_SOCKET: u16 = 14;

/// Data-block information extracted from a regular-file inode.
#[derive(Debug, Clone)]
pub struct RegularFile {
    /// Absolute offset of the file's first data block.
    pub start_block: u64,
    /// Raw 32-bit size words from the inode's block list, in file order.
    pub block_sizes: Vec<u32>,
    /// Whether the file's tail lives in a fragment.
    pub has_fragment: bool,
}

/// One decoded inode: either a regular file or something we only had to
/// skip over.
#[derive(Debug, Clone)]
pub enum InodeRecord {
    Regular(RegularFile),
    Other(u16),
}

pub struct InodeReader<'a> {
    meta: MetadataReader<'a>,
    remaining: u32,
    block_size: u32,
    block_log: u16,
}

impl<'a> InodeReader<'a> {
    pub fn new(image: &'a ImageFile, sb: &Superblock, codec: &'a mut Codec) -> Self {
        Self {
            meta: MetadataReader::new(image, sb.inode_table_start, codec),
            remaining: sb.inodes,
            block_size: sb.block_size,
            block_log: sb.block_log,
        }
    }

    /// Decode the next inode, or `None` once all declared inodes are read.
    pub fn next_inode(&mut self) -> Result<Option<InodeRecord>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let inode_type = self.meta.read_u16()?;
        // mode, uid, gid, mtime, inode_number
        self.meta.skip(14)?;

        let record = match inode_type {
            BASIC_REG => InodeRecord::Regular(self.read_basic_reg()?),
            EXT_REG => InodeRecord::Regular(self.read_ext_reg()?),
            BASIC_DIR => {
                // start_block, nlink, file_size, offset, parent
                self.meta.skip(16)?;
                InodeRecord::Other(inode_type)
            }
            EXT_DIR => {
                self.read_ext_dir_tail()?;
                InodeRecord::Other(inode_type)
            }
            BASIC_SYMLINK | EXT_SYMLINK => {
                self.meta.skip(4)?; // nlink
                let target_size = self.meta.read_u32()? as usize;
                self.meta.skip(target_size)?;
                if inode_type == EXT_SYMLINK {
                    self.meta.skip(4)?; // xattr id
                }
                InodeRecord::Other(inode_type)
            }
            BASIC_BLOCKDEV | BASIC_CHARDEV => {
                self.meta.skip(8)?; // nlink, rdev
                InodeRecord::Other(inode_type)
            }
            EXT_BLOCKDEV | EXT_CHARDEV => {
                self.meta.skip(12)?; // nlink, rdev, xattr
                InodeRecord::Other(inode_type)
            }
            BASIC_FIFO | BASIC_SOCKET => {
                self.meta.skip(4)?; // nlink
                InodeRecord::Other(inode_type)
            }
            EXT_FIFO | EXT_SOCKET => {
                self.meta.skip(8)?; // nlink, xattr
                InodeRecord::Other(inode_type)
            }
            other => {
                return Err(Error::MalformedImage(format!(
                    "invalid inode type {other}"
                )))
            }
        };

        Ok(Some(record))
    }

    /// Blocks present in the inode's block list.
    ///
    /// A fragment tail means the trailing partial block lives in the
    /// fragment table instead, so the list is not rounded up.
    fn block_count(&self, file_size: u64, has_fragment: bool) -> u64 {
        if has_fragment {
            file_size >> self.block_log
        } else {
            (file_size + u64::from(self.block_size) - 1) >> self.block_log
        }
    }

    fn read_block_list(&mut self, count: u64) -> Result<Vec<u32>> {
        let mut sizes = Vec::new();
        for _ in 0..count {
            sizes.push(self.meta.read_u32()?);
        }
        Ok(sizes)
    }

    fn read_basic_reg(&mut self) -> Result<RegularFile> {
        let start_block = u64::from(self.meta.read_u32()?);
        let fragment = self.meta.read_u32()?;
        self.meta.skip(4)?; // offset within fragment
        let file_size = u64::from(self.meta.read_u32()?);

        let has_fragment = fragment != INVALID_FRAG;
        let count = self.block_count(file_size, has_fragment);
        Ok(RegularFile {
            start_block,
            block_sizes: self.read_block_list(count)?,
            has_fragment,
        })
    }

    fn read_ext_reg(&mut self) -> Result<RegularFile> {
        let start_block = self.meta.read_u64()?;
        let file_size = self.meta.read_u64()?;
        self.meta.skip(8)?; // sparse byte count
        self.meta.skip(4)?; // nlink
        let fragment = self.meta.read_u32()?;
        self.meta.skip(4)?; // offset within fragment
        self.meta.skip(4)?; // xattr id

        let has_fragment = fragment != INVALID_FRAG;
        let count = self.block_count(file_size, has_fragment);
        Ok(RegularFile {
            start_block,
            block_sizes: self.read_block_list(count)?,
            has_fragment,
        })
    }

    fn read_ext_dir_tail(&mut self) -> Result<()> {
        self.meta.skip(4)?; // nlink
        self.meta.skip(4)?; // file_size
        self.meta.skip(4)?; // start_block
        self.meta.skip(4)?; // parent inode
        let index_count = self.meta.read_u16()?;
        self.meta.skip(2)?; // offset
        self.meta.skip(4)?; // xattr id

        for _ in 0..index_count {
            self.meta.skip(8)?; // index, start_block
            let name_size = self.meta.read_u32()? as usize;
            // stored size is length - 1
            self.meta.skip(name_size + 1)?;
        }
        Ok(())
    }

    /// On-disk metadata blocks the inode table occupied.
    pub fn block_num(&self) -> Result<usize> {
        self.meta.block_num()
    }
}
