// Expanded-image serialization.
//
// An expanded image restores byte-level similarity for the diff tool:
// Region A mirrors the original with every compressed payload replaced by
// a sparse hole, Region B concatenates the decompressed payloads, and a
// trailing index records where everything came from.

use std::io::{self, Seek, SeekFrom, Write};

use super::collect::BlockDesc;
use super::format::{write_block_record, PatchHeader};
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::image::ImageFile;
use crate::squashfs::METADATA_SIZE;

/// Writer that can punch holes by seeking forward.
///
/// On a filesystem that supports sparse files the skipped ranges occupy no
/// storage; the apparent size still matches what was written plus the
/// holes.
pub struct SparseWriter<W: Write + Seek> {
    inner: W,
    position: u64,
}

impl<W: Write + Seek> SparseWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    /// Skip `len` bytes, leaving a hole.
    pub fn write_sparse(&mut self, len: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Current(len as i64))?;
        self.position += len;
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Seek> Write for SparseWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn check_walkable(blocks: &[BlockDesc], image_len: u64) -> Result<()> {
    let mut cursor = 0u64;
    for b in blocks {
        if b.length == 0 {
            return Err(Error::InternalInvariant("zero-length block descriptor"));
        }
        if b.offset < cursor {
            return Err(Error::InternalInvariant(
                "block list is not sorted and non-overlapping",
            ));
        }
        if b.end() > image_len {
            return Err(Error::InternalInvariant("block descriptor past end of image"));
        }
        cursor = b.end();
    }
    Ok(())
}

/// Write the expanded form of `image` to `out` and fill in each block's
/// `uncompressed_length`.
///
/// Blocks are re-sorted by offset; the list must be the collector's output
/// (in-bounds, non-overlapping) or the call fails with
/// `InternalInvariant`.
pub fn write_expanded<W: Write + Seek>(
    image: &ImageFile,
    blocks: &mut [BlockDesc],
    codec: &mut Codec,
    block_size: u32,
    out: W,
) -> Result<W> {
    blocks.sort_unstable_by_key(|d| d.offset);
    check_walkable(blocks, image.len())?;

    let bytes = image.bytes();
    let mut out = SparseWriter::new(out);

    // Region A: passthrough with holes over the compressed payloads.
    let mut cursor = 0usize;
    for b in blocks.iter() {
        out.write_all(&bytes[cursor..b.offset as usize])?;
        out.write_sparse(u64::from(b.length))?;
        cursor = b.end() as usize;
    }
    out.write_all(&bytes[cursor..])?;

    // Region B: the decompressed payloads, back to back.
    let mut scratch = vec![0u8; (block_size as usize).max(METADATA_SIZE)];
    for b in blocks.iter_mut() {
        let src = &bytes[b.offset as usize..b.end() as usize];
        let n = codec.decompress(src, &mut scratch)?;
        out.write_all(&scratch[..n])?;
        b.uncompressed_length = n as u32;
    }

    // Trailing index: one record per block, then the header.
    for b in blocks.iter() {
        write_block_record(&mut out, b)?;
    }
    PatchHeader::new(codec.id(), blocks.len() as u32).encode(&mut out)?;

    out.flush()?;
    Ok(out.into_inner())
}
