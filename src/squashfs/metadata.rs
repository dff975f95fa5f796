// Metadata stream decoding.
//
// SquashFS stores the inode table and the fragment table as chains of
// length-prefixed, optionally compressed metadata blocks. `MetadataReader`
// presents the chain as one logical byte stream for the typed walkers;
// `MetaBlockIter` walks the same chain without decompressing, for hashing
// the compressed blocks.

use super::{METADATA_SIZE, METADATA_UNCOMPRESSED_BIT};
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::image::ImageFile;

/// Logical byte stream over a metadata block chain.
///
/// Records may straddle block boundaries; the reader pulls in the next
/// block transparently. `block_num` reports how many on-disk blocks the
/// stream consumed, which is how the collector knows which blocks belong
/// to the table it just walked.
pub struct MetadataReader<'a> {
    image: &'a ImageFile,
    codec: &'a mut Codec,
    /// On-disk offset of the next block header.
    pos: u64,
    buf: Vec<u8>,
    buf_pos: usize,
    blocks_read: usize,
}

impl<'a> MetadataReader<'a> {
    pub fn new(image: &'a ImageFile, offset: u64, codec: &'a mut Codec) -> Self {
        Self {
            image,
            codec,
            pos: offset,
            buf: Vec::with_capacity(2 * METADATA_SIZE),
            buf_pos: 0,
            blocks_read: 0,
        }
    }

    fn available(&self) -> usize {
        self.buf.len() - self.buf_pos
    }

    /// Pull one more on-disk block into the logical buffer.
    fn fill_block(&mut self) -> Result<()> {
        if self.buf_pos > 0 {
            self.buf.drain(..self.buf_pos);
            self.buf_pos = 0;
        }

        let header = next_block_header(self.image, self.pos)?;
        let payload = self
            .image
            .read_at(header.payload_offset, header.payload_len as usize)?;

        if header.compressed {
            let mut scratch = [0u8; METADATA_SIZE];
            let n = self.codec.decompress(payload, &mut scratch)?;
            self.buf.extend_from_slice(&scratch[..n]);
        } else {
            self.buf.extend_from_slice(payload);
        }

        self.pos = header.payload_offset + u64::from(header.payload_len);
        self.blocks_read += 1;
        Ok(())
    }

    fn ensure(&mut self, n: usize) -> Result<()> {
        while self.available() < n {
            self.fill_block()?;
        }
        Ok(())
    }

    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        self.ensure(out.len())?;
        out.copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + out.len()]);
        self.buf_pos += out.len();
        Ok(())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    /// Advance past `n` logical bytes without copying them out.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.buf_pos += n;
        Ok(())
    }

    /// Number of on-disk blocks consumed.
    ///
    /// The stream must end exactly at a block boundary once its table has
    /// been fully walked; logical bytes left over mean the image lied
    /// about its record counts.
    pub fn block_num(&self) -> Result<usize> {
        if self.available() > 0 {
            return Err(Error::MalformedImage(
                "metadata table ended mid-block".into(),
            ));
        }
        Ok(self.blocks_read)
    }
}

/// One metadata block located on disk, payload not decompressed.
#[derive(Debug, Clone, Copy)]
pub struct RawMetaBlock {
    /// Absolute offset of the payload (past the 2-byte size word).
    pub payload_offset: u64,
    pub payload_len: u16,
    pub compressed: bool,
}

fn next_block_header(image: &ImageFile, pos: u64) -> Result<RawMetaBlock> {
    let word = u16::from_le_bytes(image.read_array::<2>(pos)?);
    let payload_len = word & !METADATA_UNCOMPRESSED_BIT;
    let compressed = word & METADATA_UNCOMPRESSED_BIT == 0;

    if payload_len == 0 {
        return Err(Error::MalformedImage(format!(
            "zero-length metadata block at offset {pos}"
        )));
    }
    if payload_len as usize > METADATA_SIZE {
        return Err(Error::MalformedImage(format!(
            "metadata block of {payload_len} bytes at offset {pos} exceeds limit"
        )));
    }

    Ok(RawMetaBlock {
        payload_offset: pos + 2,
        payload_len,
        compressed,
    })
}

/// Walks metadata blocks on disk without decompressing them.
pub struct MetaBlockIter<'a> {
    image: &'a ImageFile,
    pos: u64,
}

impl<'a> MetaBlockIter<'a> {
    pub fn new(image: &'a ImageFile, offset: u64) -> Self {
        Self { image, pos: offset }
    }

    pub fn next_block(&mut self) -> Result<RawMetaBlock> {
        let header = next_block_header(self.image, self.pos)?;
        self.pos = header.payload_offset + u64::from(header.payload_len);
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn image_with(data: &[u8]) -> ImageFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(data).unwrap();
        tmp.flush().unwrap();
        let img = ImageFile::open(tmp.path()).unwrap();
        std::mem::forget(tmp);
        img
    }

    fn uncompressed_block(payload: &[u8]) -> Vec<u8> {
        let word = payload.len() as u16 | METADATA_UNCOMPRESSED_BIT;
        let mut out = word.to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    fn compressed_block(payload: &[u8]) -> Vec<u8> {
        let mut enc =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(payload).unwrap();
        let packed = enc.finish().unwrap();
        let mut out = (packed.len() as u16).to_le_bytes().to_vec();
        out.extend_from_slice(&packed);
        out
    }

    #[test]
    fn logical_stream_crosses_block_boundary() {
        let mut raw = uncompressed_block(&[1, 2, 3]);
        raw.extend(uncompressed_block(&[4, 5, 6, 7]));
        let img = image_with(&raw);
        let mut codec = Codec::resolve(crate::codec::ZLIB).unwrap();
        let mut reader = MetadataReader::new(&img, 0, &mut codec);

        let mut out = [0u8; 5];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5]);
        reader.skip(2).unwrap();
        assert_eq!(reader.block_num().unwrap(), 2);
    }

    #[test]
    fn decompresses_compressed_blocks() {
        let payload: Vec<u8> = (0u8..100).collect();
        let raw = compressed_block(&payload);
        let img = image_with(&raw);
        let mut codec = Codec::resolve(crate::codec::ZLIB).unwrap();
        let mut reader = MetadataReader::new(&img, 0, &mut codec);

        let mut out = vec![0u8; 100];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(out, payload);
        assert_eq!(reader.block_num().unwrap(), 1);
    }

    #[test]
    fn mid_block_end_is_malformed() {
        let raw = uncompressed_block(&[1, 2, 3, 4]);
        let img = image_with(&raw);
        let mut codec = Codec::resolve(crate::codec::ZLIB).unwrap();
        let mut reader = MetadataReader::new(&img, 0, &mut codec);
        reader.skip(2).unwrap();
        assert!(matches!(
            reader.block_num(),
            Err(Error::MalformedImage(_))
        ));
    }

    #[test]
    fn zero_length_block_is_malformed() {
        let raw = METADATA_UNCOMPRESSED_BIT.to_le_bytes().to_vec();
        let img = image_with(&raw);
        let mut codec = Codec::resolve(crate::codec::ZLIB).unwrap();
        let mut reader = MetadataReader::new(&img, 0, &mut codec);
        assert!(matches!(
            reader.read_u16(),
            Err(Error::MalformedImage(_))
        ));
    }

    #[test]
    fn raw_iter_reports_spans_without_decompressing() {
        let block0 = compressed_block(b"some inode bytes");
        let block1 = uncompressed_block(&[9, 9]);
        let mut raw = block0.clone();
        raw.extend(&block1);
        let img = image_with(&raw);

        let mut iter = MetaBlockIter::new(&img, 0);
        let b0 = iter.next_block().unwrap();
        assert!(b0.compressed);
        assert_eq!(b0.payload_offset, 2);
        assert_eq!(b0.payload_len as usize, block0.len() - 2);

        let b1 = iter.next_block().unwrap();
        assert!(!b1.compressed);
        assert_eq!(b1.payload_offset, block0.len() as u64 + 2);
        assert_eq!(b1.payload_len, 2);
    }

    #[test]
    fn truncated_stream_is_detected() {
        // Header promises 100 bytes, the file ends right after it.
        let word = 100u16 | METADATA_UNCOMPRESSED_BIT;
        let img = image_with(&word.to_le_bytes());
        let mut codec = Codec::resolve(crate::codec::ZLIB).unwrap();
        let mut reader = MetadataReader::new(&img, 0, &mut codec);
        assert!(matches!(
            reader.read_u16(),
            Err(Error::MalformedImage(_))
        ));
    }
}
