// Hand-crafted SquashFS 4.0 images for the integration tests.
//
// The builder emits just enough of the format for the delta pipeline:
// superblock, zlib data blocks, an inode table of basic regular files,
// and an optional fragment table. Directory contents, id tables and the
// like are irrelevant to block collection and are left out.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

pub const BLOCK_SIZE: usize = 4096;
pub const METADATA_UNCOMPRESSED_BIT: u16 = 1 << 15;
pub const DATA_UNCOMPRESSED_BIT: u32 = 1 << 24;
pub const INVALID_FRAG: u32 = 0xffff_ffff;

/// One data block of a test file, by logical content.
pub enum TestBlock {
    /// zlib-compressed on disk.
    Compressed(Vec<u8>),
    /// zlib-compressed, zero-padded to a fixed on-disk size. Pinning the
    /// on-disk size keeps the inode block lists identical across images
    /// whose logical content differs.
    CompressedPadded(Vec<u8>, usize),
    /// Stored verbatim on disk.
    Stored(Vec<u8>),
    /// A hole: logically this many zero bytes, nothing on disk.
    Sparse(usize),
}

impl TestBlock {
    fn logical_len(&self) -> usize {
        match self {
            Self::Compressed(c) | Self::CompressedPadded(c, _) | Self::Stored(c) => c.len(),
            Self::Sparse(n) => *n,
        }
    }
}

pub struct TestFile {
    pub blocks: Vec<TestBlock>,
    /// Tail content stored in a fragment instead of a final partial block.
    /// All listed blocks must then be exactly BLOCK_SIZE long.
    pub fragment: Option<Vec<u8>>,
}

pub struct ImageSpec {
    pub files: Vec<TestFile>,
    pub compress_inode_table: bool,
    pub compress_fragment_table: bool,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            compress_inode_table: true,
            compress_fragment_table: true,
        }
    }
}

pub fn zlib_pack(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn push_metadata_block(image: &mut Vec<u8>, payload: &[u8], compressed: bool) {
    assert!(!payload.is_empty() && payload.len() <= 8192);
    if compressed {
        let packed = zlib_pack(payload);
        image.extend_from_slice(&(packed.len() as u16).to_le_bytes());
        image.extend_from_slice(&packed);
    } else {
        let word = payload.len() as u16 | METADATA_UNCOMPRESSED_BIT;
        image.extend_from_slice(&word.to_le_bytes());
        image.extend_from_slice(payload);
    }
}

struct FileLayout {
    start_block: u64,
    size_words: Vec<u32>,
    file_size: u32,
    fragment: u32,
}

pub fn build_image(spec: &ImageSpec) -> Vec<u8> {
    let mut image = vec![0u8; 96];

    // Data area: file blocks in file order, then fragment blocks.
    let mut layouts = Vec::new();
    let mut tails: Vec<&[u8]> = Vec::new();
    for file in &spec.files {
        let start_block = image.len() as u64;
        let mut size_words = Vec::new();
        let mut file_size = 0usize;

        for block in &file.blocks {
            file_size += block.logical_len();
            match block {
                TestBlock::Compressed(content) => {
                    let packed = zlib_pack(content);
                    assert!(packed.len() <= BLOCK_SIZE);
                    size_words.push(packed.len() as u32);
                    image.extend_from_slice(&packed);
                }
                TestBlock::CompressedPadded(content, disk_len) => {
                    let mut packed = zlib_pack(content);
                    assert!(packed.len() <= *disk_len && *disk_len <= BLOCK_SIZE);
                    packed.resize(*disk_len, 0);
                    size_words.push(packed.len() as u32);
                    image.extend_from_slice(&packed);
                }
                TestBlock::Stored(content) => {
                    size_words.push(DATA_UNCOMPRESSED_BIT | content.len() as u32);
                    image.extend_from_slice(content);
                }
                TestBlock::Sparse(_) => size_words.push(0),
            }
        }

        let fragment = match &file.fragment {
            Some(tail) => {
                assert!(tail.len() < BLOCK_SIZE);
                file_size += tail.len();
                tails.push(tail);
                (tails.len() - 1) as u32
            }
            None => INVALID_FRAG,
        };

        layouts.push(FileLayout {
            start_block,
            size_words,
            file_size: file_size as u32,
            fragment,
        });
    }

    let mut fragment_entries = Vec::new();
    for tail in &tails {
        let packed = zlib_pack(tail);
        fragment_entries.push((image.len() as u64, packed.len() as u32));
        image.extend_from_slice(&packed);
    }

    // Inode table: basic regular-file inodes.
    let inode_table_start = image.len() as u64;
    let mut inodes = Vec::new();
    for (i, layout) in layouts.iter().enumerate() {
        inodes.extend_from_slice(&2u16.to_le_bytes()); // basic regular
        inodes.extend_from_slice(&0o644u16.to_le_bytes());
        inodes.extend_from_slice(&0u16.to_le_bytes()); // uid
        inodes.extend_from_slice(&0u16.to_le_bytes()); // gid
        inodes.extend_from_slice(&0u32.to_le_bytes()); // mtime
        inodes.extend_from_slice(&(i as u32 + 1).to_le_bytes());

        inodes.extend_from_slice(&(layout.start_block as u32).to_le_bytes());
        inodes.extend_from_slice(&layout.fragment.to_le_bytes());
        inodes.extend_from_slice(&0u32.to_le_bytes()); // offset in fragment
        inodes.extend_from_slice(&layout.file_size.to_le_bytes());
        for word in &layout.size_words {
            inodes.extend_from_slice(&word.to_le_bytes());
        }
    }
    push_metadata_block(&mut image, &inodes, spec.compress_inode_table);
    let directory_table_start = image.len() as u64;

    // Fragment table: entry block, then the one-slot index.
    let fragment_table_start;
    if fragment_entries.is_empty() {
        fragment_table_start = image.len() as u64;
    } else {
        let frag_meta_start = image.len() as u64;
        let mut entries = Vec::new();
        for &(start, size) in &fragment_entries {
            entries.extend_from_slice(&start.to_le_bytes());
            entries.extend_from_slice(&size.to_le_bytes());
            entries.extend_from_slice(&0u32.to_le_bytes());
        }
        push_metadata_block(&mut image, &entries, spec.compress_fragment_table);
        fragment_table_start = image.len() as u64;
        image.extend_from_slice(&frag_meta_start.to_le_bytes());
    }

    // Superblock.
    let len = image.len() as u64;
    let sb = &mut image[0..96];
    sb[0..4].copy_from_slice(&0x7371_7368u32.to_le_bytes());
    sb[4..8].copy_from_slice(&(spec.files.len() as u32).to_le_bytes());
    sb[8..12].copy_from_slice(&0u32.to_le_bytes()); // mkfs_time
    sb[12..16].copy_from_slice(&(BLOCK_SIZE as u32).to_le_bytes());
    sb[16..20].copy_from_slice(&(fragment_entries.len() as u32).to_le_bytes());
    sb[20..22].copy_from_slice(&1u16.to_le_bytes()); // zlib
    sb[22..24].copy_from_slice(&12u16.to_le_bytes()); // block_log
    sb[24..26].copy_from_slice(&0x0200u16.to_le_bytes()); // no xattrs
    sb[26..28].copy_from_slice(&0u16.to_le_bytes()); // no_ids
    sb[28..30].copy_from_slice(&4u16.to_le_bytes());
    sb[30..32].copy_from_slice(&0u16.to_le_bytes());
    sb[32..40].copy_from_slice(&0u64.to_le_bytes()); // root inode
    sb[40..48].copy_from_slice(&len.to_le_bytes()); // bytes_used
    sb[48..56].copy_from_slice(&len.to_le_bytes()); // id table
    sb[56..64].copy_from_slice(&u64::MAX.to_le_bytes()); // xattr table
    sb[64..72].copy_from_slice(&inode_table_start.to_le_bytes());
    sb[72..80].copy_from_slice(&directory_table_start.to_le_bytes());
    sb[80..88].copy_from_slice(&fragment_table_start.to_le_bytes());
    sb[88..96].copy_from_slice(&u64::MAX.to_le_bytes()); // export table

    image
}

/// Deterministic incompressible bytes; zlib falls back to stored deflate
/// blocks for these, so a one-byte flip keeps the compressed size stable.
pub fn noise(len: usize, mut seed: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        out.push((seed >> 33) as u8);
    }
    out
}

pub fn write_image(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
