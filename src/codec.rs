// Codec registry: maps SquashFS compression identifiers to decompressors.
//
// Codecs form a closed tagged set; equality between the two input images
// is a tag comparison. One instance is created from the source superblock,
// reused for the target, and `reset` between the per-image runs.

use flate2::{Decompress as ZlibInflate, FlushDecompress, Status as ZlibStatus};
use xz2::stream::{Action, Status as XzStatus, Stream};

use crate::error::{Error, Result};

// SquashFS compression identifiers.
pub const ZLIB: u16 = 1;
pub const LZMA: u16 = 2;
pub const LZO: u16 = 3;
pub const XZ: u16 = 4;
pub const LZ4: u16 = 5;
pub const ZSTD: u16 = 6;

/// Decompressor for one SquashFS compression algorithm.
///
/// Holds whatever per-run scratch state the backing library wants to keep;
/// `reset` releases it between image runs.
pub enum Codec {
    Zlib { inflate: ZlibInflate },
    Xz { dict_size: Option<u32> },
    Lz4 { hc: bool },
    Zstd { ctx: Option<zstd::bulk::Decompressor<'static>> },
}

impl Codec {
    /// Resolve a superblock compression identifier to a codec.
    ///
    /// lzma and lzo are valid SquashFS identifiers that this build cannot
    /// decode; they fail the same way as an unknown identifier.
    pub fn resolve(id: u16) -> Result<Self> {
        match id {
            ZLIB => Ok(Self::Zlib {
                inflate: ZlibInflate::new(true),
            }),
            XZ => Ok(Self::Xz { dict_size: None }),
            LZ4 => Ok(Self::Lz4 { hc: false }),
            ZSTD => Ok(Self::Zstd { ctx: None }),
            other => Err(Error::UnsupportedCodec(other)),
        }
    }

    /// The identifier this codec was resolved from; echoed in the patch
    /// header.
    pub fn id(&self) -> u16 {
        match self {
            Self::Zlib { .. } => ZLIB,
            Self::Xz { .. } => XZ,
            Self::Lz4 { .. } => LZ4,
            Self::Zstd { .. } => ZSTD,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Zlib { .. } => "zlib",
            Self::Xz { .. } => "xz",
            Self::Lz4 { .. } => "lz4",
            Self::Zstd { .. } => "zstd",
        }
    }

    /// Consume the codec-options payload stored after the superblock.
    ///
    /// `options` is `Some` iff the superblock's compression-options flag
    /// was set. LZ4 images always carry options; for the other codecs the
    /// block is validated when present and otherwise defaults apply.
    pub fn configure(&mut self, options: Option<&[u8]>) -> Result<()> {
        match self {
            Self::Zlib { .. } => {
                if let Some(opts) = options {
                    if opts.len() < 8 {
                        return Err(Error::MalformedImage(
                            "zlib compression options too short".into(),
                        ));
                    }
                    let level = u32::from_le_bytes(opts[0..4].try_into().unwrap());
                    let window = u16::from_le_bytes(opts[4..6].try_into().unwrap());
                    if !(1..=9).contains(&level) || !(9..=15).contains(&window) {
                        return Err(Error::MalformedImage(format!(
                            "invalid zlib options: level {level}, window {window}"
                        )));
                    }
                }
                Ok(())
            }
            Self::Xz { dict_size } => {
                if let Some(opts) = options {
                    if opts.len() < 8 {
                        return Err(Error::MalformedImage(
                            "xz compression options too short".into(),
                        ));
                    }
                    *dict_size = Some(u32::from_le_bytes(opts[0..4].try_into().unwrap()));
                }
                Ok(())
            }
            Self::Lz4 { hc } => {
                let opts = options.ok_or_else(|| {
                    Error::MalformedImage("lz4 image without compression options".into())
                })?;
                if opts.len() < 8 {
                    return Err(Error::MalformedImage(
                        "lz4 compression options too short".into(),
                    ));
                }
                let version = u32::from_le_bytes(opts[0..4].try_into().unwrap());
                let flags = u32::from_le_bytes(opts[4..8].try_into().unwrap());
                if version != 1 {
                    return Err(Error::MalformedImage(format!(
                        "unsupported lz4 stream version {version}"
                    )));
                }
                if flags & !1 != 0 {
                    return Err(Error::MalformedImage(format!(
                        "unknown lz4 flags {flags:#x}"
                    )));
                }
                *hc = flags & 1 != 0;
                Ok(())
            }
            Self::Zstd { .. } => {
                if let Some(opts) = options {
                    if opts.len() < 4 {
                        return Err(Error::MalformedImage(
                            "zstd compression options too short".into(),
                        ));
                    }
                    let level = u32::from_le_bytes(opts[0..4].try_into().unwrap());
                    if !(1..=22).contains(&level) {
                        return Err(Error::MalformedImage(format!(
                            "invalid zstd compression level {level}"
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Decompress one on-disk block into `dst`, returning the produced
    /// size. Fails if the codec reports an error, the stream is truncated,
    /// or the output does not fit in `dst`.
    pub fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        match self {
            Self::Zlib { inflate } => {
                inflate.reset(true);
                let status = inflate
                    .decompress(src, dst, FlushDecompress::Finish)
                    .map_err(|e| Error::Decompress(format!("zlib: {e}")))?;
                match status {
                    ZlibStatus::StreamEnd => Ok(inflate.total_out() as usize),
                    _ => Err(Error::Decompress(
                        "zlib: truncated block or output larger than block size".into(),
                    )),
                }
            }
            Self::Xz { .. } => {
                let mut stream = Stream::new_stream_decoder(u64::MAX, 0)
                    .map_err(|e| Error::Decompress(format!("xz: {e}")))?;
                let status = stream
                    .process(src, dst, Action::Finish)
                    .map_err(|e| Error::Decompress(format!("xz: {e}")))?;
                match status {
                    XzStatus::StreamEnd => Ok(stream.total_out() as usize),
                    _ => Err(Error::Decompress(
                        "xz: truncated block or output larger than block size".into(),
                    )),
                }
            }
            Self::Lz4 { .. } => lz4_flex::block::decompress_into(src, dst)
                .map_err(|e| Error::Decompress(format!("lz4: {e}"))),
            Self::Zstd { ctx } => {
                if ctx.is_none() {
                    *ctx = Some(
                        zstd::bulk::Decompressor::new()
                            .map_err(|e| Error::Decompress(format!("zstd: {e}")))?,
                    );
                }
                ctx.as_mut()
                    .unwrap()
                    .decompress_to_buffer(src, dst)
                    .map_err(|e| Error::Decompress(format!("zstd: {e}")))
            }
        }
    }

    /// Release per-image scratch state; called between the two image runs.
    pub fn reset(&mut self) {
        match self {
            Self::Zlib { inflate } => inflate.reset(true),
            Self::Zstd { ctx } => *ctx = None,
            Self::Xz { .. } | Self::Lz4 { .. } => {}
        }
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Codec::{}", self.name())
    }
}
