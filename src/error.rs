// Crate-wide error type.
//
// Every failure in the pipeline is fatal; the CLI prints one diagnostic
// line and exits 1. Variants map one-to-one onto the failure classes of
// the patch pipeline: I/O, superblock validation, image parsing, codec
// trouble, the external diff subprocess, and internal invariant breaks.

use std::io;
use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal error raised by any stage of the patch pipeline.
#[derive(Debug)]
pub enum Error {
    /// Low-level I/O failure, optionally tagged with the offending file.
    Io {
        path: Option<PathBuf>,
        source: io::Error,
    },
    /// The superblock magic is wrong (or the file is too short to hold one).
    NotASquashFs,
    /// The image is SquashFS, but not version 4.0.
    UnsupportedVersion { major: u16, minor: u16 },
    /// `block_size` disagrees with `block_log`, is out of range, or the two
    /// input images use different block sizes.
    BlockSizeMismatch { block_size: u32, block_log: u16 },
    /// The two input images use different compression algorithms.
    CodecMismatch { expected: u16, found: u16 },
    /// The compression identifier is unknown or not decodable by this build.
    UnsupportedCodec(u16),
    /// A structural invariant of the image was violated during parsing.
    MalformedImage(String),
    /// The codec reported failure, or its output exceeded the block size.
    Decompress(String),
    /// The external diff subprocess could not be launched or exited nonzero.
    DiffToolFailed(String),
    /// A post-condition of our own pipeline failed; indicates a bug here.
    InternalInvariant(&'static str),
    /// Any other error, tagged with the file it concerns.
    Context { path: PathBuf, source: Box<Error> },
}

impl Error {
    /// Tag an I/O error with the file it concerns.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: Some(path.into()),
            source,
        }
    }

    /// Attach the offending file, unless one is already recorded.
    pub fn at(self, path: impl Into<PathBuf>) -> Self {
        match self {
            e @ Self::Context { .. } => e,
            e @ Self::Io { path: Some(_), .. } => e,
            Self::Io { path: None, source } => Self::io(path, source),
            other => Self::Context {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, stripped of file context.
    pub fn root(&self) -> &Error {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io {
                path: Some(path),
                source,
            } => write!(f, "I/O error: {}: {source}", path.display()),
            Self::Io { path: None, source } => write!(f, "I/O error: {source}"),
            Self::NotASquashFs => write!(f, "not a SquashFS image (bad magic)"),
            Self::UnsupportedVersion { major, minor } => {
                write!(f, "SquashFS version {major}.{minor} found, only 4.0 is supported")
            }
            Self::BlockSizeMismatch {
                block_size,
                block_log,
            } => write!(
                f,
                "block size {block_size} (log {block_log}) is invalid or differs between images"
            ),
            Self::CodecMismatch { expected, found } => write!(
                f,
                "compression mismatch: source uses algorithm {expected}, target uses {found}"
            ),
            Self::UnsupportedCodec(id) => {
                write!(f, "unsupported compression algorithm (id {id})")
            }
            Self::MalformedImage(msg) => write!(f, "malformed image: {msg}"),
            Self::Decompress(msg) => write!(f, "decompression failed: {msg}"),
            Self::DiffToolFailed(msg) => write!(f, "diff tool failed: {msg}"),
            Self::InternalInvariant(msg) => write!(f, "internal invariant violated: {msg}"),
            Self::Context { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Context { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Self::Io { path: None, source }
    }
}
