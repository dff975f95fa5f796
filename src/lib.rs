//! sqdelta: binary deltas between SquashFS 4.0 images.
//!
//! Diffing SquashFS images directly is hopeless: nearly all of their bulk
//! is compressed blocks, and compression destroys the byte-level locality
//! a delta encoder needs. This crate parses each image, enumerates every
//! compressed block (data blocks, inode-table and fragment-table metadata
//! blocks), drops the blocks the two images share, and writes "expanded"
//! images in which the remaining payloads appear decompressed. An external
//! diff tool then sees the real similarity, and the emitted patch carries
//! enough metadata to rebuild the exact original target image.
//!
//! The crate provides:
//! - SquashFS 4.0 parsing (`squashfs`)
//! - Codec resolution and block decompression (`codec`)
//! - The collection/dedup/expand/patch pipeline (`delta`)
//! - The CLI (`cli`)
//!
//! # Quick Start
//!
//! ```no_run
//! use sqdelta::delta::{create_patch, PatchOptions};
//! use std::path::Path;
//!
//! let stats = create_patch(
//!     Path::new("old.squashfs"),
//!     Path::new("new.squashfs"),
//!     Path::new("update.sqdelta"),
//!     &PatchOptions::default(),
//! )?;
//! println!("patch is {} bytes", stats.patch_size);
//! # Ok::<(), sqdelta::error::Error>(())
//! ```

pub mod cli;
pub mod codec;
pub mod delta;
pub mod error;
pub mod hash;
pub mod image;
pub mod squashfs;

pub use codec::Codec;
pub use delta::{create_patch, BlockDesc, PatchOptions, PatchStats};
pub use error::{Error, Result};
pub use image::ImageFile;
