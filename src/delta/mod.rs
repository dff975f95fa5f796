// Delta pipeline: per-image block collection, cross-image deduplication,
// expanded-image serialization, patch format, and the end-to-end driver.

pub mod collect;
pub mod dedup;
pub mod driver;
pub mod expand;
pub mod format;

pub use collect::{collect_blocks, BlockDesc};
pub use dedup::dedup_pair;
pub use driver::{create_patch, PatchOptions, PatchStats};
pub use format::{PatchHeader, PATCH_MAGIC};
