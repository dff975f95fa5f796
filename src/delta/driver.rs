// End-to-end patch creation.
//
// Composes the per-image stages for source and target, removes the blocks
// the two images share, writes the two expanded temporaries, emits the
// patch header + source index, and hands the expanded pair to the external
// diff tool with its stdout appended to the patch file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info};
use tempfile::NamedTempFile;

use super::collect::{collect_blocks, BlockDesc};
use super::dedup::dedup_pair;
use super::expand::write_expanded;
use super::format::{write_block_record, PatchHeader};
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::image::ImageFile;
use crate::squashfs::superblock::Superblock;
use crate::squashfs::{METADATA_SIZE, METADATA_UNCOMPRESSED_BIT, SUPERBLOCK_SIZE};

/// Environment variable naming the scratch directory for the expanded
/// temporaries.
pub const SCRATCH_ENV: &str = "SQDELTA_TMPDIR";

/// Default external diff invocation; the two expanded paths are appended.
pub const DEFAULT_DIFF_TOOL: &[&str] = &["xdelta3", "-e", "-9", "-S", "djw", "-c", "-s"];

#[derive(Debug, Clone)]
pub struct PatchOptions {
    /// Overrides `SQDELTA_TMPDIR` (which in turn overrides the system
    /// temp directory).
    pub scratch_dir: Option<PathBuf>,
    /// Program + leading arguments of the delta-producing subprocess.
    pub diff_tool: Vec<String>,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            diff_tool: DEFAULT_DIFF_TOOL.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Statistics reported after a successful run.
#[derive(Debug, Clone)]
pub struct PatchStats {
    pub source_size: u64,
    pub target_size: u64,
    /// Source-side blocks surviving cross-image deduplication.
    pub source_blocks: usize,
    /// Target-side blocks surviving cross-image deduplication.
    pub target_blocks: usize,
    pub patch_size: u64,
}

fn scratch_dir(opts: &PatchOptions) -> PathBuf {
    opts.scratch_dir
        .clone()
        .or_else(|| std::env::var_os(SCRATCH_ENV).map(PathBuf::from))
        .unwrap_or_else(std::env::temp_dir)
}

/// Read the codec-options metadata block stored right after the
/// superblock, when the superblock says one exists. The block is always
/// stored uncompressed.
fn read_codec_options(image: &ImageFile, sb: &Superblock) -> Result<Option<Vec<u8>>> {
    if !sb.has_compressor_options() {
        return Ok(None);
    }
    let word = u16::from_le_bytes(image.read_array::<2>(SUPERBLOCK_SIZE as u64)?);
    if word & METADATA_UNCOMPRESSED_BIT == 0 {
        return Err(Error::MalformedImage(
            "compression-options block is marked compressed".into(),
        ));
    }
    let len = (word & !METADATA_UNCOMPRESSED_BIT) as usize;
    if len == 0 || len > METADATA_SIZE {
        return Err(Error::MalformedImage(format!(
            "compression-options block has invalid size {len}"
        )));
    }
    let payload = image.read_at(SUPERBLOCK_SIZE as u64 + 2, len)?;
    Ok(Some(payload.to_vec()))
}

fn write_expanded_temp(
    dir: &Path,
    prefix: &str,
    image: &ImageFile,
    blocks: &mut [BlockDesc],
    codec: &mut Codec,
    block_size: u32,
) -> Result<NamedTempFile> {
    let tmp = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".expanded")
        .tempfile_in(dir)
        .map_err(|e| Error::io(dir, e))?;
    let writer = BufWriter::new(tmp.as_file().try_clone().map_err(Error::from)?);
    let writer = write_expanded(image, blocks, codec, block_size, writer)?;
    writer
        .into_inner()
        .map_err(|e| Error::from(e.into_error()))?;
    debug!(
        "expanded {} -> {} ({} blocks)",
        image.path().display(),
        tmp.path().display(),
        blocks.len()
    );
    Ok(tmp)
}

fn run_diff_tool(tool: &[String], source: &Path, target: &Path, patch_file: &File) -> Result<()> {
    let (program, args) = tool
        .split_first()
        .ok_or_else(|| Error::DiffToolFailed("empty diff tool command".into()))?;

    // The clone shares the kernel file description, so the child's stdout
    // starts right after the header + index we just wrote.
    let stdout = patch_file.try_clone().map_err(Error::from)?;
    let status = Command::new(program)
        .args(args)
        .arg(source)
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .status()
        .map_err(|e| Error::DiffToolFailed(format!("failed to launch {program}: {e}")))?;

    if !status.success() {
        return Err(Error::DiffToolFailed(format!("{program} exited with {status}")));
    }
    Ok(())
}

/// Open one image, validate its superblock, and collect its blocks.
///
/// The first image fixes the codec; the second must agree with it.
fn collect_image(
    path: &Path,
    codec: &mut Option<Codec>,
    shared_sb: Option<&Superblock>,
) -> Result<(ImageFile, Superblock, Vec<BlockDesc>)> {
    let image = ImageFile::open(path)?;
    let sb = Superblock::parse(&image).map_err(|e| e.at(path))?;

    match (codec.as_ref(), shared_sb) {
        (None, _) => {
            let mut c = Codec::resolve(sb.compression).map_err(|e| e.at(path))?;
            let options = read_codec_options(&image, &sb).map_err(|e| e.at(path))?;
            c.configure(options.as_deref()).map_err(|e| e.at(path))?;
            *codec = Some(c);
        }
        (Some(c), Some(first)) => {
            if sb.compression != c.id() {
                return Err(Error::CodecMismatch {
                    expected: c.id(),
                    found: sb.compression,
                }
                .at(path));
            }
            if sb.block_size != first.block_size {
                return Err(Error::BlockSizeMismatch {
                    block_size: sb.block_size,
                    block_log: sb.block_log,
                }
                .at(path));
            }
        }
        (Some(_), None) => unreachable!("shared codec without a first superblock"),
    }

    let c = codec.as_mut().unwrap();
    let blocks = collect_blocks(&image, &sb, c).map_err(|e| e.at(path))?;
    c.reset();
    Ok((image, sb, blocks))
}

/// Create `patch` transforming `source` into `target`.
pub fn create_patch(
    source: &Path,
    target: &Path,
    patch: &Path,
    opts: &PatchOptions,
) -> Result<PatchStats> {
    let mut codec = None;

    info!("collecting blocks from {}", source.display());
    let (source_img, source_sb, mut source_blocks) = collect_image(source, &mut codec, None)?;
    info!("collecting blocks from {}", target.display());
    let (target_img, _target_sb, mut target_blocks) =
        collect_image(target, &mut codec, Some(&source_sb))?;
    let mut codec = codec.expect("codec fixed by the first image");

    dedup_pair(&mut source_blocks, &mut target_blocks);
    info!(
        "{} source + {} target blocks remain after deduplication",
        source_blocks.len(),
        target_blocks.len()
    );

    let dir = scratch_dir(opts);
    let source_tmp = write_expanded_temp(
        &dir,
        "sqdelta-src-",
        &source_img,
        &mut source_blocks,
        &mut codec,
        source_sb.block_size,
    )?;
    codec.reset();
    let target_tmp = write_expanded_temp(
        &dir,
        "sqdelta-tgt-",
        &target_img,
        &mut target_blocks,
        &mut codec,
        source_sb.block_size,
    )?;
    codec.reset();

    // Patch envelope: header + source-side index, then the delta bytes.
    let patch_file = File::create(patch).map_err(|e| Error::io(patch, e))?;
    {
        let mut w = BufWriter::new(&patch_file);
        PatchHeader::new(codec.id(), source_blocks.len() as u32).encode(&mut w)?;
        for block in &source_blocks {
            write_block_record(&mut w, block)?;
        }
        w.flush()?;
    }

    info!("running diff tool on the expanded images");
    run_diff_tool(&opts.diff_tool, source_tmp.path(), target_tmp.path(), &patch_file)?;

    let patch_size = patch_file.metadata().map_err(Error::from)?.len();
    Ok(PatchStats {
        source_size: source_img.len(),
        target_size: target_img.len(),
        source_blocks: source_blocks.len(),
        target_blocks: target_blocks.len(),
        patch_size,
    })
}
