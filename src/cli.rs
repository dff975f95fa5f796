// Command-line interface.
//
// One command: take a source image, a target image, and an output path,
// and produce the patch. Everything else is knobs.

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, ValueHint};

use crate::delta::{create_patch, PatchOptions};

/// SquashFS 4.0 binary delta generator.
#[derive(Parser, Debug)]
#[command(
    name = "sqdelta",
    version,
    about = "Produce a binary patch between two SquashFS 4.0 images",
    arg_required_else_help = true
)]
struct Cli {
    /// Source (old) SquashFS image.
    #[arg(value_hint = ValueHint::FilePath)]
    source: PathBuf,

    /// Target (new) SquashFS image.
    #[arg(value_hint = ValueHint::FilePath)]
    target: PathBuf,

    /// Output patch file.
    #[arg(value_hint = ValueHint::FilePath)]
    patch: PathBuf,

    /// Quiet mode (suppress the summary line).
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json")]
    json_output: bool,

    /// Directory for the expanded temporary files
    /// (default: $SQDELTA_TMPDIR, then the system temp directory).
    #[arg(long = "scratch-dir", value_hint = ValueHint::DirPath)]
    scratch_dir: Option<PathBuf>,

    /// Override the diff command; the two expanded file paths are
    /// appended and the delta is read from its stdout.
    #[arg(long = "diff-tool", value_name = "CMD")]
    diff_tool: Option<String>,
}

fn cmd_create(cli: &Cli) -> i32 {
    let mut opts = PatchOptions {
        scratch_dir: cli.scratch_dir.clone(),
        ..Default::default()
    };
    if let Some(tool) = &cli.diff_tool {
        let tool: Vec<String> = tool.split_whitespace().map(str::to_string).collect();
        if tool.is_empty() {
            eprintln!("sqdelta: --diff-tool must name a command");
            return 1;
        }
        opts.diff_tool = tool;
    }

    let stats = match create_patch(&cli.source, &cli.target, &cli.patch, &opts) {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("sqdelta: {e}");
            return 1;
        }
    };

    if !cli.quiet {
        eprintln!(
            "sqdelta: {} -> {}: {} bytes ({} + {} blocks differ)",
            cli.source.display(),
            cli.target.display(),
            stats.patch_size,
            stats.source_blocks,
            stats.target_blocks
        );
    }

    if cli.json_output {
        let json = serde_json::json!({
            "source": &cli.source,
            "target": &cli.target,
            "patch": &cli.patch,
            "source_size": stats.source_size,
            "target_size": stats.target_size,
            "source_blocks": stats.source_blocks,
            "target_blocks": stats.target_blocks,
            "patch_size": stats.patch_size,
        });
        eprintln!("{}", serde_json::to_string_pretty(&json).unwrap());
    }

    0
}

/// Main CLI entry point. Parses arguments via clap, runs the pipeline.
pub fn run() -> ! {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    process::exit(cmd_create(&cli));
}
