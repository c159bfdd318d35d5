//! unbox - bulk archive extraction
//!
//! Finds archives under the given roots, reassembles multi-part sets, and
//! extracts each logical archive beside its source (or under a destination
//! root), optionally recursing into freshly extracted output.

mod aggregate;
mod classify;
mod extract;
mod report;
mod tools;

use anyhow::Result;
use clap::Parser;
use extract::ExtractConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "unbox")]
#[command(version)]
#[command(about = "Extract archives in bulk, including multi-part and nested sets")]
struct Cli {
    /// Root paths to scan for archives
    #[arg(required = true)]
    roots: Vec<PathBuf>,

    /// Descend into subdirectories when discovering archives
    #[arg(short, long)]
    recurse: bool,

    /// Only consider file names matching these globs (repeatable)
    #[arg(long, value_name = "GLOB")]
    include: Vec<String>,

    /// Drop file names matching these globs (repeatable)
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Extract everything under this directory instead of beside each archive
    #[arg(long, value_name = "PATH")]
    destination_root: Option<PathBuf>,

    /// Overwrite existing destination directories
    #[arg(short, long)]
    force: bool,

    /// Recursively extract archives found inside freshly extracted output
    #[arg(long)]
    extract_nested: bool,

    /// Reunite multi-part sets whose parts live in different directories
    #[arg(long)]
    merge_multipart_across_directories: bool,

    /// Dry run: report what would happen without touching the filesystem
    #[arg(long)]
    what_if: bool,

    /// Print the run summary as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Extraction workers per pass (defaults to CPU thread count)
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Exit non-zero when any archive failed or needed a missing tool
    #[arg(long)]
    fail_on_error: bool,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(
                if cli.verbose {
                    "unbox=debug".parse()?
                } else {
                    "unbox=warn".parse()?
                },
            ))
            .init();
    }

    let config = ExtractConfig {
        roots: cli.roots,
        recurse: cli.recurse,
        include: cli.include,
        exclude: cli.exclude,
        destination_root: cli.destination_root,
        force: cli.force,
        extract_nested: cli.extract_nested,
        merge_multipart_across_dirs: cli.merge_multipart_across_directories,
        what_if: cli.what_if,
        concurrency: cli.concurrency,
        // Progress bars and JSON output don't mix; dry runs extract nothing
        show_progress: !cli.json && !cli.what_if,
    };

    let summary = extract::run(&config)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.render_table());
    }

    if cli.fail_on_error && !summary.is_clean() {
        std::process::exit(1);
    }

    Ok(())
}
