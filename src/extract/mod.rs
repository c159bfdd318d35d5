//! End-to-end extraction orchestration.
//!
//! Drives discovery, aggregation, dependency resolution and the per-archive
//! decision loop, then optionally repeats over freshly extracted output until
//! no new archives appear. Per-archive failures never unwind past this
//! module: every outcome becomes a typed result in the run summary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::aggregate::{aggregate, ArchiveEntry, LogicalArchive};
use crate::classify::{classify, sniff_family};
use crate::report::{ExtractionResult, ExtractionStatus, Reporter, RunSummary};
use crate::tools::{Tool, ToolCache};

/// Safety bound on nested passes, so self-referential archive chains cannot
/// loop forever.
pub const MAX_NESTED_PASSES: usize = 16;

/// Cap on extraction workers; external tools saturate I/O well before this.
const MAX_WORKERS: usize = 32;

/// Configuration for one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct ExtractConfig {
    /// Starting paths to scan for archives.
    pub roots: Vec<PathBuf>,
    /// Descend into subdirectories during initial discovery.
    pub recurse: bool,
    /// File-name globs; when non-empty a candidate must match at least one.
    pub include: Vec<String>,
    /// File-name globs; a candidate matching any is dropped.
    pub exclude: Vec<String>,
    /// Extract everything under this directory instead of beside each source.
    pub destination_root: Option<PathBuf>,
    /// Remove and repopulate destinations that already exist.
    pub force: bool,
    /// Re-scan freshly extracted output for further archives.
    pub extract_nested: bool,
    /// Reunite multi-part sets whose parts live in different directories.
    pub merge_multipart_across_dirs: bool,
    /// Dry run: report intended actions, mutate nothing.
    pub what_if: bool,
    /// Extraction workers per pass; None = available cores, capped.
    pub concurrency: Option<usize>,
    /// Show a progress bar while extracting.
    pub show_progress: bool,
}

/// Per-archive decision made before any filesystem mutation.
enum Decision {
    /// Outcome already known; nothing to execute.
    Done(ExtractionResult),
    /// Extraction planned with a resolved tool.
    Extract(Tool),
}

/// Run one extraction over the configured roots.
///
/// Returns the full run summary; per-archive errors are recorded, never
/// propagated. Only an empty root list is a caller error.
pub fn run(config: &ExtractConfig) -> Result<RunSummary> {
    anyhow::ensure!(!config.roots.is_empty(), "at least one root path is required");

    let include = compile_patterns(&config.include);
    let exclude = compile_patterns(&config.exclude);

    let mut reporter = Reporter::new();
    let mut tools = ToolCache::new();

    let mut roots = config.roots.clone();
    let mut recurse = config.recurse;
    let mut passes = 0;

    loop {
        passes += 1;
        let entries = discover(&roots, recurse, &include, &exclude, &mut reporter);
        let archives = aggregate(
            entries,
            config.destination_root.as_deref(),
            config.merge_multipart_across_dirs,
        );
        debug!("Pass {}: {} logical archive(s)", passes, archives.len());

        let results = run_pass(&archives, config, &mut tools);

        let mut new_roots = Vec::new();
        for result in results {
            if result.status == ExtractionStatus::Extracted {
                new_roots.push(result.destination.clone());
            }
            reporter.record(result);
        }

        if !config.extract_nested || new_roots.is_empty() {
            break;
        }
        if passes >= MAX_NESTED_PASSES {
            warn!(
                "Nested extraction stopped after {} passes without reaching a fixed point",
                passes
            );
            break;
        }
        // Later passes scan only the directories this pass created; extracted
        // output is scanned in full regardless of the top-level recurse flag.
        roots = new_roots;
        recurse = true;
    }

    let summary = reporter.finish(passes);
    info!(
        "Extraction complete: {} extracted, {} skipped, {} failed",
        summary.extracted,
        summary.skipped_existing + summary.skipped_what_if + summary.skipped_missing_dependency,
        summary.failed
    );
    Ok(summary)
}

/// Decide and execute one pass over an aggregated archive list. Results come
/// back in the archives' deterministic order.
fn run_pass(
    archives: &[LogicalArchive],
    config: &ExtractConfig,
    tools: &mut ToolCache,
) -> Vec<ExtractionResult> {
    // Decisions are sequential: tool lookup is memoized per family and no
    // filesystem mutation happens here, so what-if stops at this phase.
    let mut decisions = Vec::with_capacity(archives.len());
    for archive in archives {
        decisions.push(decide(archive, config, tools));
    }

    let planned: Vec<(usize, &LogicalArchive, Tool)> = decisions
        .iter()
        .enumerate()
        .filter_map(|(i, d)| match d {
            Decision::Extract(tool) => Some((i, &archives[i], tool.clone())),
            Decision::Done(_) => None,
        })
        .collect();

    let mut slots: Vec<Option<ExtractionResult>> = decisions
        .into_iter()
        .map(|d| match d {
            Decision::Done(result) => Some(result),
            Decision::Extract(_) => None,
        })
        .collect();

    if !planned.is_empty() {
        let progress = if config.show_progress {
            let pb = ProgressBar::new(planned.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] Extracting [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap()
                    .progress_chars("=>-"),
            );
            Some(pb)
        } else {
            None
        };

        let workers = effective_workers(config.concurrency, planned.len());
        let executed: Vec<(usize, ExtractionResult)> = if workers <= 1 {
            planned
                .iter()
                .map(|(i, archive, tool)| {
                    let result = execute(archive, tool, config.force);
                    if let Some(pb) = &progress {
                        pb.inc(1);
                    }
                    (*i, result)
                })
                .collect()
        } else {
            // Logical archives never share a destination, so extractions are
            // independent; passes stay sequential for fixed-point detection.
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| {
                    planned
                        .par_iter()
                        .map(|(i, archive, tool)| {
                            let result = execute(archive, tool, config.force);
                            if let Some(pb) = &progress {
                                pb.inc(1);
                            }
                            (*i, result)
                        })
                        .collect()
                }),
                Err(e) => {
                    warn!("Falling back to sequential extraction: {}", e);
                    planned
                        .iter()
                        .map(|(i, archive, tool)| (*i, execute(archive, tool, config.force)))
                        .collect()
                }
            }
        };

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        for (i, result) in executed {
            slots[i] = Some(result);
        }
    }

    slots.into_iter().flatten().collect()
}

fn effective_workers(configured: Option<usize>, planned: usize) -> usize {
    let default = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    configured
        .unwrap_or(default)
        .clamp(1, MAX_WORKERS)
        .min(planned)
}

/// Decide the action for one logical archive. Order matters: an existing
/// destination wins over everything, incompleteness is reported before a
/// what-if run claims it would extract, and dependency resolution comes last.
fn decide(archive: &LogicalArchive, config: &ExtractConfig, tools: &mut ToolCache) -> Decision {
    let done = |status, error: Option<String>| {
        Decision::Done(ExtractionResult {
            archive: archive.first_part().to_path_buf(),
            destination: archive.destination.clone(),
            status,
            error,
        })
    };

    if !config.force && archive.destination.exists() {
        return done(ExtractionStatus::SkippedExisting, None);
    }
    if let Some(reason) = &archive.not_ready_reason {
        return done(
            ExtractionStatus::SkippedMissingDependency,
            Some(reason.clone()),
        );
    }
    if config.what_if {
        return done(ExtractionStatus::SkippedWhatIf, None);
    }
    match tools.resolve(archive.family) {
        Ok(tool) => Decision::Extract(tool),
        Err(e) => done(ExtractionStatus::SkippedMissingDependency, Some(e.to_string())),
    }
}

/// Physically extract one logical archive. All failure modes collapse into a
/// Failed result for this archive; nothing propagates.
fn execute(archive: &LogicalArchive, tool: &Tool, force: bool) -> ExtractionResult {
    let failed = |error: String| ExtractionResult {
        archive: archive.first_part().to_path_buf(),
        destination: archive.destination.clone(),
        status: ExtractionStatus::Failed,
        error: Some(error),
    };

    match sniff_family(archive.first_part()) {
        Ok(Some(actual)) if actual != archive.family => {
            warn!(
                "{} is named as {} but looks like {} on disk",
                archive.first_part().display(),
                archive.family,
                actual
            );
        }
        _ => {}
    }

    // Clear-then-extract is one conceptual step: if extraction fails after
    // the clear, the archive is reported Failed and the destination stays
    // absent or partial.
    if force && archive.destination.exists() {
        if let Err(e) = fs::remove_dir_all(&archive.destination) {
            return failed(format!(
                "failed to clear existing destination {}: {}",
                archive.destination.display(),
                e
            ));
        }
    }

    // Split-volume tools find siblings by name in one directory; sets merged
    // from several directories are staged under one roof first.
    let _staging;
    let parts: Vec<PathBuf> = if archive.is_multipart() && spans_directories(archive) {
        match stage_parts(archive) {
            Ok((dir, staged)) => {
                _staging = dir;
                staged
            }
            Err(e) => return failed(format!("failed to stage multi-part set: {e:#}")),
        }
    } else {
        archive.parts.iter().map(|p| p.path.clone()).collect()
    };

    if let Err(e) = fs::create_dir_all(&archive.destination) {
        return failed(format!(
            "failed to create destination {}: {}",
            archive.destination.display(),
            e
        ));
    }

    info!(
        "Extracting {} -> {} via {}",
        archive.first_part().display(),
        archive.destination.display(),
        tool.name()
    );

    match tool.extract(&parts, &archive.destination) {
        Ok(result) if result.success() => ExtractionResult {
            archive: archive.first_part().to_path_buf(),
            destination: archive.destination.clone(),
            status: ExtractionStatus::Extracted,
            error: None,
        },
        Ok(result) => failed(result.error_text()),
        Err(e) => failed(format!("{e:#}")),
    }
}

fn spans_directories(archive: &LogicalArchive) -> bool {
    let first_dir = archive.parts[0].path.parent();
    archive.parts.iter().any(|p| p.path.parent() != first_dir)
}

/// Hard-link (or copy) every part of a scattered set into one temp directory
/// under its original file name, preserving part order.
fn stage_parts(archive: &LogicalArchive) -> Result<(tempfile::TempDir, Vec<PathBuf>)> {
    let anchor = archive.parts[0]
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let staging = tempfile::tempdir_in(&anchor)
        .or_else(|_| tempfile::tempdir())
        .context("failed to create staging directory")?;

    let mut staged = Vec::with_capacity(archive.parts.len());
    for part in &archive.parts {
        let name = part
            .path
            .file_name()
            .with_context(|| format!("part has no file name: {}", part.path.display()))?;
        let target = staging.path().join(name);
        if fs::hard_link(&part.path, &target).is_err() {
            fs::copy(&part.path, &target).with_context(|| {
                format!("failed to stage part {}", part.path.display())
            })?;
        }
        staged.push(target);
    }
    Ok((staging, staged))
}

fn compile_patterns(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!("Ignoring invalid glob pattern '{}': {}", p, e);
                None
            }
        })
        .collect()
}

/// Walk the roots and classify every candidate file. An unreadable root is a
/// root-level failure (recorded, other roots proceed); per-file walk errors
/// are warned and skipped.
fn discover(
    roots: &[PathBuf],
    recurse: bool,
    include: &[Pattern],
    exclude: &[Pattern],
    reporter: &mut Reporter,
) -> Vec<ArchiveEntry> {
    let mut entries = Vec::new();

    for root in roots {
        let max_depth = if recurse { usize::MAX } else { 1 };
        for item in WalkDir::new(root).max_depth(max_depth) {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    if e.depth() == 0 {
                        reporter.record_root_error(format!("{}: {}", root.display(), e));
                    } else {
                        warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    }
                    continue;
                }
            };
            if !item.file_type().is_file() {
                continue;
            }
            let Some(name) = item.file_name().to_str() else {
                continue;
            };
            if !include.is_empty() && !include.iter().any(|p| p.matches(name)) {
                continue;
            }
            if exclude.iter().any(|p| p.matches(name)) {
                continue;
            }
            if let Some(c) = classify(name) {
                entries.push(ArchiveEntry {
                    path: item.path().to_path_buf(),
                    family: c.family,
                    base_name: c.base_name,
                    part_index: c.part_index,
                });
            }
        }
    }

    entries
}
