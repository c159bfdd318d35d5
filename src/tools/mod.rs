//! Extraction tool resolution and invocation.
//!
//! Maps an archive family to the thing that can unpack it: ZIP is handled
//! in-process with the zip crate, tar shells out to `tar`, and both 7z-style
//! and RAR-style archives shell out to a 7z-compatible binary (7z back ends
//! handle RAR extraction). External invocations return a typed
//! [`ToolInvocationResult`] rather than ad-hoc exit-code checks.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::classify::ArchiveFamily;

/// Candidate names for a 7z-compatible binary, in preference order.
const SEVENZIP_CANDIDATES: &[&str] = &["7z", "7zz", "7za"];

/// A required external tool could not be found on the search path.
#[derive(Debug, Clone, thiserror::Error)]
#[error("required tool '{tool}' for {family} archives not found on PATH")]
pub struct DependencyError {
    pub family: ArchiveFamily,
    pub tool: &'static str,
}

/// Captured outcome of one external tool invocation.
#[derive(Debug)]
pub struct ToolInvocationResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolInvocationResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Best available diagnostic line for a failed invocation.
    pub fn error_text(&self) -> String {
        self.stderr
            .lines()
            .find(|l| !l.trim().is_empty())
            .or_else(|| self.stdout.lines().find(|l| !l.trim().is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("tool exited with code {}", self.exit_code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolKind {
    /// In-process extraction via the zip crate
    BuiltinZip,
    Tar,
    SevenZip,
}

/// A resolved extractor for one archive family.
#[derive(Debug, Clone)]
pub struct Tool {
    kind: ToolKind,
    binary: Option<PathBuf>,
}

impl Tool {
    /// Human-readable name, for logging.
    pub fn name(&self) -> String {
        match (&self.kind, &self.binary) {
            (ToolKind::BuiltinZip, _) => "zip (in-process)".to_string(),
            (_, Some(bin)) => bin.display().to_string(),
            (_, None) => "?".to_string(),
        }
    }

    /// Extract an ordered set of parts into `dest`.
    ///
    /// `parts` is the full ordered part list; split-volume tools locate the
    /// sibling volumes from the first part's name, so only the first part is
    /// passed on the command line. The caller guarantees all parts share a
    /// directory (staging cross-directory sets beforehand).
    pub fn extract(&self, parts: &[PathBuf], dest: &Path) -> Result<ToolInvocationResult> {
        let first = parts.first().context("logical archive has no parts")?;
        match self.kind {
            ToolKind::BuiltinZip => {
                let count = extract_zip(first, dest)?;
                debug!("Extracted {} entries from {}", count, first.display());
                Ok(ToolInvocationResult {
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                })
            }
            ToolKind::Tar => {
                let bin = self.binary.as_ref().context("tar tool has no binary path")?;
                run_tool(
                    Command::new(bin)
                        .arg("-xf")
                        .arg(first)
                        .arg("-C")
                        .arg(dest),
                )
            }
            ToolKind::SevenZip => {
                let bin = self.binary.as_ref().context("7z tool has no binary path")?;
                run_tool(
                    Command::new(bin)
                        .arg("x")
                        .arg("-y")
                        .arg(format!("-o{}", dest.display()))
                        .arg(first),
                )
            }
        }
    }
}

fn run_tool(cmd: &mut Command) -> Result<ToolInvocationResult> {
    debug!("Running {:?}", cmd);
    let output = cmd
        .output()
        .with_context(|| format!("Failed to run {:?}", cmd.get_program()))?;
    Ok(ToolInvocationResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Per-run memoized tool lookup: the search path is consulted once per
/// distinct family, however many archives of that family a run contains.
#[derive(Debug, Default)]
pub struct ToolCache {
    resolved: HashMap<ArchiveFamily, Result<Tool, DependencyError>>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, family: ArchiveFamily) -> Result<Tool, DependencyError> {
        self.resolved
            .entry(family)
            .or_insert_with(|| lookup(family))
            .clone()
    }
}

fn lookup(family: ArchiveFamily) -> Result<Tool, DependencyError> {
    match family {
        ArchiveFamily::Zip => Ok(Tool {
            kind: ToolKind::BuiltinZip,
            binary: None,
        }),
        ArchiveFamily::Tar => match which::which("tar") {
            Ok(path) => {
                debug!("Resolved tar extractor: {}", path.display());
                Ok(Tool {
                    kind: ToolKind::Tar,
                    binary: Some(path),
                })
            }
            Err(_) => Err(DependencyError {
                family,
                tool: "tar",
            }),
        },
        ArchiveFamily::SevenZipStyle | ArchiveFamily::RarStyle => {
            for candidate in SEVENZIP_CANDIDATES {
                if let Ok(path) = which::which(candidate) {
                    debug!("Resolved 7z-compatible extractor: {}", path.display());
                    return Ok(Tool {
                        kind: ToolKind::SevenZip,
                        binary: Some(path),
                    });
                }
            }
            Err(DependencyError { family, tool: "7z" })
        }
    }
}

/// Extract a ZIP archive in-process.
///
/// Entry names are normalized through `enclosed_name` so entries cannot
/// escape the destination directory; entries with unrepresentable paths are
/// skipped with a warning.
fn extract_zip(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Failed to read zip archive: {}", archive_path.display()))?;

    let mut count = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel_path) = entry.enclosed_name() else {
            warn!(
                "Skipping zip entry with unsafe path: {} in {}",
                entry.name(),
                archive_path.display()
            );
            continue;
        };
        let out_path = dest.join(rel_path);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)
                .with_context(|| format!("Failed to create {}", out_path.display()))?;
            std::io::copy(&mut entry, &mut out)?;
            count += 1;
        }
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_zip_resolves_without_external_tools() {
        let mut cache = ToolCache::new();
        let tool = cache.resolve(ArchiveFamily::Zip).unwrap();
        assert_eq!(tool.kind, ToolKind::BuiltinZip);
    }

    #[test]
    fn test_resolution_is_memoized_and_repeatable() {
        let mut cache = ToolCache::new();
        let a = cache.resolve(ArchiveFamily::Tar);
        let b = cache.resolve(ArchiveFamily::Tar);
        assert_eq!(a.is_ok(), b.is_ok());
    }

    #[test]
    fn test_dependency_error_names_tool() {
        let err = DependencyError {
            family: ArchiveFamily::RarStyle,
            tool: "7z",
        };
        let msg = err.to_string();
        assert!(msg.contains("7z"), "{msg}");
        assert!(msg.contains("rar"), "{msg}");
    }

    #[test]
    fn test_error_text_prefers_stderr() {
        let res = ToolInvocationResult {
            exit_code: 2,
            stdout: "noise\n".to_string(),
            stderr: "\nCannot open volume\n".to_string(),
        };
        assert_eq!(res.error_text(), "Cannot open volume");

        let silent = ToolInvocationResult {
            exit_code: 2,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(silent.error_text(), "tool exited with code 2");
    }

    #[test]
    fn test_extract_zip_in_process() -> Result<()> {
        let dir = tempdir()?;
        let zip_path = dir.path().join("test.zip");
        {
            let file = File::create(&zip_path)?;
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();

            zip.start_file("file.txt", options)?;
            zip.write_all(b"hello world")?;

            zip.start_file("sub/nested.txt", options)?;
            zip.write_all(b"nested")?;

            zip.finish()?;
        }

        let dest = dir.path().join("out");
        let count = extract_zip(&zip_path, &dest)?;
        assert_eq!(count, 2);
        assert_eq!(fs::read_to_string(dest.join("file.txt"))?, "hello world");
        assert_eq!(fs::read_to_string(dest.join("sub/nested.txt"))?, "nested");
        Ok(())
    }

    #[test]
    fn test_tar_roundtrip_if_available() -> Result<()> {
        let mut cache = ToolCache::new();
        let Ok(tool) = cache.resolve(ArchiveFamily::Tar) else {
            // tar not installed; resolution already covered above
            return Ok(());
        };

        let dir = tempdir()?;
        let src = dir.path().join("src");
        fs::create_dir_all(&src)?;
        fs::write(src.join("a.txt"), b"tar me")?;

        let archive = dir.path().join("bundle.tar");
        let status = Command::new("tar")
            .arg("-cf")
            .arg(&archive)
            .arg("-C")
            .arg(&src)
            .arg("a.txt")
            .status()?;
        assert!(status.success());

        let dest = dir.path().join("out");
        fs::create_dir_all(&dest)?;
        let result = tool.extract(&[archive], &dest)?;
        assert!(result.success(), "{}", result.error_text());
        assert_eq!(fs::read_to_string(dest.join("a.txt"))?, "tar me");
        Ok(())
    }
}
