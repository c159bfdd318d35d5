//! Grouping of discovered archive files into logical archives.
//!
//! A logical archive is the unit of extraction: a single archive file, or an
//! ordered multi-part set that one tool invocation reassembles. Grouping is
//! deterministic so the same input tree always produces the same extraction
//! plan regardless of directory-listing order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::classify::ArchiveFamily;

/// One archive-shaped file on disk.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub family: ArchiveFamily,
    /// Logical name with archive suffix and part numbering stripped.
    pub base_name: String,
    /// 1-based position within a multi-part set; 0 for single-file archives.
    pub part_index: u32,
}

/// One extractable unit: either a single archive file or a complete
/// multi-part set, with its computed output directory.
#[derive(Debug, Clone)]
pub struct LogicalArchive {
    pub base_name: String,
    pub family: ArchiveFamily,
    /// Member files sorted by `part_index` ascending.
    pub parts: Vec<ArchiveEntry>,
    /// Output directory: `{destination_root or first part's directory}/{base_name}`.
    pub destination: PathBuf,
    /// Why the set cannot be extracted, if it cannot (e.g. a part gap).
    pub not_ready_reason: Option<String>,
}

impl LogicalArchive {
    /// Representative path, used as the archive identifier in results.
    pub fn first_part(&self) -> &Path {
        &self.parts[0].path
    }

    pub fn is_multipart(&self) -> bool {
        self.parts.len() > 1 || self.parts[0].part_index > 0
    }

    /// True when the set is complete and extraction may be attempted.
    pub fn is_ready(&self) -> bool {
        self.not_ready_reason.is_none()
    }
}

/// Group archive entries into logical archives.
///
/// Entries group by `(family, base name, directory)`; with
/// `merge_across_dirs` the directory is dropped from the key so parts of one
/// set scattered over several directories reunite. Output is sorted by base
/// name then first-part path.
pub fn aggregate(
    mut entries: Vec<ArchiveEntry>,
    destination_root: Option<&Path>,
    merge_across_dirs: bool,
) -> Vec<LogicalArchive> {
    // Stable starting order, independent of discovery order.
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut groups: BTreeMap<(ArchiveFamily, String, PathBuf), Vec<ArchiveEntry>> =
        BTreeMap::new();

    for entry in entries {
        let dir = if merge_across_dirs {
            PathBuf::new()
        } else {
            entry.path.parent().map(Path::to_path_buf).unwrap_or_default()
        };
        let key = (entry.family, entry.base_name.to_ascii_lowercase(), dir);
        groups.entry(key).or_default().push(entry);
    }

    let mut archives: Vec<LogicalArchive> = groups
        .into_values()
        .map(|parts| build_logical(parts, destination_root))
        .collect();

    archives.sort_by(|a, b| {
        let ka = a.base_name.to_ascii_lowercase();
        let kb = b.base_name.to_ascii_lowercase();
        ka.cmp(&kb).then_with(|| a.first_part().cmp(b.first_part()))
    });
    archives
}

fn build_logical(mut parts: Vec<ArchiveEntry>, destination_root: Option<&Path>) -> LogicalArchive {
    // Old-style RAR sets: the bare .rar volume classifies as part 0 because
    // a lone .rar is a complete archive. When .rNN continuation volumes
    // (part >= 2) share its group, the .rar file is volume 1 of the set.
    if parts[0].family == ArchiveFamily::RarStyle
        && parts.iter().any(|p| p.part_index >= 2)
    {
        let zeros: Vec<usize> = parts
            .iter()
            .enumerate()
            .filter(|(_, p)| p.part_index == 0)
            .map(|(i, _)| i)
            .collect();
        if zeros.len() == 1 {
            parts[zeros[0]].part_index = 1;
        }
    }

    parts.sort_by(|a, b| a.part_index.cmp(&b.part_index).then_with(|| a.path.cmp(&b.path)));

    let not_ready_reason = check_contiguity(&parts);
    let first = &parts[0];
    let base_name = first.base_name.clone();
    let family = first.family;
    let dest_parent = match destination_root {
        Some(root) => root.to_path_buf(),
        None => first.path.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let destination = dest_parent.join(&base_name);

    LogicalArchive {
        base_name,
        family,
        parts,
        destination,
        not_ready_reason,
    }
}

/// Validate the part-index invariant: a single part 0 (plain archive), or
/// indices running exactly `1..=N` with no gaps or duplicates.
fn check_contiguity(parts: &[ArchiveEntry]) -> Option<String> {
    if parts.len() == 1 && parts[0].part_index == 0 {
        return None;
    }
    if parts.iter().all(|p| p.part_index == 0) {
        return Some(format!(
            "multiple standalone archives share the base name ({} files)",
            parts.len()
        ));
    }
    if parts.iter().any(|p| p.part_index == 0) {
        return Some(
            "incomplete multi-part set: mixes a standalone archive with numbered parts"
                .to_string(),
        );
    }

    let max = parts.last().map(|p| p.part_index).unwrap_or(0);
    let mut expected = 1u32;
    for part in parts {
        if part.part_index == expected {
            expected += 1;
        } else if part.part_index < expected {
            return Some(format!(
                "incomplete multi-part set: duplicate part {} ({})",
                part.part_index,
                part.path.display()
            ));
        } else {
            return Some(format!(
                "incomplete multi-part set: missing part {} of {}",
                expected, max
            ));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;

    fn entry(path: &str) -> ArchiveEntry {
        let name = Path::new(path).file_name().unwrap().to_str().unwrap();
        let c = classify(name).unwrap_or_else(|| panic!("{name} should classify"));
        ArchiveEntry {
            path: PathBuf::from(path),
            family: c.family,
            base_name: c.base_name,
            part_index: c.part_index,
        }
    }

    #[test]
    fn test_single_archives_map_one_to_one() {
        let archives = aggregate(
            vec![entry("/data/a.zip"), entry("/data/b.tar.gz")],
            None,
            false,
        );
        assert_eq!(archives.len(), 2);
        assert_eq!(archives[0].base_name, "a");
        assert_eq!(archives[0].destination, PathBuf::from("/data/a"));
        assert!(archives[0].is_ready());
        assert!(!archives[0].is_multipart());
    }

    #[test]
    fn test_multipart_parts_ordered() {
        let archives = aggregate(
            vec![
                entry("/data/p.7z.003"),
                entry("/data/p.7z.001"),
                entry("/data/p.7z.002"),
            ],
            None,
            false,
        );
        assert_eq!(archives.len(), 1);
        let a = &archives[0];
        assert!(a.is_ready());
        assert!(a.is_multipart());
        let indices: Vec<u32> = a.parts.iter().map(|p| p.part_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(a.first_part(), Path::new("/data/p.7z.001"));
    }

    #[test]
    fn test_gap_flags_not_ready() {
        let archives = aggregate(
            vec![entry("/data/p.7z.001"), entry("/data/p.7z.003")],
            None,
            false,
        );
        assert_eq!(archives.len(), 1);
        let reason = archives[0].not_ready_reason.as_deref().unwrap();
        assert!(reason.contains("missing part 2"), "{reason}");
    }

    #[test]
    fn test_old_style_rar_volume_promotion() {
        let archives = aggregate(
            vec![
                entry("/data/p.r01"),
                entry("/data/p.rar"),
                entry("/data/p.r00"),
            ],
            None,
            false,
        );
        assert_eq!(archives.len(), 1);
        let a = &archives[0];
        assert!(a.is_ready(), "{:?}", a.not_ready_reason);
        let indices: Vec<u32> = a.parts.iter().map(|p| p.part_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        // The .rar volume leads the set
        assert_eq!(a.first_part(), Path::new("/data/p.rar"));
    }

    #[test]
    fn test_continuation_volumes_without_first_are_incomplete() {
        let archives = aggregate(vec![entry("/data/p.r00"), entry("/data/p.r01")], None, false);
        assert_eq!(archives.len(), 1);
        assert!(!archives[0].is_ready());
    }

    #[test]
    fn test_directory_separation_and_merge() {
        let entries = vec![entry("/a/p.7z.001"), entry("/b/p.7z.002")];

        // Separate directories: two incomplete groups
        let split = aggregate(entries.clone(), None, false);
        assert_eq!(split.len(), 2);
        assert!(split.iter().all(|a| !a.is_ready()));

        // Merged: one complete set, extracting beside the first part
        let merged = aggregate(entries, None, true);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].is_ready());
        assert_eq!(merged[0].destination, PathBuf::from("/a/p"));
    }

    #[test]
    fn test_destination_root_override() {
        let archives = aggregate(vec![entry("/data/a.zip")], Some(Path::new("/out")), false);
        assert_eq!(archives[0].destination, PathBuf::from("/out/a"));
    }

    #[test]
    fn test_deterministic_ordering() {
        let forward = vec![entry("/d/a.zip"), entry("/d/b.zip"), entry("/e/a.7z")];
        let mut reversed = forward.clone();
        reversed.reverse();

        let x = aggregate(forward, None, false);
        let y = aggregate(reversed, None, false);
        let keys_x: Vec<_> = x.iter().map(|a| a.first_part().to_path_buf()).collect();
        let keys_y: Vec<_> = y.iter().map(|a| a.first_part().to_path_buf()).collect();
        assert_eq!(keys_x, keys_y);
        // Sorted by base name, then first part path
        assert_eq!(keys_x[0], PathBuf::from("/d/a.zip"));
        assert_eq!(keys_x[1], PathBuf::from("/e/a.7z"));
        assert_eq!(keys_x[2], PathBuf::from("/d/b.zip"));
    }

    #[test]
    fn test_colliding_standalone_archives_flag_not_ready() {
        // Two unrelated a.zip files collapse into one group under
        // cross-directory merge; neither is a numbered part.
        let archives = aggregate(vec![entry("/x/a.zip"), entry("/y/a.zip")], None, true);
        assert_eq!(archives.len(), 1);
        let reason = archives[0].not_ready_reason.as_deref().unwrap();
        assert!(
            reason.contains("multiple standalone archives"),
            "{reason}"
        );
        assert!(!reason.contains("numbered parts"), "{reason}");
    }

    #[test]
    fn test_duplicate_part_flags_not_ready() {
        let archives = aggregate(
            vec![entry("/a/p.7z.001"), entry("/b/p.7z.001"), entry("/b/p.7z.002")],
            None,
            true,
        );
        assert_eq!(archives.len(), 1);
        let reason = archives[0].not_ready_reason.as_deref().unwrap();
        assert!(reason.contains("duplicate part"), "{reason}");
    }
}
