//! Archive classification by file name.
//!
//! Decides whether a file name is archive-shaped, which family it belongs to,
//! and where it sits in a multi-part set. Classification is purely name-based
//! so it can run over directory listings without touching the files; a
//! magic-byte sniffer is provided separately for diagnosing mislabeled
//! archives.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Archive format category. Determines which tool extracts the archive and
/// which part-numbering conventions apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ArchiveFamily {
    /// ZIP archive, extracted in-process
    Zip,
    /// tar archive, including compressed tarballs (.tar.gz, .tgz, ...)
    Tar,
    /// 7z archive, optionally split into `.7z.001` volumes
    SevenZipStyle,
    /// RAR archive, optionally split as `.partN.rar` or `.rar`/`.rNN` volumes
    RarStyle,
}

impl fmt::Display for ArchiveFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveFamily::Zip => write!(f, "zip"),
            ArchiveFamily::Tar => write!(f, "tar"),
            ArchiveFamily::SevenZipStyle => write!(f, "7z"),
            ArchiveFamily::RarStyle => write!(f, "rar"),
        }
    }
}

/// Outcome of classifying a single file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub family: ArchiveFamily,
    /// Logical archive name with the archive suffix and any part numbering
    /// stripped (`payload` from `payload.rar.003` or `payload.7z.001`).
    pub base_name: String,
    /// Position within a multi-part set; 0 for single-file archives.
    pub part_index: u32,
}

/// Tar suffixes, longest first so compound extensions win over plain `.tar`.
const TAR_SUFFIXES: &[&str] = &[".tar.bz2", ".tar.zst", ".tar.gz", ".tar.xz", ".tgz", ".tar"];

/// Classify a file name. Returns `None` for anything that does not match a
/// known archive pattern; such files are simply not candidates.
///
/// Matching is case-insensitive. This is a pure function over the name
/// string: no filesystem access, no side effects.
pub fn classify(file_name: &str) -> Option<Classification> {
    // to_ascii_lowercase keeps byte offsets aligned with the original name,
    // so suffix lengths computed on `lower` can strip from `file_name`.
    let lower = file_name.to_ascii_lowercase();

    for suffix in TAR_SUFFIXES {
        if let Some(base) = strip_suffix(file_name, &lower, suffix) {
            return Some(Classification {
                family: ArchiveFamily::Tar,
                base_name: base.to_string(),
                part_index: 0,
            });
        }
    }

    if let Some(base) = strip_suffix(file_name, &lower, ".zip") {
        return Some(Classification {
            family: ArchiveFamily::Zip,
            base_name: base.to_string(),
            part_index: 0,
        });
    }

    if let Some(base) = strip_suffix(file_name, &lower, ".7z") {
        return Some(Classification {
            family: ArchiveFamily::SevenZipStyle,
            base_name: base.to_string(),
            part_index: 0,
        });
    }

    // Split 7z volumes: name.7z.001, name.7z.002, ...
    if let Some((stem, digits)) = split_numeric_tail(file_name, &lower) {
        let stem_lower = &lower[..stem.len()];
        if let Some(base) = strip_suffix(stem, stem_lower, ".7z") {
            if let Some(part) = parse_part(digits) {
                return Some(Classification {
                    family: ArchiveFamily::SevenZipStyle,
                    base_name: base.to_string(),
                    part_index: part,
                });
            }
        }
    }

    if let Some(stem) = strip_suffix(file_name, &lower, ".rar") {
        // New-style volumes: name.part1.rar, name.part2.rar, ...
        let stem_lower = &lower[..stem.len()];
        if let Some((base, digits)) = split_numeric_tail(stem, stem_lower) {
            let base_lower = &stem_lower[..base.len()];
            if let Some(base) = strip_suffix(base, base_lower, ".part") {
                if let Some(part) = parse_part(digits) {
                    return Some(Classification {
                        family: ArchiveFamily::RarStyle,
                        base_name: base.to_string(),
                        part_index: part,
                    });
                }
            }
        }
        // Plain .rar: standalone archive, or the first volume of an
        // old-style .rar/.r00/.r01 set. The aggregator decides which.
        return Some(Classification {
            family: ArchiveFamily::RarStyle,
            base_name: stem.to_string(),
            part_index: 0,
        });
    }

    // Old-style RAR continuation volumes: name.r00 is the volume after
    // name.rar, so .rNN maps to part NN + 2.
    if let Some((stem, digits)) = split_numeric_tail(file_name, &lower) {
        if digits.len() == 2 {
            let stem_lower = &lower[..stem.len()];
            if let Some(base) = strip_suffix(stem, stem_lower, ".r") {
                if !base.is_empty() {
                    let part: u32 = digits.parse().ok()?;
                    return Some(Classification {
                        family: ArchiveFamily::RarStyle,
                        base_name: base.to_string(),
                        part_index: part + 2,
                    });
                }
            }
        }
    }

    None
}

/// Strip `suffix` from `name` case-insensitively. `lower` must be the
/// ASCII-lowercased form of `name`.
fn strip_suffix<'a>(name: &'a str, lower: &str, suffix: &str) -> Option<&'a str> {
    if lower.ends_with(suffix) && name.len() > suffix.len() {
        Some(&name[..name.len() - suffix.len()])
    } else {
        None
    }
}

/// Split a trailing `.NNN` run of digits off `name`, returning the stem
/// (without the dot) and the digit string.
fn split_numeric_tail<'a>(name: &'a str, lower: &'a str) -> Option<(&'a str, &'a str)> {
    let dot = lower.rfind('.')?;
    let digits = &name[dot + 1..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((&name[..dot], digits))
}

/// Parse a part-number suffix. Volume numbering starts at 1; a zero or
/// unparseable suffix is not a part number.
fn parse_part(digits: &str) -> Option<u32> {
    match digits.parse::<u32>() {
        Ok(n) if n > 0 => Some(n),
        _ => None,
    }
}

/// Detect the on-disk family of a file by magic bytes.
///
/// Used only for diagnostics: when the sniffed family disagrees with the
/// name-based classification the orchestrator logs a warning about a
/// mislabeled archive. Name-based classification is never overridden.
pub fn sniff_family(path: &Path) -> Result<Option<ArchiveFamily>> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;

    let mut magic = [0u8; 8];
    let bytes_read = read_up_to(&mut file, &mut magic).unwrap_or(0);

    if bytes_read < 4 {
        return Ok(None);
    }

    // ZIP: PK\x03\x04 or PK\x05\x06 (empty) or PK\x07\x08 (spanned)
    if magic[0..2] == [0x50, 0x4B] {
        return Ok(Some(ArchiveFamily::Zip));
    }

    // RAR: Rar!\x1A\x07\x00 (RAR4) or Rar!\x1A\x07\x01\x00 (RAR5)
    if magic[0..4] == [0x52, 0x61, 0x72, 0x21] {
        return Ok(Some(ArchiveFamily::RarStyle));
    }

    // 7z: 7z\xBC\xAF\x27\x1C
    if bytes_read >= 6 && magic[0..6] == [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C] {
        return Ok(Some(ArchiveFamily::SevenZipStyle));
    }

    // tar has no leading magic; POSIX archives carry "ustar" at offset 257
    let mut header = [0u8; 262];
    if file.rewind().is_ok()
        && read_up_to(&mut file, &mut header).unwrap_or(0) >= 262
        && &header[257..262] == b"ustar"
    {
        return Ok(Some(ArchiveFamily::Tar));
    }

    Ok(None)
}

/// Fill `buf` from `reader`, looping over short reads, stopping at EOF.
/// Returns the number of bytes actually read.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, family: ArchiveFamily, base: &str, part: u32) {
        let c = classify(name).unwrap_or_else(|| panic!("{name} should classify"));
        assert_eq!(c.family, family, "{name}");
        assert_eq!(c.base_name, base, "{name}");
        assert_eq!(c.part_index, part, "{name}");
    }

    #[test]
    fn test_single_file_archives() {
        check("archive.zip", ArchiveFamily::Zip, "archive", 0);
        check("archive.tar", ArchiveFamily::Tar, "archive", 0);
        check("archive.tar.gz", ArchiveFamily::Tar, "archive", 0);
        check("archive.tgz", ArchiveFamily::Tar, "archive", 0);
        check("archive.tar.zst", ArchiveFamily::Tar, "archive", 0);
        check("archive.7z", ArchiveFamily::SevenZipStyle, "archive", 0);
        check("archive.rar", ArchiveFamily::RarStyle, "archive", 0);
    }

    #[test]
    fn test_split_7z_volumes() {
        check("payload.7z.001", ArchiveFamily::SevenZipStyle, "payload", 1);
        check("payload.7z.012", ArchiveFamily::SevenZipStyle, "payload", 12);
        // Volume numbering starts at 1
        assert!(classify("payload.7z.000").is_none());
    }

    #[test]
    fn test_rar_part_volumes() {
        check("payload.part1.rar", ArchiveFamily::RarStyle, "payload", 1);
        check("payload.part12.rar", ArchiveFamily::RarStyle, "payload", 12);
    }

    #[test]
    fn test_rar_old_style_volumes() {
        // .rar is volume 1, .r00 volume 2, .r01 volume 3
        check("payload.r00", ArchiveFamily::RarStyle, "payload", 2);
        check("payload.r01", ArchiveFamily::RarStyle, "payload", 3);
        check("payload.r99", ArchiveFamily::RarStyle, "payload", 101);
    }

    #[test]
    fn test_case_insensitive() {
        check("ARCHIVE.ZIP", ArchiveFamily::Zip, "ARCHIVE", 0);
        check("Payload.PART2.RAR", ArchiveFamily::RarStyle, "Payload", 2);
        check("Payload.7Z.002", ArchiveFamily::SevenZipStyle, "Payload", 2);
        check("backup.TAR.GZ", ArchiveFamily::Tar, "backup", 0);
    }

    #[test]
    fn test_non_archives_excluded() {
        assert!(classify("readme.txt").is_none());
        assert!(classify("archive.zip.txt").is_none());
        assert!(classify("notes.r1").is_none()); // .rNN needs two digits
        assert!(classify("photo.raw").is_none());
        assert!(classify(".zip").is_none()); // no base name
        assert!(classify("data.001").is_none()); // numeric tail without family
    }

    #[test]
    fn test_classify_is_pure() {
        let a = classify("payload.7z.003");
        let b = classify("payload.7z.003");
        assert_eq!(a, b);
    }

    /// Reader that hands out one byte per call, the worst legal `read`.
    struct TrickleReader<'a>(&'a [u8]);

    impl Read for TrickleReader<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0[0];
            self.0 = &self.0[1..];
            Ok(1)
        }
    }

    #[test]
    fn test_read_up_to_survives_short_reads() {
        let data = b"7z\xBC\xAF\x27\x1C??";
        let mut buf = [0u8; 8];
        let n = read_up_to(&mut TrickleReader(data), &mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buf, data);

        // EOF before the buffer fills reports the true byte count
        let mut buf = [0u8; 8];
        let n = read_up_to(&mut TrickleReader(b"xy"), &mut buf).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn test_sniff_zip_magic() -> anyhow::Result<()> {
        use std::io::Write;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mislabeled.rar");
        File::create(&path)?.write_all(b"PK\x03\x04more bytes here")?;
        assert_eq!(sniff_family(&path)?, Some(ArchiveFamily::Zip));

        let tiny = dir.path().join("tiny.bin");
        File::create(&tiny)?.write_all(b"xy")?;
        assert_eq!(sniff_family(&tiny)?, None);
        Ok(())
    }
}
