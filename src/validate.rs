//! Archive validation.
//!
//! Screens the entries of a zip archive against the package policy using
//! only central-directory metadata. Nothing is written to disk here; the
//! output is the list of entries the extractor is allowed to materialize.
//!
//! Rules are applied per entry, cheapest first:
//!
//! 1. the entry must live under `Depoimento/` or `Arquivos/` (case-insensitive)
//! 2. directory entries are dropped (directories are created from file paths)
//! 3. an extension, if present, must be audio or markdown
//! 4. the declared size must be known
//! 5. the declared size must not exceed the per-file ceiling
//!
//! Then, for the surviving set as a whole:
//!
//! 6. the summed declared size must not exceed the per-package ceiling
//! 7. the summed declared size must fit in the usable free space of the
//!    destination volume

use std::io::{Read, Seek};
use std::path::Path;

use crate::error::{PackageError, Result};
use crate::policy::{is_allowed_extension, ExtractLimits, PackageFolder};

/// Central-directory view of one archive entry.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub index: usize,
    pub name: String,
    pub declared_size: Option<u64>,
    pub is_dir: bool,
}

/// An entry admitted for extraction.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: usize,
    /// Entry name with back-slashes converted to forward slashes.
    pub name: String,
    pub folder: PackageFolder,
    /// Path below the folder, e.g. `sub/notes.md` for `Arquivos/sub/notes.md`.
    pub relative: String,
    pub declared_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    OutsideFolders,
    Directory,
    DisallowedExtension,
    UnknownSize,
    TooLarge,
}

#[derive(Debug, Clone, Default)]
pub struct Validated {
    pub candidates: Vec<Candidate>,
    pub rejected: Vec<(String, Rejection)>,
    pub total_declared: u64,
}

pub fn normalize_entry_name(raw: &str) -> String {
    raw.replace('\\', "/")
}

/// Read entry metadata from an open archive without decompressing anything.
pub fn entry_metas<R: Read + Seek>(archive: &mut zip::ZipArchive<R>) -> Result<Vec<EntryMeta>> {
    let mut metas = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive.by_index_raw(index)?;
        metas.push(EntryMeta {
            index,
            name: file.name().to_string(),
            declared_size: Some(file.size()),
            is_dir: file.is_dir(),
        });
    }
    Ok(metas)
}

/// Screen every entry against the folder, extension and size rules, then
/// check the declared total against the package ceiling.
pub fn screen_entries<I>(entries: I, limits: &ExtractLimits) -> Result<Validated>
where
    I: IntoIterator<Item = EntryMeta>,
{
    let mut out = Validated::default();

    for entry in entries {
        let name = normalize_entry_name(&entry.name);

        let Some((folder, relative)) = PackageFolder::split_entry(&name) else {
            out.rejected.push((name, Rejection::OutsideFolders));
            continue;
        };
        if entry.is_dir || name.ends_with('/') {
            out.rejected.push((name, Rejection::Directory));
            continue;
        }
        if !is_allowed_extension(relative) {
            out.rejected.push((name, Rejection::DisallowedExtension));
            continue;
        }
        let Some(size) = entry.declared_size else {
            out.rejected.push((name, Rejection::UnknownSize));
            continue;
        };
        if size > limits.max_file_bytes {
            out.rejected.push((name, Rejection::TooLarge));
            continue;
        }

        out.total_declared = out.total_declared.saturating_add(size);
        out.candidates.push(Candidate {
            index: entry.index,
            relative: relative.to_string(),
            folder,
            name,
            declared_size: size,
        });
    }

    if out.total_declared > limits.max_package_bytes {
        return Err(PackageError::PackageTooLarge {
            declared: out.total_declared,
            limit: limits.max_package_bytes,
        });
    }

    Ok(out)
}

/// Free-space check, given the space reported for the destination volume.
pub fn check_free_space(required: u64, available: u64, limits: &ExtractLimits) -> Result<()> {
    let usable = limits.usable_space(available);
    if required > usable {
        return Err(PackageError::InsufficientSpace { required, usable });
    }
    Ok(())
}

/// Run every rule against an open archive, querying free space at `dest`.
pub fn validate_archive<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    limits: &ExtractLimits,
    dest: &Path,
) -> Result<Validated> {
    let validated = screen_entries(entry_metas(archive)?, limits)?;
    let available =
        fs2::available_space(dest).map_err(|e| PackageError::storage(dest, e))?;
    check_free_space(validated.total_declared, available, limits)?;
    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(index: usize, name: &str, size: Option<u64>) -> EntryMeta {
        EntryMeta {
            index,
            name: name.to_string(),
            declared_size: size,
            is_dir: name.ends_with('/'),
        }
    }

    fn limits(file: u64, package: u64) -> ExtractLimits {
        ExtractLimits {
            max_package_bytes: package,
            max_file_bytes: file,
            ..ExtractLimits::default()
        }
    }

    #[test]
    fn test_only_two_folders_admitted() {
        let v = screen_entries(
            vec![
                meta(0, "Depoimento/intro.mp3", Some(10)),
                meta(1, "arquivos/notes.md", Some(10)),
                meta(2, "Other/x.mp3", Some(10)),
                meta(3, "top.md", Some(10)),
            ],
            &limits(100, 1000),
        )
        .unwrap();
        let names: Vec<_> = v.candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Depoimento/intro.mp3", "arquivos/notes.md"]);
        assert_eq!(v.rejected.len(), 2);
        assert!(v
            .rejected
            .iter()
            .all(|(_, r)| *r == Rejection::OutsideFolders));
    }

    #[test]
    fn test_backslashes_normalized() {
        let v = screen_entries(
            vec![meta(0, "Depoimento\\sub\\intro.mp3", Some(1))],
            &limits(100, 1000),
        )
        .unwrap();
        assert_eq!(v.candidates[0].name, "Depoimento/sub/intro.mp3");
        assert_eq!(v.candidates[0].relative, "sub/intro.mp3");
        assert_eq!(v.candidates[0].folder, PackageFolder::Narration);
    }

    #[test]
    fn test_directories_and_extensions_rejected() {
        let v = screen_entries(
            vec![
                meta(0, "Arquivos/sub/", Some(0)),
                meta(1, "Arquivos/run.exe", Some(5)),
                meta(2, "Arquivos/README", Some(5)),
            ],
            &limits(100, 1000),
        )
        .unwrap();
        assert_eq!(v.candidates.len(), 1);
        assert_eq!(v.candidates[0].relative, "README");
        assert!(v
            .rejected
            .contains(&("Arquivos/sub/".to_string(), Rejection::Directory)));
        assert!(v
            .rejected
            .contains(&("Arquivos/run.exe".to_string(), Rejection::DisallowedExtension)));
    }

    #[test]
    fn test_unknown_size_skipped() {
        let v = screen_entries(vec![meta(0, "Arquivos/a.md", None)], &limits(100, 1000)).unwrap();
        assert!(v.candidates.is_empty());
        assert_eq!(v.rejected[0].1, Rejection::UnknownSize);
    }

    #[test]
    fn test_oversized_entry_excluded_before_extraction() {
        let v = screen_entries(
            vec![
                meta(0, "Depoimento/big.mp3", Some(101)),
                meta(1, "Depoimento/ok.mp3", Some(100)),
            ],
            &limits(100, 1000),
        )
        .unwrap();
        assert_eq!(v.candidates.len(), 1);
        assert_eq!(v.candidates[0].relative, "ok.mp3");
        assert_eq!(v.total_declared, 100);
        assert_eq!(v.rejected[0].1, Rejection::TooLarge);
    }

    #[test]
    fn test_package_ceiling_fails_whole_archive() {
        let err = screen_entries(
            vec![
                meta(0, "Depoimento/a.mp3", Some(60)),
                meta(1, "Depoimento/b.mp3", Some(60)),
            ],
            &limits(100, 100),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PackageError::PackageTooLarge {
                declared: 120,
                limit: 100
            }
        ));
    }

    #[test]
    fn test_rejected_entries_do_not_count_toward_total() {
        let v = screen_entries(
            vec![
                meta(0, "Other/huge.mp3", Some(10_000)),
                meta(1, "Depoimento/a.mp3", Some(50)),
            ],
            &limits(100, 100),
        )
        .unwrap();
        assert_eq!(v.total_declared, 50);
    }

    #[test]
    fn test_free_space_margin() {
        let l = ExtractLimits::default();
        assert!(check_free_space(900, 1000, &l).is_ok());
        let err = check_free_space(901, 1000, &l).unwrap_err();
        assert!(matches!(
            err,
            PackageError::InsufficientSpace {
                required: 901,
                usable: 900
            }
        ));
    }
}
