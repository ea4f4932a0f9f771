//! Bounded package extraction.
//!
//! Materializes the validated entries of a package into a fresh directory
//! `<packages>/<id>/` with exactly two subfolders, `Depoimento/` and
//! `Arquivos/`. Each entry lands below its folder with the folder prefix
//! stripped.
//!
//! Declared sizes are only a hint: bytes are streamed in fixed-size chunks
//! and counted, and the whole operation aborts as soon as a file or the
//! package goes over its ceiling. Any failure removes the partially written
//! package directory, so callers observe all-or-nothing behavior.
//!
//! Entries whose target resolves outside their folder are skipped, not fatal.

use std::fs::{self, File};
use std::io::{BufReader, ErrorKind as IoErrorKind, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

use crate::error::{PackageError, Result};
use crate::policy::{ExtractLimits, PackageFolder};
use crate::validate::{validate_archive, Candidate, Validated};

/// A file written into a package directory.
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    pub folder: PackageFolder,
    /// Path inside the package, e.g. `Depoimento/intro.mp3`.
    pub internal_path: String,
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ExtractedPackage {
    pub id: String,
    pub root: PathBuf,
    pub total_bytes: u64,
    pub files: Vec<ExtractedFile>,
    /// Entry names dropped by validation or by the traversal check.
    pub skipped: Vec<String>,
}

/// Random 128-bit package identifier, hex encoded.
pub fn new_package_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Whether `id` has the shape produced by [`new_package_id`].
pub fn is_package_id(id: &str) -> bool {
    id.len() == 32 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Validate and extract the archive at `archive_path` into a new package
/// directory below `packages_dir`.
pub fn extract_package(
    archive_path: &Path,
    packages_dir: &Path,
    limits: &ExtractLimits,
) -> Result<ExtractedPackage> {
    fs::create_dir_all(packages_dir).map_err(|e| PackageError::storage(packages_dir, e))?;

    let file = File::open(archive_path).map_err(|e| PackageError::storage(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

    let validated = validate_archive(&mut archive, limits, packages_dir)?;
    extract_validated(&mut archive, validated, packages_dir, limits)
}

/// Extract an already validated entry list. Exposed separately so the
/// streaming ceilings can be exercised independently of validation.
pub fn extract_validated<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    validated: Validated,
    packages_dir: &Path,
    limits: &ExtractLimits,
) -> Result<ExtractedPackage> {
    let id = new_package_id();
    let root = packages_dir.join(&id);
    let guard = RollbackDir::create(&root)?;

    let mut skipped: Vec<String> = validated.rejected.into_iter().map(|(n, _)| n).collect();
    let mut files: Vec<ExtractedFile> = Vec::new();
    let mut written_total = 0u64;
    let mut buf = vec![0u8; limits.read_chunk_bytes.max(1)];

    let narration = guard.subfolder(PackageFolder::Narration)?;
    let attachments = guard.subfolder(PackageFolder::Attachments)?;

    for candidate in &validated.candidates {
        let folder_root = match candidate.folder {
            PackageFolder::Narration => &narration,
            PackageFolder::Attachments => &attachments,
        };

        let Some(target) = resolve_target(folder_root, &candidate.relative) else {
            tracing::warn!(entry = %candidate.name, "skipping entry that escapes its folder");
            skipped.push(candidate.name.clone());
            continue;
        };

        let parent = target.parent().unwrap_or(folder_root);
        fs::create_dir_all(parent).map_err(|e| PackageError::storage(parent, e))?;
        let parent_canonical = parent
            .canonicalize()
            .map_err(|e| PackageError::storage(parent, e))?;
        if !parent_canonical.starts_with(folder_root) {
            tracing::warn!(entry = %candidate.name, "skipping entry whose directory resolves outside its folder");
            skipped.push(candidate.name.clone());
            continue;
        }

        // A later entry mapping to the same target replaces the earlier file.
        if let Some(pos) = files.iter().position(|f| f.path == target) {
            let replaced = files.remove(pos);
            written_total -= replaced.bytes;
        }
        let bytes = write_entry(archive, candidate, &target, limits, &mut written_total, &mut buf)?;

        let internal_path = internal_path(candidate);
        files.push(ExtractedFile {
            folder: candidate.folder,
            internal_path,
            path: target,
            bytes,
        });
    }

    let root = guard.commit();
    tracing::debug!(package = %id, files = files.len(), bytes = written_total, "package extracted");

    Ok(ExtractedPackage {
        id,
        root,
        total_bytes: written_total,
        files,
        skipped,
    })
}

fn internal_path(candidate: &Candidate) -> String {
    format!("{}/{}", candidate.folder.dir_name(), candidate.relative)
}

fn write_entry<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    candidate: &Candidate,
    target: &Path,
    limits: &ExtractLimits,
    written_total: &mut u64,
    buf: &mut [u8],
) -> Result<u64> {
    let mut entry = archive.by_index(candidate.index)?;
    let mut out = File::create(target).map_err(|e| PackageError::storage(target, e))?;
    let written = copy_bounded(
        &mut entry,
        &mut out,
        &candidate.name,
        target,
        limits,
        written_total,
        buf,
    )?;
    out.flush().map_err(|e| PackageError::storage(target, e))?;
    Ok(written)
}

/// Stream `src` into `dst` chunk by chunk, enforcing the per-file ceiling and
/// the package-wide running total. Returns the bytes written for this entry.
pub fn copy_bounded<S: Read, D: Write>(
    src: &mut S,
    dst: &mut D,
    entry: &str,
    target: &Path,
    limits: &ExtractLimits,
    written_total: &mut u64,
    buf: &mut [u8],
) -> Result<u64> {
    let mut written = 0u64;
    loop {
        let n = match src.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
            Err(e) => return Err(PackageError::MalformedArchive(e.into())),
        };

        written += n as u64;
        *written_total += n as u64;
        if written > limits.max_file_bytes {
            return Err(PackageError::EntryOverflow {
                entry: entry.to_string(),
                limit: limits.max_file_bytes,
            });
        }
        if *written_total > limits.max_package_bytes {
            return Err(PackageError::PackageOverflow {
                limit: limits.max_package_bytes,
            });
        }

        dst.write_all(&buf[..n])
            .map_err(|e| PackageError::storage(target, e))?;
    }
    Ok(written)
}

/// Join `relative` below `folder_root` and return the target only if it
/// stays strictly beneath the root after lexical normalization.
pub fn resolve_target(folder_root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if relative
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
    {
        return None;
    }

    let resolved = normalize_path(&folder_root.join(relative));
    if resolved == folder_root || !resolved.starts_with(folder_root) {
        return None;
    }
    Some(resolved)
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            other => result.push(other.as_os_str()),
        }
    }
    result
}

/// Package directory that is removed on drop unless committed.
struct RollbackDir {
    path: PathBuf,
    committed: bool,
}

impl RollbackDir {
    fn create(path: &Path) -> Result<Self> {
        fs::create_dir(path).map_err(|e| PackageError::storage(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            committed: false,
        })
    }

    /// Create a folder inside the package and return its canonical path.
    fn subfolder(&self, folder: PackageFolder) -> Result<PathBuf> {
        let dir = self.path.join(folder.dir_name());
        fs::create_dir_all(&dir).map_err(|e| PackageError::storage(&dir, e))?;
        dir.canonicalize().map_err(|e| PackageError::storage(&dir, e))
    }

    fn commit(mut self) -> PathBuf {
        self.committed = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for RollbackDir {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to roll back package directory");
        } else {
            tracing::info!(path = %self.path.display(), "rolled back partial package");
        }
    }
}
