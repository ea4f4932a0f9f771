//! Retention sweeper for extracted package directories.
//!
//! Not part of the upload path; run on demand with `mag sweep`. Works on the
//! filesystem only: catalog rows of a removed package are left in place.
//!
//! A package's age is the newest modification time of anything below its
//! directory, or the directory's own mtime when it is empty. Two selection
//! rules can be combined (their union is removed):
//!
//! - `--keep-latest N` keeps the N most recent packages;
//! - `--older-than-days N` removes packages last modified before now - N days.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;

#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    pub older_than_days: Option<u32>,
    pub keep_latest: Option<usize>,
    pub dry_run: bool,
    /// Skip the interactive confirmation.
    pub assume_yes: bool,
}

/// A package directory and its most recent modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDir {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub selected: Vec<PathBuf>,
    pub removed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Package directories directly below `packages_dir`, newest first.
/// A missing directory yields an empty list.
pub fn list_package_dirs(packages_dir: &Path) -> Result<Vec<PackageDir>> {
    if !packages_dir.exists() {
        return Ok(Vec::new());
    }

    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(packages_dir)
        .with_context(|| format!("Failed to read {}", packages_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        if let Some(modified) = newest_mtime(&path) {
            dirs.push(PackageDir { path, modified });
        }
    }

    dirs.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
    Ok(dirs)
}

fn newest_mtime(dir: &Path) -> Option<DateTime<Utc>> {
    let newest = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok()?.modified().ok())
        .max();

    newest
        .or_else(|| std::fs::metadata(dir).ok()?.modified().ok())
        .map(DateTime::<Utc>::from)
}

/// Directories to remove from `dirs` (newest first), without duplicates.
pub fn select_for_removal(
    dirs: &[PackageDir],
    opts: &SweepOptions,
    now: DateTime<Utc>,
) -> Vec<PathBuf> {
    let mut selected: Vec<PathBuf> = Vec::new();

    if let Some(keep) = opts.keep_latest {
        selected.extend(dirs.iter().skip(keep).map(|d| d.path.clone()));
    }

    // A cutoff before the earliest representable time matches nothing.
    let cutoff = opts
        .older_than_days
        .and_then(|days| Duration::try_days(i64::from(days)))
        .and_then(|age| now.checked_sub_signed(age));
    if let Some(cutoff) = cutoff {
        for d in dirs {
            if d.modified < cutoff && !selected.contains(&d.path) {
                selected.push(d.path.clone());
            }
        }
    }

    selected
}

/// Ask for confirmation on `output`; only `y` or `yes` proceeds.
/// End of input counts as no.
pub fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<bool> {
    write!(output, "Remove these packages? [y/N]: ")?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(false);
    }
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Best-effort removal; returns `(removed, failed)`.
pub fn remove_dirs(paths: &[PathBuf]) -> (usize, usize) {
    let mut removed = 0;
    let mut failed = 0;
    for path in paths {
        match std::fs::remove_dir_all(path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "package directory removed");
                removed += 1;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove package directory");
                eprintln!("Failed to remove {}: {}", path.display(), e);
                failed += 1;
            }
        }
    }
    (removed, failed)
}

/// Select, list, confirm and remove. Prompts on `input`/`output` unless
/// `assume_yes` or `dry_run` is set.
pub fn sweep<R: BufRead, W: Write>(
    packages_dir: &Path,
    opts: &SweepOptions,
    now: DateTime<Utc>,
    input: &mut R,
    output: &mut W,
) -> Result<SweepReport> {
    let dirs = list_package_dirs(packages_dir)?;
    let selected = select_for_removal(&dirs, opts, now);
    let mut report = SweepReport {
        selected: selected.clone(),
        ..Default::default()
    };

    if selected.is_empty() {
        writeln!(output, "Nothing to remove.")?;
        return Ok(report);
    }

    writeln!(output, "Packages to remove:")?;
    for path in &selected {
        writeln!(output, "  - {}", path.display())?;
    }

    if opts.dry_run {
        writeln!(output, "Dry run: nothing removed.")?;
        return Ok(report);
    }

    if !opts.assume_yes && !confirm(input, output)? {
        writeln!(output, "Cancelled.")?;
        report.cancelled = true;
        return Ok(report);
    }

    let (removed, failed) = remove_dirs(&selected);
    report.removed = removed;
    report.failed = failed;
    if failed > 0 {
        writeln!(output, "Done with {} error(s).", failed)?;
    } else {
        writeln!(output, "Removed {} package(s).", removed)?;
    }
    Ok(report)
}

/// `mag sweep`.
pub fn run_sweep(config: &Config, opts: &SweepOptions) -> Result<()> {
    let packages_dir = config.storage.packages_dir();
    if !packages_dir.exists() {
        println!("No packages directory at {}", packages_dir.display());
        return Ok(());
    }

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let report = sweep(
        &packages_dir,
        opts,
        Utc::now(),
        &mut stdin.lock(),
        &mut stdout.lock(),
    )?;

    if report.failed > 0 {
        anyhow::bail!("{} package directories could not be removed", report.failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn dir(name: &str, days_ago: i64, now: DateTime<Utc>) -> PackageDir {
        PackageDir {
            path: PathBuf::from(name),
            modified: now - Duration::days(days_ago),
        }
    }

    fn names(paths: &[PathBuf]) -> Vec<&str> {
        paths.iter().map(|p| p.to_str().unwrap()).collect()
    }

    #[test]
    fn test_keep_latest() {
        let now = Utc::now();
        let dirs = vec![dir("a", 0, now), dir("b", 1, now), dir("c", 2, now)];
        let opts = SweepOptions {
            keep_latest: Some(1),
            ..Default::default()
        };
        assert_eq!(names(&select_for_removal(&dirs, &opts, now)), vec!["b", "c"]);

        let opts = SweepOptions {
            keep_latest: Some(5),
            ..Default::default()
        };
        assert!(select_for_removal(&dirs, &opts, now).is_empty());
    }

    #[test]
    fn test_union_without_duplicates() {
        let now = Utc::now();
        let dirs = vec![
            dir("a", 0, now),
            dir("b", 10, now),
            dir("c", 20, now),
            dir("d", 30, now),
        ];
        let opts = SweepOptions {
            keep_latest: Some(3),
            older_than_days: Some(15),
            ..Default::default()
        };
        assert_eq!(names(&select_for_removal(&dirs, &opts, now)), vec!["d", "c"]);
    }

    #[test]
    fn test_no_rules_selects_nothing() {
        let now = Utc::now();
        let dirs = vec![dir("a", 100, now)];
        assert!(select_for_removal(&dirs, &SweepOptions::default(), now).is_empty());
    }

    #[test]
    fn test_age_beyond_calendar_range_selects_nothing() {
        let now = Utc::now();
        let dirs = vec![dir("a", 0, now), dir("b", 10_000, now)];
        let opts = SweepOptions {
            older_than_days: Some(100_000_000),
            ..Default::default()
        };
        assert!(select_for_removal(&dirs, &opts, now).is_empty());

        let opts = SweepOptions {
            older_than_days: Some(u32::MAX),
            keep_latest: Some(1),
            ..Default::default()
        };
        assert_eq!(names(&select_for_removal(&dirs, &opts, now)), vec!["b"]);
    }

    #[test]
    fn test_confirm() {
        let mut out = Vec::new();
        assert!(confirm(&mut Cursor::new("yes\n"), &mut out).unwrap());
        assert!(confirm(&mut Cursor::new(" Y \n"), &mut out).unwrap());
        assert!(!confirm(&mut Cursor::new("n\n"), &mut out).unwrap());
        assert!(!confirm(&mut Cursor::new(""), &mut out).unwrap());
    }

    #[test]
    fn test_dry_run_and_cancel_keep_directories() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("p1/Depoimento")).unwrap();
        std::fs::write(tmp.path().join("p1/Depoimento/a.mp3"), b"x").unwrap();
        std::fs::create_dir_all(tmp.path().join("p2")).unwrap();

        let dirs = list_package_dirs(tmp.path()).unwrap();
        assert_eq!(dirs.len(), 2);

        let opts = SweepOptions {
            keep_latest: Some(0),
            dry_run: true,
            ..Default::default()
        };
        let mut out = Vec::new();
        let report = sweep(tmp.path(), &opts, Utc::now(), &mut Cursor::new(""), &mut out).unwrap();
        assert_eq!(report.selected.len(), 2);
        assert_eq!(report.removed, 0);
        assert!(String::from_utf8(out).unwrap().contains("Dry run"));

        let opts = SweepOptions {
            keep_latest: Some(0),
            ..Default::default()
        };
        let mut out = Vec::new();
        let report = sweep(tmp.path(), &opts, Utc::now(), &mut Cursor::new("n\n"), &mut out).unwrap();
        assert!(report.cancelled);
        assert!(tmp.path().join("p1").exists());
        assert!(tmp.path().join("p2").exists());
    }

    #[test]
    fn test_removes_with_assume_yes() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("p1/Arquivos")).unwrap();
        std::fs::write(tmp.path().join("p1/Arquivos/n.md"), b"x").unwrap();
        std::fs::write(tmp.path().join("stray.txt"), b"not a package").unwrap();

        let opts = SweepOptions {
            older_than_days: Some(0),
            keep_latest: Some(0),
            assume_yes: true,
            ..Default::default()
        };
        let mut out = Vec::new();
        let report = sweep(tmp.path(), &opts, Utc::now(), &mut Cursor::new(""), &mut out).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 0);
        assert!(!tmp.path().join("p1").exists());
        assert!(tmp.path().join("stray.txt").exists());
    }

    #[test]
    fn test_missing_packages_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(list_package_dirs(&tmp.path().join("none")).unwrap().is_empty());
    }
}
