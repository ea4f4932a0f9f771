//! Content classification of an extracted package.
//!
//! Walks a package directory, tags files as audio or markdown by extension
//! and sorts each group by path so that ordering is deterministic (the first
//! narration track is the default one in the player).

use anyhow::Result;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::policy::{self, PackageFolder};

/// An audio file found in a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFile {
    pub path: PathBuf,
    pub file_name: String,
    /// Path relative to the package root, forward slashes.
    pub internal_path: String,
    pub folder: Option<PackageFolder>,
    pub byte_size: u64,
}

/// A markdown document found in a package, with its decoded text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFile {
    pub path: PathBuf,
    pub file_name: String,
    pub internal_path: String,
    pub folder: Option<PackageFolder>,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub audio: Vec<AudioFile>,
    pub documents: Vec<DocumentFile>,
}

impl Inventory {
    /// File names of every asset, audio first, in inventory order.
    pub fn asset_names(&self) -> Vec<String> {
        self.audio
            .iter()
            .map(|a| a.file_name.clone())
            .chain(self.documents.iter().map(|d| d.file_name.clone()))
            .collect()
    }
}

/// Audio files anywhere below `dir`, sorted by path. A missing directory
/// yields an empty list.
pub fn list_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    list_matching(dir, policy::is_audio)
}

/// Markdown files anywhere below `dir`, sorted by path.
pub fn list_document_files(dir: &Path) -> Result<Vec<PathBuf>> {
    list_matching(dir, policy::is_document)
}

fn list_matching(dir: &Path, matches: fn(&str) -> bool) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if matches(&name) {
            out.push(entry.into_path());
        }
    }
    out.sort();
    Ok(out)
}

/// Classify every asset of the package rooted at `root`.
pub fn classify_package(root: &Path) -> Result<Inventory> {
    let mut inventory = Inventory::default();

    for path in list_audio_files(root)? {
        let byte_size = std::fs::metadata(&path)?.len();
        let internal_path = internal_path(root, &path);
        inventory.audio.push(AudioFile {
            file_name: file_name(&path),
            folder: folder_of(&internal_path),
            internal_path,
            byte_size,
            path,
        });
    }

    for path in list_document_files(root)? {
        let text = read_document(&path)?;
        let name = file_name(&path);
        let internal_path = internal_path(root, &path);
        inventory.documents.push(DocumentFile {
            title: document_title(&text, &name),
            folder: folder_of(&internal_path),
            internal_path,
            file_name: name,
            text,
            path,
        });
    }

    Ok(inventory)
}

/// Decode a document permissively; invalid UTF-8 is replaced, never an error.
pub fn read_document(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Text of the first `# ` heading line, or the file name without extension.
pub fn document_title(text: &str, file_name: &str) -> String {
    text.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| file_stem(file_name))
}

pub fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn internal_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn folder_of(internal_path: &str) -> Option<PackageFolder> {
    PackageFolder::split_entry(internal_path).map(|(folder, _)| folder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn package(files: &[(&str, &[u8])]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for (rel, data) in files {
            let path = tmp.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, data).unwrap();
        }
        tmp
    }

    #[test]
    fn test_title_from_heading() {
        assert_eq!(document_title("# Hello World\nbody", "x.md"), "Hello World");
        assert_eq!(
            document_title("intro line\n  # Indented Title  \n# Second", "x.md"),
            "Indented Title"
        );
    }

    #[test]
    fn test_title_falls_back_to_stem() {
        assert_eq!(document_title("## Not level one\ntext", "notes.md"), "notes");
        assert_eq!(document_title("#NoSpace", "a.b.markdown"), "a.b");
        assert_eq!(document_title("", "empty.md"), "empty");
    }

    #[test]
    fn test_classify_sorted_and_tagged() {
        let tmp = package(&[
            ("Depoimento/b.mp3", b"bb"),
            ("Depoimento/a.wav", b"a"),
            ("Arquivos/extra.ogg", b"ooo"),
            ("Arquivos/z.md", b"# Zed"),
            ("Arquivos/sub/a.markdown", b"plain"),
            ("Arquivos/image.png", b"png"),
        ]);

        let inv = classify_package(tmp.path()).unwrap();

        let audio: Vec<_> = inv.audio.iter().map(|a| a.internal_path.as_str()).collect();
        assert_eq!(
            audio,
            vec!["Arquivos/extra.ogg", "Depoimento/a.wav", "Depoimento/b.mp3"]
        );
        assert_eq!(inv.audio[0].folder, Some(PackageFolder::Attachments));
        assert_eq!(inv.audio[2].folder, Some(PackageFolder::Narration));
        assert_eq!(inv.audio[2].byte_size, 2);

        let docs: Vec<_> = inv.documents.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(docs, vec!["a.markdown", "z.md"]);
        assert_eq!(inv.documents[0].title, "a");
        assert_eq!(inv.documents[1].title, "Zed");
    }

    #[test]
    fn test_classification_idempotent() {
        let tmp = package(&[
            ("Depoimento/2.mp3", b"x"),
            ("Depoimento/1.mp3", b"x"),
            ("Arquivos/n.md", b"text"),
        ]);
        let first = classify_package(tmp.path()).unwrap();
        let second = classify_package(tmp.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let tmp = package(&[("Arquivos/bad.md", &[b'o', b'k', 0xff, 0xfe])]);
        let inv = classify_package(tmp.path()).unwrap();
        assert!(inv.documents[0].text.starts_with("ok"));
        assert!(inv.documents[0].text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(list_audio_files(&tmp.path().join("nope")).unwrap().is_empty());
    }
}
