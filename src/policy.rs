//! Admission policy for `.mag` packages.
//!
//! A package is a zip archive with two meaningful top-level folders:
//! `Depoimento/` (the narration audio) and `Arquivos/` (attachments).
//! Everything else in the archive is ignored. Content is recognized purely
//! by file extension; no magic-byte sniffing is done, so a mislabeled file
//! with an audio extension is accepted as audio.

use serde::Serialize;
use std::path::Path;

/// Audio extensions accepted anywhere in a package (lower-case, no dot).
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a", "aac", "flac", "webm", "oga"];

/// Markdown extensions accepted as documents (lower-case, no dot).
pub const DOCUMENT_EXTENSIONS: &[&str] = &["md", "markdown"];

/// One of the two folders a package is allowed to populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageFolder {
    /// `Depoimento/`: the narration tracks.
    Narration,
    /// `Arquivos/`: attached documents and audio.
    Attachments,
}

impl PackageFolder {
    pub const ALL: [PackageFolder; 2] = [PackageFolder::Narration, PackageFolder::Attachments];

    /// On-disk and in-archive folder name.
    pub fn dir_name(self) -> &'static str {
        match self {
            PackageFolder::Narration => "Depoimento",
            PackageFolder::Attachments => "Arquivos",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PackageFolder::Narration => "narration",
            PackageFolder::Attachments => "attachments",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "narration" => Some(PackageFolder::Narration),
            "attachments" => Some(PackageFolder::Attachments),
            _ => None,
        }
    }

    /// Split a normalized (forward-slash) entry name into its folder and the
    /// remainder below it. Matching of the folder name is case-insensitive.
    /// Returns `None` when the entry is outside both folders or is the bare
    /// folder itself.
    pub fn split_entry(name: &str) -> Option<(PackageFolder, &str)> {
        let (head, rest) = name.split_once('/')?;
        let folder = Self::ALL
            .into_iter()
            .find(|f| head.eq_ignore_ascii_case(f.dir_name()))?;
        if rest.is_empty() {
            return None;
        }
        Some((folder, rest))
    }
}

/// Byte ceilings applied while validating and extracting a package.
#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    pub max_package_bytes: u64,
    pub max_file_bytes: u64,
    pub read_chunk_bytes: usize,
    /// Fraction of free space that must stay free after extraction.
    pub free_space_margin: f64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_package_bytes: 300 * 1024 * 1024,
            max_file_bytes: 100 * 1024 * 1024,
            read_chunk_bytes: 1024 * 1024,
            free_space_margin: 0.10,
        }
    }
}

impl ExtractLimits {
    /// Largest package that may be written given `available` free bytes.
    pub fn usable_space(&self, available: u64) -> u64 {
        (available as f64 * (1.0 - self.free_space_margin)) as u64
    }
}

/// Lower-cased extension of a file name, without the dot.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

pub fn is_audio(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_document(name: &str) -> bool {
    extension_of(name).is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext.as_str()))
}

/// Entries without an extension pass; entries with one must be audio or markdown.
pub fn is_allowed_extension(name: &str) -> bool {
    match extension_of(name) {
        None => true,
        Some(ext) => {
            AUDIO_EXTENSIONS.contains(&ext.as_str()) || DOCUMENT_EXTENSIONS.contains(&ext.as_str())
        }
    }
}

/// MIME type for an audio file name, by extension only.
pub fn audio_mime_type(name: &str) -> &'static str {
    match extension_of(name).as_deref() {
        Some("wav") => "audio/wav",
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("flac") => "audio/flac",
        Some("webm") => "audio/webm",
        _ => "audio/mpeg",
    }
}

/// Upload names must look like a package (`.mag`, or a plain `.zip`).
pub fn is_package_upload_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".mag") || lower.ends_with(".zip")
}
