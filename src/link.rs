//! Document → asset reference detection.
//!
//! A document references an asset when the asset's file name, or its name
//! without extension, occurs anywhere in the document text (compared
//! lower-cased). The match is a plain substring test: there is no
//! tokenization, so the stem `intro` also matches inside `introduction`.

use crate::classify::file_stem;
use crate::models::AssetKind;

/// Names from `candidates` mentioned in `text`, in candidate order.
/// Duplicated candidate names yield duplicated hits.
pub fn detect_references<'a, S: AsRef<str>>(text: &str, candidates: &'a [S]) -> Vec<&'a str> {
    let haystack = text.to_lowercase();
    candidates
        .iter()
        .map(|name| name.as_ref())
        .filter(|name| mentions(&haystack, name))
        .collect()
}

fn mentions(haystack: &str, name: &str) -> bool {
    let full = name.to_lowercase();
    let stem = file_stem(name).to_lowercase();
    (!full.is_empty() && haystack.contains(&full)) || (!stem.is_empty() && haystack.contains(&stem))
}

/// A known asset the linker may resolve a name to.
#[derive(Debug, Clone, Copy)]
pub struct AssetRef<'a> {
    pub id: &'a str,
    pub file_name: &'a str,
}

/// A resolved link target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub id: String,
    pub kind: AssetKind,
}

/// Resolve the references found in one document.
///
/// Each detected name is looked up among audio assets first, then among
/// the other documents; a document never links to itself.
pub fn link_document(
    source_id: &str,
    text: &str,
    audio: &[AssetRef<'_>],
    documents: &[AssetRef<'_>],
) -> Vec<LinkTarget> {
    let names: Vec<&str> = audio
        .iter()
        .chain(documents.iter())
        .map(|a| a.file_name)
        .collect();

    detect_references(text, &names)
        .into_iter()
        .filter_map(|name| resolve(source_id, name, audio, documents))
        .collect()
}

fn resolve(
    source_id: &str,
    name: &str,
    audio: &[AssetRef<'_>],
    documents: &[AssetRef<'_>],
) -> Option<LinkTarget> {
    if let Some(a) = audio.iter().find(|a| a.file_name == name) {
        return Some(LinkTarget {
            id: a.id.to_string(),
            kind: AssetKind::Audio,
        });
    }
    documents
        .iter()
        .find(|d| d.file_name == name && d.id != source_id)
        .map(|d| LinkTarget {
            id: d.id.to_string(),
            kind: AssetKind::Document,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset<'a>(id: &'a str, file_name: &'a str) -> AssetRef<'a> {
        AssetRef { id, file_name }
    }

    #[test]
    fn test_full_name_match() {
        let hits = detect_references("See intro.mp3 for details", &["intro.mp3", "outro.mp3"]);
        assert_eq!(hits, vec!["intro.mp3"]);
    }

    #[test]
    fn test_case_insensitive() {
        let hits = detect_references("listen to INTRO.MP3", &["Intro.mp3"]);
        assert_eq!(hits, vec!["Intro.mp3"]);
    }

    #[test]
    fn test_stem_matches_inside_unrelated_word() {
        // No word boundaries: "intro" is found inside "introduction".
        let hits = detect_references("An introduction to the archive.", &["intro.mp3"]);
        assert_eq!(hits, vec!["intro.mp3"]);
    }

    #[test]
    fn test_no_match() {
        let hits = detect_references("nothing relevant", &["intro.mp3"]);
        assert!(hits.is_empty());
    }

    #[test]
    fn test_audio_resolution() {
        let audio = [asset("a1", "intro.mp3")];
        let docs = [asset("d1", "notes.md")];
        let links = link_document("d1", "See intro.mp3 for details", &audio, &docs);
        assert_eq!(
            links,
            vec![LinkTarget {
                id: "a1".into(),
                kind: AssetKind::Audio
            }]
        );
    }

    #[test]
    fn test_never_links_to_itself() {
        let docs = [asset("d1", "notes.md"), asset("d2", "other.md")];
        let links = link_document("d1", "these notes.md mention other.md", &[], &docs);
        assert_eq!(
            links,
            vec![LinkTarget {
                id: "d2".into(),
                kind: AssetKind::Document
            }]
        );
    }

    #[test]
    fn test_audio_wins_name_collision() {
        let audio = [asset("a1", "track")];
        let docs = [asset("d1", "source.md"), asset("d2", "track")];
        let links = link_document("d1", "play track now", &audio, &docs);
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.id == "a1" && l.kind == AssetKind::Audio));
    }

    #[test]
    fn test_duplicate_names_not_deduplicated() {
        let audio = [asset("a1", "intro.mp3"), asset("a2", "intro.mp3")];
        let links = link_document("d1", "intro.mp3", &audio, &[]);
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.id == "a1"));
    }
}
