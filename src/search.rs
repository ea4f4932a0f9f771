use anyhow::Result;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::db;

/// `mag search [term]`: print matching audio files and documents.
pub async fn run_search(config: &Config, term: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let catalog = Catalog::new(pool, config.storage.root.clone());
    let results = catalog.search(term).await?;

    if results.audio_files.is_empty() && results.documents.is_empty() {
        println!("No results.");
        catalog.pool().close().await;
        return Ok(());
    }

    if !results.audio_files.is_empty() {
        println!("Audio ({})", results.audio_files.len());
        for (i, a) in results.audio_files.iter().enumerate() {
            println!("{}. {}", i + 1, a.original_name);
            println!("    package: {}", a.package_id);
            println!("    path: {}", a.internal_path);
            println!("    url: {}", a.url);
            println!("    id: {}", a.id);
            println!();
        }
    }

    if !results.documents.is_empty() {
        println!("Documents ({})", results.documents.len());
        for (i, d) in results.documents.iter().enumerate() {
            println!("{}. {} / {}", i + 1, d.original_name, d.title);
            println!("    package: {}", d.package_id);
            println!("    path: {}", d.internal_path);
            println!(
                "    excerpt: \"{}\"",
                excerpt(&d.raw_text, 120).replace('\n', " ").trim()
            );
            println!("    id: {}", d.id);
            println!();
        }
    }

    catalog.pool().close().await;
    Ok(())
}

/// First `max_chars` characters of `text`.
fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("áéíóú", 2), "áé...");
    }
}
