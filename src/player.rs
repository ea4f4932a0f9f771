//! Server-rendered HTML pages: login, upload/player and attachments.
//!
//! Pages are `tera` templates from `templates/`, compiled into the binary
//! and rendered with autoescaping. Markdown documents are turned into HTML
//! with `comrak`, which drops raw HTML from the source, and inserted with
//! the `safe` filter.

use comrak::{markdown_to_html, Options};
use serde::Serialize;
use tera::{Context, Tera};

use crate::models::{AudioAsset, Package, PackageContents, User};
use crate::policy::PackageFolder;

/// Field name of the archive in the upload form.
pub const UPLOAD_FIELD: &str = "magFile";

const TEMPLATES: [(&str, &str); 6] = [
    ("base.html", include_str!("../templates/base.html")),
    ("login.html", include_str!("../templates/login.html")),
    ("not_found.html", include_str!("../templates/not_found.html")),
    ("home.html", include_str!("../templates/home.html")),
    ("package.html", include_str!("../templates/package.html")),
    ("files.html", include_str!("../templates/files.html")),
];

/// Render a markdown document to HTML. Tables, strikethrough and autolinks
/// are enabled and single newlines become line breaks.
pub fn render_markdown(text: &str) -> String {
    let mut options = Options::default();
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.autolink = true;
    options.render.hardbreaks = true;
    markdown_to_html(text, &options)
}

/// Narration tracks, first one loaded in the player.
pub fn narration_tracks(contents: &PackageContents) -> Vec<&AudioAsset> {
    contents
        .audio_files
        .iter()
        .filter(|a| a.folder == Some(PackageFolder::Narration))
        .collect()
}

#[derive(Serialize)]
struct PackageRow<'a> {
    id: &'a str,
    name: &'a str,
    total_bytes: i64,
    added: String,
}

#[derive(Serialize)]
struct Track<'a> {
    name: &'a str,
    url: &'a str,
}

impl<'a> From<&'a AudioAsset> for Track<'a> {
    fn from(a: &'a AudioAsset) -> Self {
        Track {
            name: &a.original_name,
            url: &a.url,
        }
    }
}

#[derive(Serialize)]
struct RenderedDocument<'a> {
    name: &'a str,
    html: String,
}

/// The compiled page templates.
#[derive(Clone)]
pub struct Pages {
    tera: Tera,
}

impl Pages {
    pub fn new() -> tera::Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.to_vec())?;
        Ok(Self { tera })
    }

    fn context(user: Option<&User>, error: Option<&str>) -> Context {
        let mut ctx = Context::new();
        ctx.insert("user", &user);
        ctx.insert("error", &error);
        ctx
    }

    pub fn login(&self, error: Option<&str>) -> tera::Result<String> {
        self.tera.render("login.html", &Self::context(None, error))
    }

    pub fn not_found(&self, message: &str) -> tera::Result<String> {
        let mut ctx = Self::context(None, None);
        ctx.insert("message", message);
        self.tera.render("not_found.html", &ctx)
    }

    /// Upload form and the list of recent packages.
    pub fn player_home(
        &self,
        user: &User,
        packages: &[Package],
        error: Option<&str>,
    ) -> tera::Result<String> {
        let rows: Vec<PackageRow> = packages
            .iter()
            .map(|p| PackageRow {
                id: &p.id,
                name: &p.source_archive_name,
                total_bytes: p.total_bytes,
                added: p.created_at.format("%Y-%m-%d %H:%M").to_string(),
            })
            .collect();
        let mut ctx = Self::context(Some(user), error);
        ctx.insert("upload_field", UPLOAD_FIELD);
        ctx.insert("packages", &rows);
        self.tera.render("home.html", &ctx)
    }

    pub fn package_player(&self, user: &User, contents: &PackageContents) -> tera::Result<String> {
        let tracks: Vec<Track> = narration_tracks(contents)
            .into_iter()
            .map(Track::from)
            .collect();
        let mut ctx = Self::context(Some(user), None);
        ctx.insert("archive", &contents.package.source_archive_name);
        ctx.insert("package_id", &contents.package.id);
        ctx.insert("tracks", &tracks);
        self.tera.render("package.html", &ctx)
    }

    /// Documents from the package plus every audio file from both folders.
    pub fn package_files(&self, user: &User, contents: &PackageContents) -> tera::Result<String> {
        let audio: Vec<Track> = contents.audio_files.iter().map(Track::from).collect();
        let documents: Vec<RenderedDocument> = contents
            .documents
            .iter()
            .map(|d| RenderedDocument {
                name: &d.original_name,
                html: render_markdown(&d.raw_text),
            })
            .collect();
        let mut ctx = Self::context(Some(user), None);
        ctx.insert("archive", &contents.package.source_archive_name);
        ctx.insert("package_id", &contents.package.id);
        ctx.insert("audio", &audio);
        ctx.insert("documents", &documents);
        self.tera.render("files.html", &ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioRole, DocumentAsset};
    use chrono::Utc;

    fn user() -> User {
        User {
            code: "AB12".into(),
            name: "Ana <Admin>".into(),
            email: String::new(),
            department: String::new(),
            profile: String::new(),
            active: true,
            created_at: Utc::now(),
        }
    }

    fn audio(name: &str, folder: PackageFolder) -> AudioAsset {
        AudioAsset {
            id: format!("id-{}", name),
            package_id: "p".into(),
            original_name: name.into(),
            internal_path: format!("{}/{}", folder.dir_name(), name),
            folder: Some(folder),
            role: AudioRole::for_folder(Some(folder)),
            byte_size: 1,
            mime_type: "audio/mpeg".into(),
            storage_relative_path: format!("packages/p/{}/{}", folder.dir_name(), name),
            url: format!("/storage/packages/p/{}/{}", folder.dir_name(), name),
            added_at: Utc::now(),
        }
    }

    fn contents() -> PackageContents {
        PackageContents {
            package: Package {
                id: "p".into(),
                source_archive_name: "story.mag".into(),
                total_bytes: 3,
                entry_count: 3,
                uploaded_by: "AB12".into(),
                created_at: Utc::now(),
            },
            audio_files: vec![
                audio("extra.ogg", PackageFolder::Attachments),
                audio("a.mp3", PackageFolder::Narration),
                audio("b.mp3", PackageFolder::Narration),
            ],
            documents: vec![DocumentAsset {
                id: "d".into(),
                package_id: "p".into(),
                original_name: "notes.md".into(),
                internal_path: "Arquivos/notes.md".into(),
                folder: Some(PackageFolder::Attachments),
                title: "Notes".into(),
                raw_text: "# Notes\n<script>alert(1)</script>\n| a | b |\n|---|---|\n| 1 | 2 |".into(),
                added_at: Utc::now(),
            }],
            references: vec![],
        }
    }

    fn pages() -> Pages {
        Pages::new().unwrap()
    }

    #[test]
    fn test_markdown_drops_raw_html() {
        let html = render_markdown("# Title\n<script>alert(1)</script>\nline one\nline two");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("<br"));
    }

    #[test]
    fn test_player_defaults_to_first_narration_track() {
        let c = contents();
        let tracks = narration_tracks(&c);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].original_name, "a.mp3");

        let page = pages().package_player(&user(), &c).unwrap();
        assert!(page.contains(
            r#"<audio id="player" controls preload="metadata" src="&#x2F;storage&#x2F;packages&#x2F;p&#x2F;Depoimento&#x2F;a.mp3">"#
        ));
        assert!(page.contains("<h2>a.mp3</h2>"));
        assert!(!page.contains("extra.ogg"));
    }

    #[test]
    fn test_catalog_values_are_escaped() {
        let mut c = contents();
        c.package.source_archive_name = "<b>story</b>.mag".into();
        let page = pages().package_player(&user(), &c).unwrap();
        assert!(page.contains("Ana &lt;Admin&gt;"));
        assert!(page.contains("&lt;b&gt;story&lt;&#x2F;b&gt;.mag"));
        assert!(!page.contains("<b>story"));
    }

    #[test]
    fn test_player_without_narration() {
        let mut c = contents();
        c.audio_files.retain(|a| a.folder != Some(PackageFolder::Narration));
        let page = pages().package_player(&user(), &c).unwrap();
        assert!(page.contains("This package has no narration."));
        assert!(!page.contains(r#"id="player""#));
    }

    #[test]
    fn test_files_page_lists_all_audio_and_documents() {
        let page = pages().package_files(&user(), &contents()).unwrap();
        assert!(page.contains("extra.ogg"));
        assert!(page.contains("b.mp3"));
        assert!(page.contains("<table>"));
        assert!(page.contains("<h1>Notes</h1>"));
        assert!(!page.contains("<script>alert"));
    }

    #[test]
    fn test_home_lists_packages_or_placeholder() {
        let c = contents();
        let page = pages()
            .player_home(&user(), &[c.package.clone()], Some("too big"))
            .unwrap();
        assert!(page.contains(r#"<p class="error">too big</p>"#));
        assert!(page.contains(r#"name="magFile""#));
        assert!(page.contains("story.mag"));
        assert!(!page.contains("No packages yet."));

        let empty = pages().player_home(&user(), &[], None).unwrap();
        assert!(empty.contains("No packages yet."));
        assert!(!empty.contains(r#"class="error""#));
    }

    #[test]
    fn test_login_page_error() {
        let p = pages();
        let page = p.login(Some("Wrong code")).unwrap();
        assert!(page.contains(r#"<p class="error">Wrong code</p>"#));
        let page = p.login(None).unwrap();
        assert!(page.contains(r#"action="/login""#));
        assert!(!page.contains("Sign out"));
    }

    #[test]
    fn test_not_found_page() {
        let page = pages().not_found("Package not found").unwrap();
        assert!(page.contains("<title>Not found</title>"));
        assert!(page.contains("<p>Package not found</p>"));
    }
}
