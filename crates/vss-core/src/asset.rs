//! Site archive validation and preview.
//!
//! Uploads are ZIP bundles of a static site. [`ZipSiteValidator`] checks that
//! every file can be served (allowed extension) and that there is an
//! `index.html` to serve first. A [`PreviewSession`] exposes the archive's
//! HTML pages for rendering before the upload is committed.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::AssetError;

/// File extensions a site archive may contain.
pub const ALLOWED_EXTENSIONS: [&str; 10] = [
    "html", "css", "js", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico",
];

/// Disallowed paths named in an error before the rest are counted.
const DISALLOWED_PREVIEW: usize = 8;

/// What a valid archive contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteManifest {
    /// The `index.html` nearest the archive root.
    pub index_path: String,
    /// Every file path, normalized, in archive order.
    pub files: Vec<String>,
    /// Uncompressed size of all files.
    pub total_bytes: u64,
}

/// HTML pages of an archive, held for preview.
#[derive(Debug)]
pub struct PreviewSession {
    index_path: String,
    pages: BTreeMap<String, String>,
    released: bool,
}

impl PreviewSession {
    /// Path of the page to show first.
    #[must_use]
    pub fn index_path(&self) -> &str {
        &self.index_path
    }

    /// Paths of all HTML pages.
    #[must_use]
    pub fn pages(&self) -> Vec<&str> {
        self.pages.keys().map(String::as_str).collect()
    }

    /// The stored HTML of `path`.
    ///
    /// # Errors
    ///
    /// - [`AssetError::Released`] after [`Self::release_resources`].
    /// - [`AssetError::PageNotFound`] if the archive has no such page.
    pub fn render(&self, path: &str) -> Result<&str, AssetError> {
        if self.released {
            return Err(AssetError::Released);
        }
        self.pages
            .get(&normalize_path(path))
            .map(String::as_str)
            .ok_or_else(|| AssetError::PageNotFound {
                path: path.to_owned(),
            })
    }

    /// Drop the held pages. Further renders fail.
    pub fn release_resources(&mut self) {
        self.pages.clear();
        self.released = true;
    }
}

/// Checks uploaded site archives.
#[async_trait]
pub trait AssetValidator: Send + Sync {
    /// Validate an archive without keeping its contents.
    async fn validate(&self, bytes: &[u8]) -> Result<SiteManifest, AssetError>;

    /// Validate an archive and keep its pages for preview.
    async fn open_preview_session(&self, bytes: &[u8]) -> Result<PreviewSession, AssetError>;
}

/// [`AssetValidator`] for ZIP archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipSiteValidator;

struct Parsed {
    manifest: SiteManifest,
    pages: BTreeMap<String, String>,
}

impl ZipSiteValidator {
    fn parse(bytes: &[u8], keep_pages: bool) -> Result<Parsed, AssetError> {
        let mut archive =
            zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| AssetError::Archive {
                reason: e.to_string(),
            })?;

        let mut files = Vec::with_capacity(archive.len());
        let mut disallowed = Vec::new();
        let mut pages = BTreeMap::new();
        let mut total_bytes = 0u64;

        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(|e| AssetError::Archive {
                reason: e.to_string(),
            })?;
            if entry.is_dir() {
                continue;
            }
            let path = normalize_path(entry.name());
            if path.is_empty() {
                continue;
            }

            total_bytes = total_bytes.saturating_add(entry.size());
            let ext = extension(&path);
            if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
                disallowed.push(path);
                continue;
            }

            if keep_pages && ext == "html" {
                let mut raw = Vec::new();
                entry
                    .read_to_end(&mut raw)
                    .map_err(|e| AssetError::Archive {
                        reason: format!("{path}: {e}"),
                    })?;
                pages.insert(path.clone(), String::from_utf8_lossy(&raw).into_owned());
            }
            files.push(path);
        }

        if !disallowed.is_empty() {
            let preview = disallowed_preview(&disallowed);
            return Err(AssetError::DisallowedFiles {
                files: disallowed,
                preview,
            });
        }

        let index_path = files
            .iter()
            .filter(|p| p.to_lowercase().ends_with("index.html"))
            .min_by_key(|p| p.split('/').count())
            .cloned()
            .ok_or(AssetError::MissingIndex)?;

        debug!(
            index = %index_path,
            files = files.len(),
            total_bytes,
            "site archive validated"
        );

        Ok(Parsed {
            manifest: SiteManifest {
                index_path,
                files,
                total_bytes,
            },
            pages,
        })
    }
}

#[async_trait]
impl AssetValidator for ZipSiteValidator {
    async fn validate(&self, bytes: &[u8]) -> Result<SiteManifest, AssetError> {
        Ok(Self::parse(bytes, false)?.manifest)
    }

    async fn open_preview_session(&self, bytes: &[u8]) -> Result<PreviewSession, AssetError> {
        let parsed = Self::parse(bytes, true)?;
        Ok(PreviewSession {
            index_path: parsed.manifest.index_path,
            pages: parsed.pages,
            released: false,
        })
    }
}

/// Strip leading `/` and `./` and surrounding whitespace.
fn normalize_path(path: &str) -> String {
    let mut p = path.trim();
    loop {
        if let Some(rest) = p.strip_prefix('/') {
            p = rest;
        } else if let Some(rest) = p.strip_prefix("./") {
            p = rest;
        } else {
            break;
        }
    }
    p.to_owned()
}

fn extension(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

fn disallowed_preview(files: &[String]) -> String {
    let shown = files
        .iter()
        .take(DISALLOWED_PREVIEW)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if files.len() > DISALLOWED_PREVIEW {
        format!("{shown} (+{} more)", files.len() - DISALLOWED_PREVIEW)
    } else {
        shown
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn archive(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, body) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn nearest_index_wins() {
        let bytes = archive(&[
            ("site/docs/index.html", "<p>docs</p>"),
            ("site/index.html", "<p>home</p>"),
            ("site/style.css", "body{}"),
            ("site/logo.PNG", "png"),
        ]);
        let manifest = ZipSiteValidator.validate(&bytes).await.unwrap();
        assert_eq!(manifest.index_path, "site/index.html");
        assert_eq!(manifest.files.len(), 4);
        assert!(manifest.total_bytes > 0);
    }

    #[tokio::test]
    async fn disallowed_files_are_listed() {
        let bytes = archive(&[
            ("index.html", "<p>x</p>"),
            ("server.php", "<?php"),
            ("README", "hi"),
        ]);
        let err = ZipSiteValidator.validate(&bytes).await.unwrap_err();
        assert!(matches!(
            &err,
            AssetError::DisallowedFiles { files, preview }
                if files == &["server.php", "README"] && preview == "server.php, README"
        ));
    }

    #[tokio::test]
    async fn long_disallowed_lists_are_truncated() {
        let names: Vec<String> = (0..10).map(|i| format!("f{i}.exe")).collect();
        let mut files: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "x")).collect();
        files.push(("index.html", "x"));
        let err = ZipSiteValidator.validate(&archive(&files)).await.unwrap_err();
        assert!(err.to_string().ends_with("(+2 more)"));
    }

    #[tokio::test]
    async fn missing_index_and_garbage() {
        let bytes = archive(&[("about.html", "x"), ("app.js", "x")]);
        assert!(matches!(
            ZipSiteValidator.validate(&bytes).await,
            Err(AssetError::MissingIndex)
        ));
        assert!(matches!(
            ZipSiteValidator.validate(b"not a zip").await,
            Err(AssetError::Archive { .. })
        ));
    }

    #[tokio::test]
    async fn preview_renders_pages_until_released() {
        let bytes = archive(&[
            ("./index.html", "<h1>Home</h1>"),
            ("about.html", "<h1>About</h1>"),
            ("app.js", "console.log(1)"),
        ]);
        let mut session = ZipSiteValidator.open_preview_session(&bytes).await.unwrap();
        assert_eq!(session.index_path(), "index.html");
        assert_eq!(session.pages(), vec!["about.html", "index.html"]);
        assert_eq!(session.render("/about.html").unwrap(), "<h1>About</h1>");
        assert!(matches!(
            session.render("missing.html"),
            Err(AssetError::PageNotFound { .. })
        ));

        session.release_resources();
        assert!(matches!(session.render("index.html"), Err(AssetError::Released)));
    }

    #[test]
    fn path_helpers() {
        assert_eq!(normalize_path(" /./a/b.html "), "a/b.html");
        assert_eq!(extension("a.b/c"), "");
        assert_eq!(extension("img/Logo.SVG"), "svg");
    }
}
