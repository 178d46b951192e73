//! Chapter sources.
//!
//! A [`ChapterSource`] knows how to fetch one chapter and hand back its raw
//! text. The pipeline only ever sees [`RawContent`]; adding a new kind of
//! source (a site scraper, an EPUB reader) means adding one implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use chapterloom_core::fingerprint::document_id;

use crate::extract::{extract_text, html_title, ChapterFormat};

/// What a source extracts from one chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent {
    /// Stable document id derived from the source locator.
    pub id: String,
    pub title: Option<String>,
    pub text: String,
    /// Source-specific note to append to the transformation instructions.
    pub instructions_hint: Option<String>,
}

/// A place chapters come from.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use chapterloom::source::{ChapterSource, RawContent};
///
/// struct Fixed;
///
/// #[async_trait]
/// impl ChapterSource for Fixed {
///     fn name(&self) -> &str { "fixed" }
///     fn locator(&self) -> String { "fixed://1".into() }
///     async fn extract(&self) -> Result<RawContent> {
///         Ok(RawContent {
///             id: chapterloom_core::fingerprint::document_id(&self.locator()),
///             title: None,
///             text: "Once upon a time.".into(),
///             instructions_hint: None,
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait ChapterSource: Send + Sync {
    /// Source kind, for logs (e.g. `"file"`).
    fn name(&self) -> &str;

    /// Canonical locator (path or URL); the document id is derived from it.
    fn locator(&self) -> String;

    async fn extract(&self) -> Result<RawContent>;
}

/// A chapter stored in a local file.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> ChapterFormat {
        ChapterFormat::from_extension(self.path.extension().and_then(|e| e.to_str()))
    }
}

#[async_trait]
impl ChapterSource for FileSource {
    fn name(&self) -> &str {
        "file"
    }

    fn locator(&self) -> String {
        let canonical = self
            .path
            .canonicalize()
            .unwrap_or_else(|_| self.path.clone());
        format!("file://{}", canonical.display())
    }

    async fn extract(&self) -> Result<RawContent> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read chapter: {}", self.path.display()))?;

        let format = self.format();
        let text = extract_text(&bytes, format)
            .with_context(|| format!("Failed to extract chapter: {}", self.path.display()))?;

        let title = match format {
            ChapterFormat::Html => std::str::from_utf8(&bytes).ok().and_then(html_title),
            _ => None,
        }
        .or_else(|| {
            self.path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        });

        let instructions_hint = (format == ChapterFormat::Html)
            .then(|| "The text contains HTML markup. Keep every tag unchanged.".to_string());

        let locator = self.locator();
        tracing::debug!(locator = %locator, bytes = bytes.len(), ?format, "chapter extracted");

        Ok(RawContent {
            id: document_id(&locator),
            title,
            text,
            instructions_hint,
        })
    }
}

/// Active instructions for a chapter: the configured text plus any
/// source-specific hint.
pub fn effective_instructions(base: &str, content: &RawContent) -> String {
    match &content.instructions_hint {
        Some(hint) => format!("{}\n\n{}", base.trim_end(), hint),
        None => base.to_string(),
    }
}
