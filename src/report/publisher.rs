//! Document publishing with tiered fallback.
//!
//! Strategies are tried in order until one yields a link:
//! 1. one-call Markdown import into a new document
//! 2. empty document, then a best-effort content import (plus a local copy)
//! 3. local HTML and Markdown files, linked by `file://` URI
//!
//! If every strategy fails a placeholder link is returned, so publishing
//! never comes back empty-handed.

use std::fmt;

use chrono::{DateTime, Local};

use super::archive::ResultsArchive;
use super::html;
use crate::core::{first_available, Fallback};
use crate::integrations::DocxClient;

/// A report ready to be published.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub title: String,
    pub stock_code: String,
    pub stock_name: String,
    pub markdown: String,
    pub created_at: DateTime<Local>,
}

impl PublishRequest {
    /// `YYYYmmdd_HHMMSS` stamp used in file names and links.
    pub fn timestamp(&self) -> String {
        self.created_at.format("%Y%m%d_%H%M%S").to_string()
    }

    fn html_page(&self) -> String {
        html::render_page(&self.stock_code, &self.stock_name, &self.markdown, self.created_at)
    }
}

/// One publishing tier. `attempt` returns `None` to fall through.
pub trait PublishStrategy: Fallback<PublishRequest, String> {}

impl<T: Fallback<PublishRequest, String>> PublishStrategy for T {}

/// Where a report ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub link: String,
    /// Name of the tier that produced the link
    pub tier: String,
    /// Whether a lower tier than the first was used
    pub degraded: bool,
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.degraded {
            write!(f, "{} (degraded: {})", self.link, self.tier)
        } else {
            write!(f, "{}", self.link)
        }
    }
}

/// Tier 1: one-call import.
pub struct BuiltinImport {
    docs: DocxClient,
}

impl BuiltinImport {
    pub fn new(docs: DocxClient) -> Self {
        Self { docs }
    }
}

impl Fallback<PublishRequest, String> for BuiltinImport {
    fn name(&self) -> &str {
        "builtin-import"
    }

    fn attempt(&self, request: &PublishRequest) -> Option<String> {
        match self.docs.import_markdown(&request.title, &request.markdown) {
            Ok(id) => Some(self.docs.document_link(&id)),
            Err(err) => {
                tracing::warn!(error = %err, "markdown import failed");
                None
            }
        }
    }
}

/// Tier 2: empty document, then best-effort import.
///
/// The link of an empty document counts as success. A local copy of the
/// content is written alongside so the report itself is not lost.
pub struct CreateThenImport {
    docs: DocxClient,
    archive: ResultsArchive,
}

impl CreateThenImport {
    pub fn new(docs: DocxClient, archive: ResultsArchive) -> Self {
        Self { docs, archive }
    }
}

impl Fallback<PublishRequest, String> for CreateThenImport {
    fn name(&self) -> &str {
        "create-then-import"
    }

    fn attempt(&self, request: &PublishRequest) -> Option<String> {
        let id = match self.docs.create_document(&request.title) {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(error = %err, "document creation failed");
                return None;
            }
        };

        if let Err(err) = self.docs.import_into(&id, &request.markdown) {
            tracing::warn!(document_id = %id, error = %err, "content import failed, keeping empty document");
        }

        match self.archive.write_report(
            &request.stock_code,
            &request.timestamp(),
            &request.html_page(),
            &request.markdown,
        ) {
            Ok(local) => tracing::info!(path = %local.html_path.display(), "kept local copy"),
            Err(err) => tracing::warn!(error = %err, "could not write local copy"),
        }

        Some(self.docs.document_link(&id))
    }
}

/// Tier 3: local files.
pub struct LocalFile {
    archive: ResultsArchive,
}

impl LocalFile {
    pub fn new(archive: ResultsArchive) -> Self {
        Self { archive }
    }
}

impl Fallback<PublishRequest, String> for LocalFile {
    fn name(&self) -> &str {
        "local-file"
    }

    fn attempt(&self, request: &PublishRequest) -> Option<String> {
        self.archive
            .write_report(&request.stock_code, &request.timestamp(), &request.html_page(), &request.markdown)
            .map(|local| local.link())
            .map_err(|err| tracing::error!(error = %err, "could not write local report"))
            .ok()
    }
}

/// Publishes through an ordered list of strategies.
pub struct DocumentPublisher {
    strategies: Vec<Box<dyn PublishStrategy>>,
    placeholder_base: String,
}

impl fmt::Debug for DocumentPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("DocumentPublisher")
            .field("strategies", &names)
            .field("placeholder_base", &self.placeholder_base)
            .finish()
    }
}

impl DocumentPublisher {
    pub fn new(strategies: Vec<Box<dyn PublishStrategy>>, placeholder_base: &str) -> Self {
        Self { strategies, placeholder_base: placeholder_base.trim_end_matches('/').to_string() }
    }

    /// The standard three tiers.
    pub fn standard(docs: DocxClient, archive: ResultsArchive, placeholder_base: &str) -> Self {
        Self::new(
            vec![
                Box::new(BuiltinImport::new(docs.clone())),
                Box::new(CreateThenImport::new(docs, archive.clone())),
                Box::new(LocalFile::new(archive)),
            ],
            placeholder_base,
        )
    }

    /// Local files only, for runs without remote documents.
    pub fn local_only(archive: ResultsArchive, placeholder_base: &str) -> Self {
        Self::new(vec![Box::new(LocalFile::new(archive))], placeholder_base)
    }

    /// Publish a report. Always returns a non-empty link.
    pub fn publish(&self, request: &PublishRequest) -> PublishOutcome {
        match first_available(&self.strategies, request) {
            Some(result) if !result.value.is_empty() => {
                let tier = self.strategies[result.position].name().to_string();
                if result.used_fallback {
                    tracing::warn!(%tier, link = %result.value, "published with degraded tier");
                } else {
                    tracing::info!(link = %result.value, "published document");
                }
                PublishOutcome { link: result.value, tier, degraded: result.used_fallback }
            }
            _ => {
                let link = format!(
                    "{}/{}_{}.md",
                    self.placeholder_base,
                    request.stock_code,
                    request.timestamp()
                );
                tracing::error!(%link, "every publishing tier failed, using placeholder link");
                PublishOutcome { link, tier: "placeholder".to_string(), degraded: true }
            }
        }
    }
}
