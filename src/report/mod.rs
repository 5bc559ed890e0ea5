//! Report generation, publishing and the local results archive.

pub mod archive;
pub mod cleanup;
pub mod html;
pub mod markdown;
pub mod publisher;

pub use archive::{file_uri, LocalReport, ResultsArchive};
pub use cleanup::{cleanup_results, format_size, CleanupStats};
pub use markdown::{render_decision, render_markdown, ReportContext};
pub use publisher::{
    BuiltinImport, CreateThenImport, DocumentPublisher, LocalFile, PublishOutcome,
    PublishRequest, PublishStrategy,
};
