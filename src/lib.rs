#![allow(clippy::format_push_string)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_lossless)]

//! # Larkflow
//!
//! Feishu bitable task runner: claim pending stock-analysis rows, run the
//! analysis, publish a report document and write the link back.
//!
//! ## Features
//!
//! - **Token lifecycle**: app and user tokens with refresh-token rotation
//! - **Task table**: pending-row scanning and status write-back with link degradation
//! - **Publishing**: three-tier document publishing that always yields a link
//! - **Results archive**: local analysis history with age-based cleanup
//!
//! ## Quick Start
//!
//! ```bash
//! # Put FEISHU_APP_ID and FEISHU_APP_SECRET into .env, then
//! larkflow auth url
//! larkflow auth exchange <code>
//!
//! # Process every pending row
//! larkflow run
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]

pub mod analysis;
pub mod core;
pub mod integrations;
pub mod report;
pub mod workflow;

// Re-export commonly used types
pub use core::{Config, CredentialStore, Settings};
pub use integrations::{FeishuError, FeishuResult, TokenProvider};
pub use workflow::{Orchestrator, RunOptions, RunSummary, TaskStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "larkflow";
