//! Task table workflow.
//!
//! - [`TaskScanner`] finds pending rows
//! - [`Orchestrator`] claims, analyzes, publishes and finalizes them
//! - [`TaskStore`] abstracts the table so the loop can run against fakes

mod orchestrator;
mod scanner;
mod status;
mod store;

pub use orchestrator::{Orchestrator, RowOutcome, RunOptions, RunSummary};
pub use scanner::TaskScanner;
pub use status::{StatusLabels, TaskStatus};
pub use store::{BitableTaskStore, Scan, TaskRow, TaskStore};
