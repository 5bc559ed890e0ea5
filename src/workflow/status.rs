//! Row status and its translation to remote labels.
//!
//! Internal logic branches on [`TaskStatus`] only. [`StatusLabels`] maps
//! to and from the free-text values the table uses.

use std::fmt;

use crate::core::StatusConfig;

/// Longest error text written into a failed label.
const MAX_ERROR_CHARS: usize = 500;

/// Lifecycle of a task row.
///
/// `Pending -> InProgress -> {Done, Failed}`. Terminal rows only go back
/// to `Pending` through a manual reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed(String),
    /// A label this system does not recognize; never picked up.
    Unrecognized(String),
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::InProgress => f.write_str("in progress"),
            Self::Done => f.write_str("done"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            Self::Unrecognized(label) => write!(f, "unrecognized ({label})"),
        }
    }
}

/// Remote labels for each status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLabels {
    pending: Vec<String>,
    in_progress: String,
    done: String,
    failed: String,
}

impl StatusLabels {
    pub fn from_config(config: &StatusConfig) -> Self {
        Self {
            pending: config.pending.iter().map(|p| p.trim().to_string()).collect(),
            in_progress: config.in_progress.trim().to_string(),
            done: config.done.trim().to_string(),
            failed: config.failed.trim().to_string(),
        }
    }

    /// Labels that count as "not yet started", besides empty.
    pub fn pending_values(&self) -> &[String] {
        &self.pending
    }

    /// Label to write for `status`. Pending is written as empty.
    pub fn label(&self, status: &TaskStatus) -> String {
        match status {
            TaskStatus::Pending => String::new(),
            TaskStatus::InProgress => self.in_progress.clone(),
            TaskStatus::Done => self.done.clone(),
            TaskStatus::Failed(reason) => {
                let reason: String = reason.chars().take(MAX_ERROR_CHARS).collect();
                format!("{}: {}", self.failed, reason.trim())
            }
            TaskStatus::Unrecognized(label) => label.clone(),
        }
    }

    /// Status for a label read from the table.
    pub fn parse(&self, label: Option<&str>) -> TaskStatus {
        let label = label.map(str::trim).unwrap_or_default();
        if label.is_empty() || self.pending.iter().any(|p| p == label) {
            return TaskStatus::Pending;
        }
        if label == self.in_progress {
            return TaskStatus::InProgress;
        }
        if label == self.done {
            return TaskStatus::Done;
        }
        if let Some(rest) = label.strip_prefix(self.failed.as_str()) {
            let reason = rest.trim_start_matches([':', '：']).trim();
            return TaskStatus::Failed(reason.to_string());
        }
        TaskStatus::Unrecognized(label.to_string())
    }
}

impl Default for StatusLabels {
    fn default() -> Self {
        Self::from_config(&StatusConfig::default())
    }
}
