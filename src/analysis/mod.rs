//! Stock analysis adapters.
//!
//! The analysis framework is external. It is driven through the
//! [`Analyzer`] trait and its result is treated as an opaque mapping from
//! which only a few well-known keys are read.

mod external;
mod simulated;

pub use external::CommandAnalyzer;
pub use simulated::SimulatedAnalyzer;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Runs an analysis for one company on one trade date.
pub trait Analyzer {
    /// Short name for logs and reports.
    fn name(&self) -> &str;

    fn analyze(&self, company: &str, trade_date: &str) -> anyhow::Result<AnalysisResult>;
}

/// Output of the analysis framework.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Nested state mapping; any key may be absent.
    #[serde(default)]
    pub state: Value,

    /// Final decision, a string or an object.
    #[serde(default)]
    pub decision: Value,
}

impl AnalysisResult {
    /// A non-empty report under `key`. Non-string values are rendered as JSON.
    pub fn report(&self, key: &str) -> Option<String> {
        match self.state.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            other => serde_json::to_string_pretty(other).ok(),
        }
    }

    /// Number of messages exchanged by the agents.
    pub fn message_count(&self) -> usize {
        self.state.get("messages").and_then(Value::as_array).map_or(0, Vec::len)
    }
}
