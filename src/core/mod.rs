//! Core building blocks shared by every component.
//!
//! Configuration and credential storage, retry with linear backoff, and
//! ordered fallback chains.

mod config;
mod credentials;
pub mod degradation;
mod retry;

pub use config::{
    AnalyzerConfig, AppCredentials, Config, ConfigError, FeishuConfig, FieldsConfig, RunConfig,
    Settings, StatusConfig, TableConfig, TableTarget,
};
pub use credentials::{keys, merge_lines, CredentialStore};
pub use degradation::{first_available, Fallback, FallbackResult};
pub use retry::{retry_if, RetryConfig, RetryResult};
