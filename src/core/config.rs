//! Configuration management for Larkflow.
//!
//! Handles loading TOML settings and resolving them together with the
//! credential store into the [`Settings`] handed to every component.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::credentials::{keys, CredentialStore};
use super::retry::RetryConfig;
use crate::integrations::Identity;

/// Errors raised while loading configuration or credentials.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading or writing a file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML settings file is malformed.
    #[error("invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The key=value credential file is malformed.
    #[error("invalid credential file {path}: {message}")]
    EnvFile { path: PathBuf, message: String },

    /// Required values are absent.
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote API settings
    pub feishu: FeishuConfig,

    /// Task table location
    pub table: TableConfig,

    /// Remote column names
    pub fields: FieldsConfig,

    /// Remote status labels
    pub status: StatusConfig,

    /// Run loop settings
    pub run: RunConfig,

    /// External analysis command
    pub analyzer: AnalyzerConfig,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeishuConfig {
    /// Open API base URL
    pub base_url: String,

    /// Base for document links
    pub doc_base_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Attempts for transport failures
    pub max_attempts: u32,

    /// Linear backoff step in milliseconds
    pub retry_delay_ms: u64,

    /// OAuth redirect URI
    pub redirect_uri: String,

    /// OAuth scope
    pub scope: String,
}

impl FeishuConfig {
    /// Retry policy for transport failures.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::linear(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Task table location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Overrides `TABLE_APP_TOKEN`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_token: Option<String>,

    /// Overrides `TABLE_ID`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,

    /// Key under `data` that holds the row list
    pub list_field: String,

    /// Rows requested per listing
    pub page_size: u32,
}

/// Remote column names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldsConfig {
    pub stock_code: String,
    pub stock_name: String,
    pub status: String,
    pub requested_at: String,
    pub reply_link: String,
}

/// Remote status labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Labels meaning "not yet started" (empty is always pending)
    pub pending: Vec<String>,

    pub in_progress: String,

    pub done: String,

    /// Prefix of the failed label, followed by ": <error>"
    pub failed: String,

    /// Prefix of the reply link text
    pub link_text: String,
}

/// Run loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Pause between rows
    pub throttle_secs: u64,

    /// Root of archived results and local reports
    pub results_dir: PathBuf,

    /// Identity used for document calls
    pub document_identity: Identity,

    /// Default age limit for `cleanup`
    pub retention_days: u32,

    /// Base of the placeholder link used when every publish tier fails
    pub placeholder_link_base: String,
}

impl RunConfig {
    /// Pause between rows.
    pub fn throttle(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }
}

/// External analysis command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Program to run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments; `{company}` and `{date}` are substituted
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Working directory for the child process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Looks for config in:
    /// 1. `.larkflow.toml` in current directory
    /// 2. `~/.config/larkflow/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        let local_config = PathBuf::from(".larkflow.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = Self::config_dir() {
            let global_config = config_dir.join("config.toml");
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse { path: path.to_path_buf(), message: e.to_string() })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("larkflow"))
    }
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            base_url: "https://open.feishu.cn/open-apis".to_string(),
            doc_base_url: "https://feishu.cn/docx".to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            retry_delay_ms: 2000,
            redirect_uri: "https://open.feishu.cn/api-explorer/loading".to_string(),
            scope: "bitable:app:readwrite docx:document:write".to_string(),
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self { app_token: None, table_id: None, list_field: "items".to_string(), page_size: 100 }
    }
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            stock_code: "股票代码".to_string(),
            stock_name: "股票名称".to_string(),
            status: "当前状态".to_string(),
            requested_at: "请求日期".to_string(),
            reply_link: "回复链接".to_string(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            pending: vec!["待处理".to_string()],
            in_progress: "分析中".to_string(),
            done: "已完成".to_string(),
            failed: "分析失败".to_string(),
            link_text: "分析报告".to_string(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            throttle_secs: 5,
            results_dir: PathBuf::from("results"),
            document_identity: Identity::App,
            retention_days: 7,
            placeholder_link_base: "https://github.com/trading-analysis/reports".to_string(),
        }
    }
}

/// Application id and secret.
#[derive(Clone)]
pub struct AppCredentials {
    pub app_id: String,
    pub app_secret: String,
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .field("app_secret", &"***")
            .finish()
    }
}

/// Bitable app token and table id of the task table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    pub app_token: String,
    pub table_id: String,
}

/// Everything a run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: Config,
    pub credentials: CredentialStore,
    pub app: AppCredentials,
}

impl Settings {
    /// Resolve settings. Missing app id or secret is fatal.
    pub fn resolve(config: Config, credentials: CredentialStore) -> Result<Self, ConfigError> {
        let app_id = credentials.get(keys::APP_ID).map(str::to_string);
        let app_secret = credentials.get(keys::APP_SECRET).map(str::to_string);

        match (app_id, app_secret) {
            (Some(app_id), Some(app_secret)) => {
                Ok(Self { config, credentials, app: AppCredentials { app_id, app_secret } })
            }
            (id, secret) => {
                let mut missing = Vec::new();
                if id.is_none() {
                    missing.push(keys::APP_ID.to_string());
                }
                if secret.is_none() {
                    missing.push(keys::APP_SECRET.to_string());
                }
                Err(ConfigError::Missing(missing))
            }
        }
    }

    /// Task table location, preferring config overrides.
    pub fn table_target(&self) -> Result<TableTarget, ConfigError> {
        let pick = |configured: &Option<String>, key: &str| {
            configured
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .or_else(|| self.credentials.get(key))
                .map(str::to_string)
        };

        let app_token = pick(&self.config.table.app_token, keys::TABLE_APP_TOKEN);
        let table_id = pick(&self.config.table.table_id, keys::TABLE_ID);

        match (app_token, table_id) {
            (Some(app_token), Some(table_id)) => Ok(TableTarget { app_token, table_id }),
            (token, id) => {
                let mut missing = Vec::new();
                if token.is_none() {
                    missing.push(keys::TABLE_APP_TOKEN.to_string());
                }
                if id.is_none() {
                    missing.push(keys::TABLE_ID.to_string());
                }
                Err(ConfigError::Missing(missing))
            }
        }
    }
}
