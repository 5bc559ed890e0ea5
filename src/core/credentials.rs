//! Credential storage backed by a key=value file.
//!
//! Values are layered: in-run overrides win over the process environment
//! snapshot, which wins over the file. The environment is captured once
//! when the store is built and never written to.
//!
//! Persisting rewrites the file with replace-or-append semantics into a
//! temporary file in the same directory and renames it over the original,
//! so an interrupted save leaves either the old or the new file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::config::ConfigError;

/// Well-known credential keys.
pub mod keys {
    /// Application id issued by the open platform.
    pub const APP_ID: &str = "FEISHU_APP_ID";
    /// Application secret.
    pub const APP_SECRET: &str = "FEISHU_APP_SECRET";
    /// Pre-provisioned user access token.
    pub const USER_ACCESS_TOKEN: &str = "FEISHU_USER_ACCESS_TOKEN";
    /// Rotating user refresh token.
    pub const REFRESH_TOKEN: &str = "FEISHU_REFRESH_TOKEN";
    /// Bitable app token holding the task table.
    pub const TABLE_APP_TOKEN: &str = "TABLE_APP_TOKEN";
    /// Task table id.
    pub const TABLE_ID: &str = "TABLE_ID";
}

/// Layered key=value credential store.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    /// Backing file, if any
    path: Option<PathBuf>,

    /// Values read from the file
    file: BTreeMap<String, String>,

    /// Process environment captured at construction
    environment: HashMap<String, String>,

    /// Values set during this run
    overrides: HashMap<String, String>,
}

impl CredentialStore {
    /// Load the file at `path` (missing file = empty) and snapshot the
    /// process environment.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut store = Self::from_file(path)?;
        store.environment = std::env::vars().collect();
        Ok(store)
    }

    /// Load only the file, ignoring the process environment.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let file = if path.exists() { read_env_file(&path)? } else { BTreeMap::new() };
        tracing::debug!(path = %path.display(), keys = file.len(), "loaded credential file");
        Ok(Self { path: Some(path), file, ..Default::default() })
    }

    /// Build a store without a backing file.
    pub fn in_memory<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            file: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            ..Default::default()
        }
    }

    /// Replace the environment layer.
    pub fn with_environment<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.environment = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Backing file path.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Look up a non-empty value.
    pub fn get(&self, key: &str) -> Option<&str> {
        [&self.overrides, &self.environment]
            .into_iter()
            .find_map(|layer| layer.get(key))
            .or_else(|| self.file.get(key))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Set a value for the rest of this run without writing it to disk.
    pub fn set(&mut self, key: &str, value: &str) {
        self.overrides.insert(key.to_string(), value.to_string());
    }

    /// Forget a value for the rest of this run.
    pub fn clear(&mut self, key: &str) {
        self.overrides.insert(key.to_string(), String::new());
    }

    /// Set values and write them to the backing file.
    pub fn persist(&mut self, updates: &[(&str, &str)]) -> Result<(), ConfigError> {
        for (key, value) in updates {
            self.set(key, value);
        }

        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        let existing = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        let merged = merge_lines(&existing, updates);
        write_atomic(&path, &merged)?;

        for (key, value) in updates {
            self.file.insert((*key).to_string(), (*value).to_string());
        }
        tracing::info!(path = %path.display(), keys = updates.len(), "persisted credentials");
        Ok(())
    }
}

fn read_env_file(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let iter = dotenvy::from_path_iter(path)
        .map_err(|e| ConfigError::EnvFile { path: path.to_path_buf(), message: e.to_string() })?;

    iter.map(|item| {
        item.map_err(|e| ConfigError::EnvFile { path: path.to_path_buf(), message: e.to_string() })
    })
    .collect()
}

/// Key named by an assignment line, if the line is one.
fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, _) = trimmed.split_once('=')?;
    Some(key.trim())
}

/// Merge `updates` into key=value `content`.
///
/// The first line assigning a key is replaced, later assignments of the
/// same key are dropped, and keys not present are appended in order.
pub fn merge_lines(content: &str, updates: &[(&str, &str)]) -> String {
    let mut written: Vec<&str> = Vec::new();
    let mut out = String::with_capacity(content.len() + 64);

    for line in content.lines() {
        let update = line_key(line).and_then(|key| updates.iter().find(|(k, _)| *k == key));
        match update {
            Some((key, value)) if !written.contains(key) => {
                out.push_str(&format!("{key}={value}\n"));
                written.push(key);
            }
            Some(_) => {}
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    for (key, value) in updates {
        if !written.contains(key) {
            out.push_str(&format!("{key}={value}\n"));
            written.push(key);
        }
    }

    out
}

fn write_atomic(path: &Path, content: &str) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io { path: path.to_path_buf(), source };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
    tmp.write_all(content.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
