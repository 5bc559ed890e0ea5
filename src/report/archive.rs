//! Local results directory.
//!
//! Layout:
//! - `<root>/<stock_code>/<YYYY-MM-DD>/tradingagents_analysis_<code>_<ts>.txt`
//! - `<root>/reports/analysis_<code>_<ts>.{html,md}`

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use url::Url;

/// Name of the local report directory under the results root.
pub const REPORTS_DIR: &str = "reports";

/// Paths of a written local report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReport {
    pub html_path: PathBuf,
    pub markdown_path: PathBuf,
}

impl LocalReport {
    /// `file://` URI of the HTML file.
    pub fn link(&self) -> String {
        file_uri(&self.html_path)
    }
}

/// Percent-encoded `file://` URI for a path, made absolute first.
pub fn file_uri(path: &Path) -> String {
    let absolute = fs::canonicalize(path)
        .or_else(|_| std::env::current_dir().map(|cwd| cwd.join(path)))
        .unwrap_or_else(|_| path.to_path_buf());
    Url::from_file_path(&absolute).map_or_else(
        |()| format!("file://{}", absolute.to_string_lossy().replace('\\', "/")),
        String::from,
    )
}

/// Keep a stock code usable as one path component.
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "unknown".to_string(),
        s => s.to_string(),
    }
}

/// Writes analysis results and local reports under one root.
#[derive(Debug, Clone)]
pub struct ResultsArchive {
    root: PathBuf,
}

impl ResultsArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join(REPORTS_DIR)
    }

    /// Archive an analysis under the stock's dated directory.
    pub fn save_analysis(
        &self,
        stock_code: &str,
        content: &str,
        at: DateTime<Local>,
    ) -> io::Result<PathBuf> {
        let code = sanitize_component(stock_code);
        let dir = self.root.join(&code).join(at.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!(
            "tradingagents_analysis_{code}_{}.txt",
            at.format("%Y%m%d_%H%M%S")
        ));
        fs::write(&path, content)?;
        tracing::info!(path = %path.display(), "archived analysis result");
        Ok(path)
    }

    /// Write the HTML and Markdown versions of a report.
    pub fn write_report(
        &self,
        stock_code: &str,
        timestamp: &str,
        html: &str,
        markdown: &str,
    ) -> io::Result<LocalReport> {
        let dir = self.reports_dir();
        fs::create_dir_all(&dir)?;

        let stem = format!("analysis_{}_{timestamp}", sanitize_component(stock_code));
        let html_path = dir.join(format!("{stem}.html"));
        let markdown_path = dir.join(format!("{stem}.md"));
        fs::write(&html_path, html)?;
        fs::write(&markdown_path, markdown)?;

        tracing::info!(path = %html_path.display(), "wrote local report");
        Ok(LocalReport { html_path, markdown_path })
    }
}
