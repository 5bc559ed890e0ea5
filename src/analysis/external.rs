//! Analysis framework run as a child process.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context};

use super::{AnalysisResult, Analyzer};
use crate::core::AnalyzerConfig;

/// Runs the configured command and reads `{ "state": .., "decision": .. }`
/// from its stdout.
///
/// `{company}` and `{date}` in the arguments are substituted. There is no
/// timeout: a hung child blocks the run.
#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandAnalyzer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args, working_dir: None }
    }

    /// Build from config; `None` when no command is configured.
    pub fn from_config(config: &AnalyzerConfig) -> Option<Self> {
        let program = config.command.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
        Some(Self {
            program: program.to_string(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
        })
    }

    fn render_args(&self, company: &str, trade_date: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace("{company}", company).replace("{date}", trade_date))
            .collect()
    }
}

impl Analyzer for CommandAnalyzer {
    fn name(&self) -> &str {
        &self.program
    }

    fn analyze(&self, company: &str, trade_date: &str) -> anyhow::Result<AnalysisResult> {
        let args = self.render_args(company, trade_date);
        tracing::info!(program = %self.program, ?args, "running analysis command");

        let mut command = Command::new(&self.program);
        command.args(&args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .with_context(|| format!("failed to start analysis command `{}`", self.program))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            bail!(
                "analysis command exited with {}: {}",
                output.status,
                tail(&stderr, 10)
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_output(&stdout).with_context(|| {
            format!("analysis command printed no result document; stderr: {}", tail(&stderr, 10))
        })
    }
}

/// Parse stdout as one JSON document, else take the last line that is one.
fn parse_output(stdout: &str) -> anyhow::Result<AnalysisResult> {
    if let Ok(result) = serde_json::from_str(stdout.trim()) {
        return Ok(result);
    }

    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
        .context("stdout holds no JSON object")
}

fn tail(text: &str, lines: usize) -> String {
    let collected: Vec<&str> = text.lines().collect();
    let start = collected.len().saturating_sub(lines);
    collected[start..].join("\n")
}
