//! Batch processing of pending rows.
//!
//! Each row is claimed, analyzed, rendered, published and finalized in
//! turn. Rows are independent: a failure is written to its row and the run
//! moves on. Only a failed scan aborts the run.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;

use super::scanner::TaskScanner;
use super::status::TaskStatus;
use super::store::{TaskRow, TaskStore};
use crate::analysis::Analyzer;
use crate::integrations::{FeishuResult, UpdateOutcome};
use crate::report::{render_markdown, DocumentPublisher, PublishRequest, ReportContext, ResultsArchive};

/// Run options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Pause between consecutive rows
    pub throttle: Duration,

    /// Reset a row when nothing is pending, so there is always work
    pub demo: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { throttle: Duration::from_secs(5), demo: false }
    }
}

/// What happened to a single row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    pub row_id: String,
    pub stock_code: String,
    pub status: TaskStatus,
    pub link: Option<String>,
    /// Publishing tier that produced the link
    pub tier: Option<String>,
    pub publish_degraded: bool,
}

impl RowOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Done
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub found: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Rows not reached because the run was stopped
    pub skipped: usize,
    pub incomplete_scan: bool,
    pub demo_reset: Option<String>,
    pub stopped: bool,
    pub outcomes: Vec<RowOutcome>,
}

impl RunSummary {
    pub fn is_successful(&self) -> bool {
        self.failed == 0
    }

    /// Format as human-readable summary.
    pub fn to_summary_string(&self) -> String {
        let mut summary = String::new();
        let _ = writeln!(
            summary,
            "Rows: {} found, {} done, {} failed, {} skipped",
            self.found, self.succeeded, self.failed, self.skipped
        );
        if let Some(row) = &self.demo_reset {
            let _ = writeln!(summary, "Demo mode reset row {row}");
        }
        if self.incomplete_scan {
            let _ = writeln!(summary, "Warning: only the first page of the table was scanned");
        }
        if self.stopped {
            let _ = writeln!(summary, "Run was interrupted");
        }

        for outcome in &self.outcomes {
            let mark = if outcome.succeeded() { "✓" } else { "✗" };
            match (&outcome.status, &outcome.link) {
                (TaskStatus::Failed(reason), _) => {
                    let _ = writeln!(summary, "  {mark} {} ({}): {reason}", outcome.stock_code, outcome.row_id);
                }
                (_, Some(link)) => {
                    let _ = writeln!(summary, "  {mark} {} ({}): {link}", outcome.stock_code, outcome.row_id);
                }
                _ => {
                    let _ = writeln!(summary, "  {mark} {} ({})", outcome.stock_code, outcome.row_id);
                }
            }
        }
        summary
    }
}

/// Drives rows through analysis and publishing.
pub struct Orchestrator<'a> {
    store: &'a dyn TaskStore,
    analyzer: &'a dyn Analyzer,
    publisher: &'a DocumentPublisher,
    archive: &'a ResultsArchive,
    options: RunOptions,
    stop: Arc<AtomicBool>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a dyn TaskStore,
        analyzer: &'a dyn Analyzer,
        publisher: &'a DocumentPublisher,
        archive: &'a ResultsArchive,
        options: RunOptions,
    ) -> Self {
        Self { store, analyzer, publisher, archive, options, stop: Arc::new(AtomicBool::new(false)) }
    }

    /// Share a stop flag, checked before each row and during the throttle.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Process every pending row once.
    pub fn run(&self) -> FeishuResult<RunSummary> {
        let scanner = TaskScanner::new(self.store);
        let mut summary = RunSummary::default();

        let mut scan = scanner.scan()?;
        if scan.rows.is_empty() && self.options.demo {
            if let Some(row) = scanner.reset(None)? {
                tracing::info!(row_id = %row.row_id, code = %row.stock_code, "demo mode reset a row");
                summary.demo_reset = Some(row.row_id);
                scan = scanner.scan()?;
            }
        }

        summary.found = scan.rows.len();
        summary.incomplete_scan = !scan.complete;
        if scan.rows.is_empty() {
            tracing::info!("no pending rows");
            return Ok(summary);
        }

        let total = scan.rows.len();
        for (index, row) in scan.rows.iter().enumerate() {
            if self.stopped() {
                summary.stopped = true;
                summary.skipped = total - index;
                tracing::warn!(remaining = summary.skipped, "stop requested, leaving remaining rows");
                break;
            }

            tracing::info!(progress = %format!("{}/{total}", index + 1), code = %row.stock_code, "processing row");
            let outcome = self.process(row);
            if outcome.succeeded() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            summary.outcomes.push(outcome);

            if index + 1 < total {
                self.pause();
            }
        }

        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "run finished"
        );
        Ok(summary)
    }

    fn pause(&self) {
        let deadline = Instant::now() + self.options.throttle;
        while !self.stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(100)));
        }
    }

    /// Process a single row. Never fails: errors end up on the row.
    pub fn process(&self, row: &TaskRow) -> RowOutcome {
        let mut outcome = RowOutcome {
            row_id: row.row_id.clone(),
            stock_code: row.stock_code.clone(),
            status: TaskStatus::InProgress,
            link: None,
            tier: None,
            publish_degraded: false,
        };

        if let Err(err) = self.store.write_status(&row.row_id, &TaskStatus::InProgress, None) {
            // Could not claim the row; it stays pending for the next run.
            tracing::error!(row_id = %row.row_id, error = %err, "could not mark row in progress");
            outcome.status = TaskStatus::Failed(err.to_string());
            return outcome;
        }

        match self.analyze_and_publish(row) {
            Ok(published) => {
                outcome.tier = Some(published.tier);
                outcome.publish_degraded = published.degraded;
                match self.store.write_status(&row.row_id, &TaskStatus::Done, Some(&published.link)) {
                    Ok(UpdateOutcome::Full) => {
                        outcome.status = TaskStatus::Done;
                        outcome.link = Some(published.link);
                    }
                    Ok(UpdateOutcome::Degraded { .. }) => outcome.status = TaskStatus::Done,
                    Err(err) => {
                        tracing::error!(row_id = %row.row_id, error = %err, "could not finalize row");
                        outcome.status = self.fail(row, format!("写入结果失败: {err}"));
                    }
                }
            }
            Err(err) => {
                tracing::error!(row_id = %row.row_id, code = %row.stock_code, error = %err, "analysis failed");
                outcome.status = self.fail(row, format!("{err:#}"));
            }
        }
        outcome
    }

    fn fail(&self, row: &TaskRow, reason: String) -> TaskStatus {
        let status = TaskStatus::Failed(reason);
        if let Err(err) = self.store.write_status(&row.row_id, &status, None) {
            tracing::error!(row_id = %row.row_id, error = %err, "could not record failure");
        }
        status
    }

    fn analyze_and_publish(&self, row: &TaskRow) -> anyhow::Result<crate::report::PublishOutcome> {
        let started = Instant::now();
        let trade_date = Local::now().format("%Y-%m-%d").to_string();
        let result = self.analyzer.analyze(&row.stock_code, &trade_date)?;

        let generated_at = Local::now();
        let ctx = ReportContext {
            stock_code: &row.stock_code,
            stock_name: &row.display_name,
            trade_date: &trade_date,
            generated_at,
            elapsed: started.elapsed(),
            engine: self.analyzer.name(),
            result: &result,
        };
        let markdown = render_markdown(&ctx);

        if let Err(err) = self.archive.save_analysis(&row.stock_code, &markdown, generated_at) {
            tracing::warn!(error = %err, "could not archive analysis");
        }

        let request = PublishRequest {
            title: ctx.title(),
            stock_code: row.stock_code.clone(),
            stock_name: row.display_name.clone(),
            markdown,
            created_at: generated_at,
        };
        Ok(self.publisher.publish(&request))
    }
}
