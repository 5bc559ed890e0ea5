//! Task rows and the store they live in.

use chrono::{Local, Utc};
use serde_json::{Map, Value};

use super::status::{StatusLabels, TaskStatus};
use crate::core::FieldsConfig;
use crate::integrations::{link_cell, BitableClient, FeishuResult, Record, UpdateOutcome};

/// A row of the task table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub row_id: String,
    pub stock_code: String,
    pub display_name: String,
    pub status: TaskStatus,
    pub reply_link: Option<String>,
}

impl TaskRow {
    /// Has a stock code and has not been started.
    pub fn is_pending(&self) -> bool {
        !self.stock_code.trim().is_empty() && self.status == TaskStatus::Pending
    }
}

/// Rows fetched in one listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    pub rows: Vec<TaskRow>,
    /// False when the remote reported more rows than were fetched
    pub complete: bool,
}

/// Where task rows are read from and written back to.
pub trait TaskStore {
    /// Rows eligible for processing, in remote order.
    fn fetch_pending(&self) -> FeishuResult<Scan>;

    /// Every row, in remote order.
    fn fetch_all(&self) -> FeishuResult<Scan>;

    /// Write `status` and the request timestamp, plus `link` if given.
    ///
    /// A rejected link is dropped so the status still lands.
    fn write_status(
        &self,
        row_id: &str,
        status: &TaskStatus,
        link: Option<&str>,
    ) -> FeishuResult<UpdateOutcome>;

    /// Clear status and link so the row is picked up again.
    fn reset_row(&self, row_id: &str) -> FeishuResult<()>;
}

/// [`TaskStore`] backed by a bitable table.
#[derive(Debug, Clone)]
pub struct BitableTaskStore {
    client: BitableClient,
    fields: FieldsConfig,
    labels: StatusLabels,
    link_text: String,
    page_size: u32,
}

impl BitableTaskStore {
    pub fn new(
        client: BitableClient,
        fields: FieldsConfig,
        labels: StatusLabels,
        link_text: &str,
        page_size: u32,
    ) -> Self {
        Self { client, fields, labels, link_text: link_text.to_string(), page_size }
    }

    fn to_row(&self, record: &Record) -> TaskRow {
        TaskRow {
            row_id: record.record_id.clone(),
            stock_code: record.text(&self.fields.stock_code).unwrap_or_default(),
            display_name: record.text(&self.fields.stock_name).unwrap_or_default(),
            status: self.labels.parse(record.text(&self.fields.status).as_deref()),
            reply_link: record.link(&self.fields.reply_link),
        }
    }

    fn base_fields(&self, status_label: String) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(self.fields.status.clone(), Value::String(status_label));
        fields.insert(self.fields.requested_at.clone(), Value::from(Utc::now().timestamp_millis()));
        fields
    }
}

impl TaskStore for BitableTaskStore {
    fn fetch_pending(&self) -> FeishuResult<Scan> {
        let page = self.client.list_pending(
            self.page_size,
            &self.fields.stock_code,
            &self.fields.status,
            self.labels.pending_values(),
        )?;
        Ok(Scan { rows: page.rows.iter().map(|r| self.to_row(r)).collect(), complete: !page.has_more })
    }

    fn fetch_all(&self) -> FeishuResult<Scan> {
        let page = self.client.list_rows(self.page_size)?;
        Ok(Scan { rows: page.rows.iter().map(|r| self.to_row(r)).collect(), complete: !page.has_more })
    }

    fn write_status(
        &self,
        row_id: &str,
        status: &TaskStatus,
        link: Option<&str>,
    ) -> FeishuResult<UpdateOutcome> {
        let mut fields = self.base_fields(self.labels.label(status));
        if let Some(url) = link {
            let text = format!("{}_{}", self.link_text, Local::now().format("%Y%m%d_%H%M%S"));
            fields.insert(self.fields.reply_link.clone(), link_cell(&text, url));
        }

        tracing::info!(row_id, %status, "writing status");
        let outcome = self.client.update_row_degrading(row_id, &fields, &self.fields.reply_link)?;
        if let UpdateOutcome::Degraded { reason, .. } = &outcome {
            tracing::warn!(row_id, %reason, "status written without link");
        }
        Ok(outcome)
    }

    fn reset_row(&self, row_id: &str) -> FeishuResult<()> {
        let mut fields = self.base_fields(self.labels.label(&TaskStatus::Pending));
        fields.insert(self.fields.reply_link.clone(), Value::String(String::new()));
        self.client.update_row_degrading(row_id, &fields, &self.fields.reply_link)?;
        tracing::info!(row_id, "row reset");
        Ok(())
    }
}
