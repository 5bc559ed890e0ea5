//! Bitable table client.
//!
//! Rows are addressed by the opaque `record_id` the remote store assigns.
//! Cell values come back in several shapes (plain text, numbers, rich-text
//! segments, link objects) and are read tolerantly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::auth::{Identity, TokenProvider};
use super::error::{FeishuError, FeishuResult};
use super::http::{ApiRequest, Method};
use crate::core::TableTarget;

/// A table row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub record_id: String,

    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Text of a cell, if it has any.
    pub fn text(&self, field: &str) -> Option<String> {
        self.fields.get(field).and_then(cell_text)
    }

    /// URL held by a link cell.
    pub fn link(&self, field: &str) -> Option<String> {
        self.fields.get(field).and_then(cell_link)
    }
}

/// One page of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowPage {
    pub rows: Vec<Record>,
    pub has_more: bool,
    pub page_token: Option<String>,
}

/// A table of the bitable app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub revision: Option<i64>,
}

/// A column of the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    #[serde(default)]
    pub field_id: String,
    pub field_name: String,
    #[serde(rename = "type", default)]
    pub field_type: i64,
}

/// How an update was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Every field was written.
    Full,
    /// The named field was rejected and dropped; the rest was written.
    Degraded { dropped: String, reason: String },
}

/// Read a cell as text.
///
/// Accepts strings, numbers, booleans, rich-text segment arrays and
/// objects carrying `text`, `name` or `link`.
pub fn cell_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items.iter().filter_map(cell_text).collect::<Vec<_>>().join(""),
        Value::Object(map) => ["text", "name", "link"]
            .iter()
            .find_map(|key| map.get(*key).and_then(cell_text))
            .unwrap_or_default(),
        Value::Null => String::new(),
    };
    Some(text).filter(|t| !t.is_empty())
}

/// Read the URL of a link cell.
pub fn cell_link(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.get("link").and_then(Value::as_str).map(str::to_string),
        Value::Array(items) => items.iter().find_map(cell_link),
        Value::String(s) if s.contains("://") => Some(s.trim().to_string()),
        _ => None,
    }
    .filter(|l| !l.is_empty())
}

/// Link cell payload.
pub fn link_cell(text: &str, url: &str) -> Value {
    json!({ "text": text, "link": url })
}

/// Whether a row should be picked up.
///
/// `required_field` must hold text, and `status_field` must be empty or
/// one of `pending_values`.
pub fn is_pending(
    record: &Record,
    required_field: &str,
    status_field: &str,
    pending_values: &[String],
) -> bool {
    if record.text(required_field).is_none() {
        return false;
    }
    match record.text(status_field) {
        None => true,
        Some(status) => pending_values.iter().any(|p| p.trim() == status),
    }
}

/// Take the list under `key` from a `data` object.
///
/// A `null` list, or a missing one on an empty table, is an empty list.
/// Anything else missing is an error naming the keys that were present.
fn extract_list(data: &Value, key: &str) -> FeishuResult<Vec<Value>> {
    match data.get(key) {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::Null) => Ok(Vec::new()),
        Some(other) => Err(FeishuError::InvalidResponse(format!(
            "`data.{key}` is not a list: {other}"
        ))),
        None if data.get("total").and_then(Value::as_i64) == Some(0) => Ok(Vec::new()),
        None => {
            let present = data
                .as_object()
                .map(|m| m.keys().cloned().collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            Err(FeishuError::InvalidResponse(format!(
                "row list `data.{key}` missing; present keys: [{present}]"
            )))
        }
    }
}

fn parse_items<T: for<'de> Deserialize<'de>>(items: Vec<Value>) -> FeishuResult<Vec<T>> {
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| FeishuError::InvalidResponse(format!("unexpected item shape: {e}")))
        })
        .collect()
}

fn parse_record(body: &Value) -> FeishuResult<Record> {
    let record = body
        .pointer("/data/record")
        .cloned()
        .ok_or_else(|| FeishuError::InvalidResponse("response carries no data.record".into()))?;
    serde_json::from_value(record)
        .map_err(|e| FeishuError::InvalidResponse(format!("unexpected record shape: {e}")))
}

/// Client for one bitable table.
#[derive(Debug, Clone)]
pub struct BitableClient {
    tokens: Arc<TokenProvider>,
    target: TableTarget,
    list_field: String,
    identity: Identity,
}

impl BitableClient {
    pub fn new(tokens: Arc<TokenProvider>, target: TableTarget, list_field: &str) -> Self {
        Self { tokens, target, list_field: list_field.to_string(), identity: Identity::App }
    }

    /// Call with a different identity.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn target(&self) -> &TableTarget {
        &self.target
    }

    fn app_url(&self, rest: &str) -> String {
        self.tokens.http().url(&format!("bitable/v1/apps/{}/{rest}", self.target.app_token))
    }

    fn records_url(&self) -> String {
        self.app_url(&format!("tables/{}/records", self.target.table_id))
    }

    fn record_url(&self, record_id: &str) -> String {
        format!("{}/{record_id}", self.records_url())
    }

    fn call(&self, request: ApiRequest) -> FeishuResult<Value> {
        self.tokens.call_as(self.identity, request)
    }

    /// Tables of the bitable app.
    pub fn list_tables(&self) -> FeishuResult<Vec<TableInfo>> {
        let body = self.call(ApiRequest::get(self.app_url("tables")))?;
        parse_items(extract_list(&body["data"], "items")?)
    }

    /// Column schema of the table.
    pub fn list_fields(&self) -> FeishuResult<Vec<FieldInfo>> {
        let url = self.app_url(&format!("tables/{}/fields", self.target.table_id));
        let body = self.call(ApiRequest::get(url))?;
        parse_items(extract_list(&body["data"], "items")?)
    }

    /// First page of rows.
    pub fn list_rows(&self, page_size: u32) -> FeishuResult<RowPage> {
        let request = ApiRequest::get(self.records_url()).with_query("page_size", page_size);
        let body = self.call(request)?;
        let data = &body["data"];

        let rows = parse_items(extract_list(data, &self.list_field)?)?;
        let has_more = data.get("has_more").and_then(Value::as_bool).unwrap_or(false);
        let page_token = data
            .get("page_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        tracing::debug!(rows = rows.len(), has_more, "listed rows");
        Ok(RowPage { rows, has_more, page_token })
    }

    /// First page of rows, filtered to pending ones in remote order.
    pub fn list_pending(
        &self,
        page_size: u32,
        required_field: &str,
        status_field: &str,
        pending_values: &[String],
    ) -> FeishuResult<RowPage> {
        let mut page = self.list_rows(page_size)?;
        page.rows.retain(|r| is_pending(r, required_field, status_field, pending_values));
        Ok(page)
    }

    pub fn get_row(&self, record_id: &str) -> FeishuResult<Record> {
        let body = self.call(ApiRequest::get(self.record_url(record_id)))?;
        parse_record(&body)
    }

    pub fn create_row(&self, fields: Map<String, Value>) -> FeishuResult<Record> {
        let request =
            ApiRequest::post(self.records_url()).with_json(json!({ "fields": fields }));
        let record = parse_record(&self.call(request)?)?;
        tracing::info!(record_id = %record.record_id, "created row");
        Ok(record)
    }

    pub fn delete_row(&self, record_id: &str) -> FeishuResult<()> {
        self.call(ApiRequest::new(Method::Delete, self.record_url(record_id)))?;
        tracing::info!(record_id, "deleted row");
        Ok(())
    }

    /// Partial update: only the named fields change.
    pub fn update_row(&self, record_id: &str, fields: &Map<String, Value>) -> FeishuResult<()> {
        let request = ApiRequest::new(Method::Put, self.record_url(record_id))
            .with_json(json!({ "fields": fields }));
        self.call(request)?;
        tracing::debug!(record_id, fields = fields.len(), "updated row");
        Ok(())
    }

    /// Partial update that retries once without `droppable_field` when the
    /// remote rejects the payload.
    pub fn update_row_degrading(
        &self,
        record_id: &str,
        fields: &Map<String, Value>,
        droppable_field: &str,
    ) -> FeishuResult<UpdateOutcome> {
        match self.update_row(record_id, fields) {
            Ok(()) => Ok(UpdateOutcome::Full),
            Err(err @ FeishuError::RemoteApplication { .. }) if fields.contains_key(droppable_field) => {
                tracing::warn!(
                    record_id,
                    field = droppable_field,
                    error = %err,
                    "update rejected, retrying without field"
                );
                let mut reduced = fields.clone();
                reduced.remove(droppable_field);
                self.update_row(record_id, &reduced)?;
                Ok(UpdateOutcome::Degraded {
                    dropped: droppable_field.to_string(),
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }
}
