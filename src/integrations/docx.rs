//! Document (docx) client.

use std::sync::Arc;

use serde_json::{json, Value};

use super::auth::{Identity, TokenProvider};
use super::error::{FeishuError, FeishuResult};
use super::http::ApiRequest;

const BUILTIN_IMPORT_PATH: &str = "docx/builtin/import";
const DOCUMENTS_PATH: &str = "docx/v1/documents";

/// Client for creating documents.
#[derive(Debug, Clone)]
pub struct DocxClient {
    tokens: Arc<TokenProvider>,
    identity: Identity,
    doc_base_url: String,
}

impl DocxClient {
    pub fn new(tokens: Arc<TokenProvider>, identity: Identity, doc_base_url: &str) -> Self {
        Self { tokens, identity, doc_base_url: doc_base_url.trim_end_matches('/').to_string() }
    }

    /// Browser link of a document.
    pub fn document_link(&self, document_id: &str) -> String {
        format!("{}/{document_id}", self.doc_base_url)
    }

    /// Create a document from Markdown in one call.
    pub fn import_markdown(&self, file_name: &str, markdown: &str) -> FeishuResult<String> {
        let request = ApiRequest::post(self.tokens.http().url(BUILTIN_IMPORT_PATH))
            .with_json(json!({ "file_name": file_name, "markdown": markdown }));
        let body = self.tokens.call_as(self.identity, request)?;
        document_id(&body)
    }

    /// Create an empty document.
    pub fn create_document(&self, title: &str) -> FeishuResult<String> {
        let request = ApiRequest::post(self.tokens.http().url(DOCUMENTS_PATH))
            .with_json(json!({ "title": title }));
        let body = self.tokens.call_as(self.identity, request)?;
        document_id(&body)
    }

    /// Import Markdown into an existing document.
    pub fn import_into(&self, document_id: &str, markdown: &str) -> FeishuResult<()> {
        let url = self.tokens.http().url(&format!("{DOCUMENTS_PATH}/{document_id}/import"));
        let request = ApiRequest::post(url).with_json(json!({ "markdown": markdown }));
        self.tokens.call_as(self.identity, request)?;
        Ok(())
    }
}

/// Document id at `data.document_id` or `data.document.document_id`.
fn document_id(body: &Value) -> FeishuResult<String> {
    ["/data/document_id", "/data/document/document_id"]
        .iter()
        .find_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FeishuError::InvalidResponse("response carries no document_id".to_string()))
}
