//! Open-platform integrations.
//!
//! HTTP transport with retry, the credential lifecycle, and clients for
//! bitable tables and docx documents.

pub mod auth;
pub mod bitable;
pub mod docx;
pub mod error;
pub mod http;

use std::sync::Arc;

pub use auth::{mask, Credential, Identity, TokenProvider};
pub use bitable::{
    cell_link, cell_text, is_pending, link_cell, BitableClient, FieldInfo, Record, RowPage,
    TableInfo, UpdateOutcome,
};
pub use docx::DocxClient;
pub use error::{FeishuError, FeishuResult, INVALID_ACCESS_TOKEN_CODES, REFRESH_REVOKED_CODES};
pub use http::{
    check_envelope, ApiRequest, ApiResponse, FailureKind, HttpClient, HttpTransport, Method,
    ReqwestTransport, TransportFailure,
};

use crate::core::Settings;

/// Build the shared token provider over the real network transport.
pub fn connect(settings: &Settings) -> FeishuResult<Arc<TokenProvider>> {
    let feishu = &settings.config.feishu;
    let transport = ReqwestTransport::new(feishu.timeout())?;
    Ok(connect_with(settings, Arc::new(transport)))
}

/// Build the shared token provider over a given transport.
pub fn connect_with(settings: &Settings, transport: Arc<dyn HttpTransport>) -> Arc<TokenProvider> {
    let feishu = &settings.config.feishu;
    let http = HttpClient::new(transport, &feishu.base_url, feishu.retry());
    TokenProvider::new(http, settings.app.clone(), feishu.clone(), settings.credentials.clone())
        .into_shared()
}
