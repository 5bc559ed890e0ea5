//! HTTP plumbing for open-platform calls.
//!
//! [`HttpTransport`] is the seam between request logic and the network so
//! tests can script responses. [`HttpClient`] adds the retry policy and the
//! response envelope check on top of a transport.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::error::{FeishuError, FeishuResult};
use crate::core::{retry_if, RetryConfig, RetryResult};

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A JSON request to the open platform.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), query: Vec::new(), bearer: None, body: None }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    /// Attach a JSON body.
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a query parameter.
    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Send with a bearer token.
    pub fn with_bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }
}

/// Raw response from a transport.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    /// Build a 200 response carrying `value`.
    pub fn json(value: &Value) -> Self {
        Self::new(200, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// How a transport failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request timed out.
    Timeout,
    /// The connection could not be established or was dropped.
    Connect,
    /// Anything else (bad URL, TLS setup, body decoding).
    Other,
}

/// A network-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn timeout() -> Self {
        Self::new(FailureKind::Timeout, "request timed out")
    }

    /// Timeouts and connection errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Timeout | FailureKind::Connect)
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Sends one request and returns the raw response.
pub trait HttpTransport: Send + Sync {
    fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportFailure>;
}

/// Blocking reqwest transport with a fixed per-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> FeishuResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("larkflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FeishuError::Transport { attempts: 0, message: e.to_string() })?;
        Ok(Self { client })
    }

    fn map_error(err: &reqwest::Error) -> TransportFailure {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if err.is_connect() || err.is_request() {
            FailureKind::Connect
        } else {
            FailureKind::Other
        };
        TransportFailure::new(kind, err.to_string())
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportFailure> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().map_err(|e| Self::map_error(&e))?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| Self::map_error(&e))?;
        Ok(ApiResponse { status, body })
    }
}

/// Check the `{code, msg, data}` envelope and return the whole body.
pub fn check_envelope(response: &ApiResponse) -> FeishuResult<Value> {
    let value: Value = serde_json::from_str(&response.body).map_err(|e| {
        FeishuError::InvalidResponse(format!(
            "HTTP {} with non-JSON body ({e}): {}",
            response.status,
            truncate(&response.body, 200)
        ))
    })?;

    let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        let message = value
            .get("msg")
            .or_else(|| value.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(FeishuError::RemoteApplication { code, message });
    }

    if !response.is_success() {
        return Err(FeishuError::RemoteApplication {
            code: i64::from(response.status),
            message: format!("HTTP {}", response.status),
        });
    }

    Ok(value)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Transport plus retry policy and base URL.
#[derive(Clone)]
pub struct HttpClient {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    retry: RetryConfig,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: &str, retry: RetryConfig) -> Self {
        Self { transport, base_url: base_url.trim_end_matches('/').to_string(), retry }
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send with linear backoff on transport failures, keeping the attempt log.
    pub fn send(&self, request: &ApiRequest) -> RetryResult<ApiResponse, TransportFailure> {
        retry_if(&self.retry, TransportFailure::is_retryable, |attempt| {
            tracing::debug!(method = %request.method, url = %request.url, attempt, "sending request");
            let result = self.transport.execute(request);
            if let Err(failure) = &result {
                tracing::warn!(url = %request.url, attempt, %failure, "request failed");
            }
            result
        })
    }

    /// Send with retry on transport failures only.
    ///
    /// Well-formed error responses are returned as they are, after a
    /// single attempt.
    pub fn request_with_retry(&self, request: &ApiRequest) -> FeishuResult<ApiResponse> {
        let outcome = self.send(request);
        let attempts = outcome.attempts;
        outcome.into_result().map_err(|failure| FeishuError::Transport {
            attempts,
            message: failure.to_string(),
        })
    }

    /// Send, then check the response envelope.
    pub fn call(&self, request: &ApiRequest) -> FeishuResult<Value> {
        let response = self.request_with_retry(request)?;
        let value = check_envelope(&response);
        if let Err(err) = &value {
            tracing::warn!(method = %request.method, url = %request.url, error = %err, "remote call rejected");
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Replays scripted outcomes and counts calls.
    struct Scripted {
        outcomes: Mutex<Vec<Result<ApiResponse, TransportFailure>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<Result<ApiResponse, TransportFailure>>) -> Arc<Self> {
            outcomes.reverse();
            Arc::new(Self { outcomes: Mutex::new(outcomes), calls: Mutex::new(0) })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    impl HttpTransport for Scripted {
        fn execute(&self, _request: &ApiRequest) -> Result<ApiResponse, TransportFailure> {
            *self.calls.lock() += 1;
            self.outcomes
                .lock()
                .pop()
                .unwrap_or_else(|| Err(TransportFailure::new(FailureKind::Other, "script exhausted")))
        }
    }

    fn client(transport: Arc<Scripted>) -> HttpClient {
        HttpClient::new(transport, "https://open.example.com/open-apis/", RetryConfig::linear(3, Duration::from_millis(1)))
    }

    #[test]
    fn test_url_joining() {
        let http = client(Scripted::new(vec![]));
        assert_eq!(http.url("/auth/v3/x"), "https://open.example.com/open-apis/auth/v3/x");
        assert_eq!(http.url("docx/v1"), "https://open.example.com/open-apis/docx/v1");
    }

    #[test]
    fn test_json_body_is_kept() {
        let request = ApiRequest::post("https://x").with_json(json!({ "fields": { "a": 1 } }));
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.body, Some(json!({ "fields": { "a": 1 } })));
    }

    #[test]
    fn test_two_timeouts_then_success() {
        let transport = Scripted::new(vec![
            Err(TransportFailure::timeout()),
            Err(TransportFailure::timeout()),
            Ok(ApiResponse::json(&json!({"code": 0, "data": {"ok": true}}))),
        ]);
        let http = client(Arc::clone(&transport));

        let outcome = http.send(&ApiRequest::get(http.url("x")));
        assert!(outcome.is_ok());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(transport.calls(), 3);
        assert!(outcome.delays.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(outcome.delays.len(), 2);
    }

    #[test]
    fn test_application_error_is_not_retried() {
        let transport = Scripted::new(vec![Ok(ApiResponse::json(
            &json!({"code": 99_991_663, "msg": "invalid access token"}),
        ))]);
        let http = client(Arc::clone(&transport));

        let err = http.call(&ApiRequest::get(http.url("x"))).unwrap_err();
        assert_eq!(transport.calls(), 1);
        assert!(err.is_invalid_access_token());
    }

    #[test]
    fn test_exhausted_attempts_is_transport_error() {
        let transport = Scripted::new(vec![
            Err(TransportFailure::new(FailureKind::Connect, "refused")),
            Err(TransportFailure::new(FailureKind::Connect, "refused")),
            Err(TransportFailure::new(FailureKind::Connect, "refused")),
        ]);
        let http = client(Arc::clone(&transport));

        let err = http.request_with_retry(&ApiRequest::get(http.url("x"))).unwrap_err();
        assert!(matches!(err, FeishuError::Transport { attempts: 3, .. }));
    }

    #[test]
    fn test_other_failures_are_not_retried() {
        let transport = Scripted::new(vec![Err(TransportFailure::new(FailureKind::Other, "bad url"))]);
        let http = client(Arc::clone(&transport));

        let err = http.request_with_retry(&ApiRequest::get(http.url("x"))).unwrap_err();
        assert!(matches!(err, FeishuError::Transport { attempts: 1, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_envelope_non_json_body() {
        let err = check_envelope(&ApiResponse::new(502, "<html>bad gateway</html>")).unwrap_err();
        assert!(matches!(err, FeishuError::InvalidResponse(ref m) if m.contains("502")));
    }

    #[test]
    fn test_envelope_http_error_without_code() {
        let err = check_envelope(&ApiResponse::new(404, "{}")).unwrap_err();
        assert_eq!(err.remote_code(), Some(404));
    }

    #[test]
    fn test_envelope_success_without_code() {
        let value = check_envelope(&ApiResponse::json(&json!({"app_access_token": "t"}))).unwrap();
        assert_eq!(value["app_access_token"], "t");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("飞书开放平台", 2), "飞书...");
        assert_eq!(truncate("abc", 5), "abc");
    }
}
