//! Application and user credential lifecycle.
//!
//! The application credential is issued once per session and cached. The
//! user credential is a rotating access/refresh pair: every refresh
//! returns a new refresh value and the old one is dead, so the new value
//! is persisted before the access value is handed out.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{FeishuError, FeishuResult};
use super::http::{ApiRequest, HttpClient};
use crate::core::{keys, AppCredentials, CredentialStore, FeishuConfig};

const APP_TOKEN_PATH: &str = "auth/v3/app_access_token/internal/";
const USER_TOKEN_PATH: &str = "authen/v1/access_token";
const REFRESH_PATH: &str = "authen/v1/refresh_access_token";
const AUTHORIZE_PATH: &str = "authen/v1/index";

/// Whose permissions a call is made with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Identity {
    /// The application itself
    #[default]
    App,
    /// The human who authorized the application
    User,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App => f.write_str("app"),
            Self::User => f.write_str("user"),
        }
    }
}

/// An issued access credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub kind: Identity,
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(kind: Identity, value: impl Into<String>) -> Self {
        Self { kind, value: value.into(), expires_at: None }
    }

    /// Whether the credential is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Token prefix safe for logs.
    pub fn masked(&self) -> String {
        mask(&self.value)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("value", &self.masked())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// First 10 characters of a secret followed by `...`.
pub fn mask(secret: &str) -> String {
    let prefix: String = secret.chars().take(10).collect();
    format!("{prefix}...")
}

/// Issues, caches and rotates credentials.
pub struct TokenProvider {
    http: HttpClient,
    app: AppCredentials,
    feishu: FeishuConfig,
    store: Mutex<CredentialStore>,
    app_token: Mutex<Option<Credential>>,
    user_token: Mutex<Option<Credential>>,
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProvider").field("app", &self.app).finish_non_exhaustive()
    }
}

impl TokenProvider {
    /// Create a provider. A pre-provisioned user access token in the store
    /// seeds the user cache.
    pub fn new(
        http: HttpClient,
        app: AppCredentials,
        feishu: FeishuConfig,
        store: CredentialStore,
    ) -> Self {
        let seeded = store
            .get(keys::USER_ACCESS_TOKEN)
            .map(|value| Credential::new(Identity::User, value));

        Self {
            http,
            app,
            feishu,
            store: Mutex::new(store),
            app_token: Mutex::new(None),
            user_token: Mutex::new(seeded),
        }
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Current value of a credential key.
    pub fn stored(&self, key: &str) -> Option<String> {
        self.store.lock().get(key).map(str::to_string)
    }

    /// Application credential, issued on first use.
    pub fn get_app_token(&self) -> FeishuResult<Credential> {
        if let Some(cached) = self.app_token.lock().clone() {
            return Ok(cached);
        }

        let request = ApiRequest::post(self.http.url(APP_TOKEN_PATH))
            .with_json(json!({ "app_id": self.app.app_id, "app_secret": self.app.app_secret }));

        let body = self.http.call(&request).map_err(|err| match err {
            FeishuError::RemoteApplication { code, message } => {
                FeishuError::Auth(format!("app token request rejected ({code}): {message}"))
            }
            other => other,
        })?;

        let value = body
            .get("app_access_token")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| FeishuError::Auth("response carries no app_access_token".to_string()))?;

        let mut credential = Credential::new(Identity::App, value);
        credential.expires_at = body
            .get("expire")
            .and_then(Value::as_i64)
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs));

        tracing::info!(token = %credential.masked(), "issued app access token");
        *self.app_token.lock() = Some(credential.clone());
        Ok(credential)
    }

    /// User credential: cached value, else a refresh rotation.
    pub fn get_user_token(&self) -> FeishuResult<Credential> {
        let cached = self.user_token.lock().clone();
        match cached {
            Some(credential) if !credential.is_expired_at(Utc::now()) => Ok(credential),
            Some(_) => {
                tracing::info!("user access token expired, refreshing");
                self.refresh_user_token()
            }
            None => self.refresh_user_token(),
        }
    }

    /// Credential for the given identity.
    pub fn token_for(&self, identity: Identity) -> FeishuResult<Credential> {
        match identity {
            Identity::App => self.get_app_token(),
            Identity::User => self.get_user_token(),
        }
    }

    /// Drop the cached credential so the next call re-acquires it.
    pub fn invalidate(&self, identity: Identity) {
        match identity {
            Identity::App => *self.app_token.lock() = None,
            Identity::User => {
                *self.user_token.lock() = None;
                self.store.lock().clear(keys::USER_ACCESS_TOKEN);
            }
        }
        tracing::debug!(%identity, "invalidated cached credential");
    }

    /// Exchange the stored refresh value for a new access/refresh pair.
    ///
    /// The new refresh value replaces the old one in the store before the
    /// access value is returned.
    pub fn refresh_user_token(&self) -> FeishuResult<Credential> {
        let Some(refresh_token) = self.stored(keys::REFRESH_TOKEN) else {
            return Err(self.needs_authorization("no refresh token available"));
        };

        let request = ApiRequest::post(self.http.url(REFRESH_PATH)).with_json(json!({
            "grant_type": "refresh_token",
            "app_id": self.app.app_id,
            "app_secret": self.app.app_secret,
            "refresh_token": refresh_token,
        }));

        tracing::info!(refresh_token = %mask(&refresh_token), "refreshing user access token");
        let body = match self.http.call(&request) {
            Ok(body) => body,
            Err(err) if err.is_refresh_revoked() => {
                self.store.lock().clear(keys::REFRESH_TOKEN);
                return Err(self.needs_authorization(&format!("refresh token rejected: {err}")));
            }
            Err(FeishuError::RemoteApplication { code, message }) => {
                return Err(FeishuError::Auth(format!("refresh rejected ({code}): {message}")));
            }
            Err(other) => return Err(other),
        };

        self.accept_user_tokens(&body)
    }

    /// Exchange an authorization code for the user token pair.
    pub fn exchange_code(&self, code: &str) -> FeishuResult<Credential> {
        let request = ApiRequest::post(self.http.url(USER_TOKEN_PATH)).with_json(json!({
            "grant_type": "authorization_code",
            "app_id": self.app.app_id,
            "app_secret": self.app.app_secret,
            "code": code,
        }));

        let body = self.http.call(&request).map_err(|err| match err {
            FeishuError::RemoteApplication { code, message } => {
                FeishuError::Auth(format!("code exchange rejected ({code}): {message}"))
            }
            other => other,
        })?;

        self.accept_user_tokens(&body)
    }

    fn accept_user_tokens(&self, body: &Value) -> FeishuResult<Credential> {
        let data = body.get("data").unwrap_or(body);
        let field = |name: &str| {
            data.get(name)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| FeishuError::Auth(format!("response carries no {name}")))
        };

        let access = field("access_token")?;
        let refresh = field("refresh_token")?;

        let mut credential = Credential::new(Identity::User, access);
        credential.expires_at = data
            .get("expires_in")
            .and_then(Value::as_i64)
            .map(|secs| Utc::now() + ChronoDuration::seconds(secs));

        {
            let mut store = self.store.lock();
            store.set(keys::USER_ACCESS_TOKEN, &credential.value);
            if let Err(err) = store.persist(&[(keys::REFRESH_TOKEN, refresh.as_str())]) {
                tracing::error!(error = %err, "could not persist rotated refresh token; it is only kept for this run");
            }
        }

        tracing::info!(
            token = %credential.masked(),
            refresh_token = %mask(&refresh),
            expires_at = ?credential.expires_at,
            "user access token issued"
        );
        *self.user_token.lock() = Some(credential.clone());
        Ok(credential)
    }

    /// URL a human opens to authorize the application.
    pub fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}?app_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.http.url(AUTHORIZE_PATH),
            urlencoding::encode(&self.app.app_id),
            urlencoding::encode(&self.feishu.redirect_uri),
            urlencoding::encode(&self.feishu.scope),
            urlencoding::encode(state),
        )
    }

    fn needs_authorization(&self, reason: &str) -> FeishuError {
        let state = uuid::Uuid::new_v4().simple().to_string();
        FeishuError::NeedsAuthorization {
            auth_url: self.authorization_url(&state),
            reason: reason.to_string(),
        }
    }

    /// Send `request` with the credential of `identity` and check the envelope.
    ///
    /// If the remote rejects the access token, the credential is
    /// re-acquired and the request is sent one more time.
    pub fn call_as(&self, identity: Identity, request: ApiRequest) -> FeishuResult<Value> {
        let token = self.token_for(identity)?;
        match self.http.call(&request.clone().with_bearer(&token.value)) {
            Err(err) if err.is_invalid_access_token() => {
                tracing::warn!(%identity, error = %err, "access token rejected, re-acquiring");
                self.invalidate(identity);
                let token = self.token_for(identity)?;
                self.http.call(&request.with_bearer(&token.value))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RetryConfig;
    use crate::integrations::http::{ApiResponse, HttpTransport, TransportFailure};

    /// Authorization server that treats refresh tokens as single-use.
    struct FakeAuthServer {
        valid_refresh: Mutex<Vec<String>>,
        issued: Mutex<u32>,
        seen_refresh: Mutex<Vec<String>>,
        bearer_log: Mutex<Vec<Option<String>>>,
        reject_bearer: Mutex<Option<String>>,
    }

    impl FakeAuthServer {
        fn new(valid: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                valid_refresh: Mutex::new(valid.iter().map(|s| s.to_string()).collect()),
                issued: Mutex::new(0),
                seen_refresh: Mutex::new(Vec::new()),
                bearer_log: Mutex::new(Vec::new()),
                reject_bearer: Mutex::new(None),
            })
        }
    }

    impl HttpTransport for FakeAuthServer {
        fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportFailure> {
            let body = request.body.clone().unwrap_or(Value::Null);
            if request.url.ends_with(REFRESH_PATH) {
                let presented = body["refresh_token"].as_str().unwrap_or_default().to_string();
                self.seen_refresh.lock().push(presented.clone());
                let mut valid = self.valid_refresh.lock();
                if let Some(pos) = valid.iter().position(|t| *t == presented) {
                    valid.remove(pos);
                    let mut issued = self.issued.lock();
                    *issued += 1;
                    let next = format!("refresh-{}", *issued);
                    valid.push(next.clone());
                    return Ok(ApiResponse::json(&json!({
                        "code": 0,
                        "data": {
                            "access_token": format!("u-access-{}", *issued),
                            "refresh_token": next,
                            "expires_in": 7200
                        }
                    })));
                }
                return Ok(ApiResponse::json(&json!({"code": 20064, "msg": "refresh token revoked"})));
            }
            if request.url.ends_with(APP_TOKEN_PATH) {
                return Ok(ApiResponse::json(
                    &json!({"code": 0, "app_access_token": "t-app-token-1234567", "expire": 7200}),
                ));
            }
            if request.url.ends_with(USER_TOKEN_PATH) {
                return Ok(ApiResponse::json(&json!({
                    "code": 0,
                    "data": {"access_token": "u-from-code", "refresh_token": "refresh-from-code"}
                })));
            }

            self.bearer_log.lock().push(request.bearer.clone());
            if request.bearer.is_some() && request.bearer == *self.reject_bearer.lock() {
                return Ok(ApiResponse::json(&json!({"code": 99_991_663, "msg": "invalid access token"})));
            }
            Ok(ApiResponse::json(&json!({"code": 0, "data": {}})))
        }
    }

    fn provider(server: &Arc<FakeAuthServer>, store: CredentialStore) -> TokenProvider {
        let http = HttpClient::new(
            Arc::clone(server) as Arc<dyn HttpTransport>,
            "https://open.example.com/open-apis",
            RetryConfig::no_retry(),
        );
        let app = AppCredentials { app_id: "cli_test".into(), app_secret: "secret".into() };
        TokenProvider::new(http, app, FeishuConfig::default(), store)
    }

    #[test]
    fn test_refresh_rotates_and_never_reuses() {
        let server = FakeAuthServer::new(&["refresh-0"]);
        let tokens = provider(&server, CredentialStore::in_memory([(keys::REFRESH_TOKEN, "refresh-0")]));

        let first = tokens.refresh_user_token().unwrap();
        assert_eq!(first.value, "u-access-1");
        assert_eq!(tokens.stored(keys::REFRESH_TOKEN).as_deref(), Some("refresh-1"));

        let second = tokens.refresh_user_token().unwrap();
        assert_eq!(second.value, "u-access-2");
        assert_eq!(*server.seen_refresh.lock(), vec!["refresh-0".to_string(), "refresh-1".to_string()]);
    }

    #[test]
    fn test_reusing_old_refresh_value_needs_authorization() {
        let server = FakeAuthServer::new(&["refresh-0"]);
        let stale = CredentialStore::in_memory([(keys::REFRESH_TOKEN, "refresh-0")]);

        let first = provider(&server, stale.clone());
        assert!(first.refresh_user_token().is_ok());

        let second = provider(&server, stale);
        let err = second.refresh_user_token().unwrap_err();
        match err {
            FeishuError::NeedsAuthorization { auth_url, .. } => {
                assert!(auth_url.contains("authen/v1/index?app_id=cli_test"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(second.stored(keys::REFRESH_TOKEN), None);
    }

    #[test]
    fn test_no_refresh_token_needs_authorization() {
        let server = FakeAuthServer::new(&[]);
        let tokens = provider(&server, CredentialStore::default());
        assert!(matches!(tokens.get_user_token(), Err(FeishuError::NeedsAuthorization { .. })));
    }

    #[test]
    fn test_cached_user_token_is_returned() {
        let server = FakeAuthServer::new(&[]);
        let tokens =
            provider(&server, CredentialStore::in_memory([(keys::USER_ACCESS_TOKEN, "u-preset")]));
        assert_eq!(tokens.get_user_token().unwrap().value, "u-preset");
        assert!(server.seen_refresh.lock().is_empty());
    }

    #[test]
    fn test_expired_user_token_is_refreshed() {
        let server = FakeAuthServer::new(&["refresh-0"]);
        let tokens = provider(&server, CredentialStore::in_memory([(keys::REFRESH_TOKEN, "refresh-0")]));
        let mut expired = Credential::new(Identity::User, "u-old");
        expired.expires_at = Some(Utc::now() - ChronoDuration::seconds(1));
        *tokens.user_token.lock() = Some(expired);

        assert_eq!(tokens.get_user_token().unwrap().value, "u-access-1");
    }

    #[test]
    fn test_app_token_cached_for_session() {
        let server = FakeAuthServer::new(&[]);
        let tokens = provider(&server, CredentialStore::default());
        let first = tokens.get_app_token().unwrap();
        let second = tokens.get_app_token().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.kind, Identity::App);
        assert!(first.expires_at.is_some());
    }

    #[test]
    fn test_exchange_code_persists_refresh() {
        let server = FakeAuthServer::new(&[]);
        let tokens = provider(&server, CredentialStore::default());
        let credential = tokens.exchange_code("abc").unwrap();
        assert_eq!(credential.value, "u-from-code");
        assert_eq!(tokens.stored(keys::REFRESH_TOKEN).as_deref(), Some("refresh-from-code"));
    }

    #[test]
    fn test_call_as_resends_once_on_invalid_token() {
        let server = FakeAuthServer::new(&["refresh-0"]);
        let store = CredentialStore::in_memory([
            (keys::USER_ACCESS_TOKEN, "u-stale"),
            (keys::REFRESH_TOKEN, "refresh-0"),
        ]);
        let tokens = provider(&server, store);
        *server.reject_bearer.lock() = Some("u-stale".to_string());

        let request = ApiRequest::get(tokens.http().url("docx/v1/documents/x"));
        tokens.call_as(Identity::User, request).unwrap();

        assert_eq!(
            *server.bearer_log.lock(),
            vec![Some("u-stale".to_string()), Some("u-access-1".to_string())]
        );
    }

    #[test]
    fn test_authorization_url_encoding() {
        let server = FakeAuthServer::new(&[]);
        let tokens = provider(&server, CredentialStore::default());
        let url = tokens.authorization_url("s1");
        assert!(url.starts_with("https://open.example.com/open-apis/authen/v1/index?app_id=cli_test"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fopen.feishu.cn%2Fapi-explorer%2Floading"));
        assert!(url.contains("scope=bitable%3Aapp%3Areadwrite%20docx%3Adocument%3Awrite"));
        assert!(url.ends_with("&state=s1"));
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("t-1234567890abcdef"), "t-12345678...");
        assert_eq!(mask("short"), "short...");
    }
}
