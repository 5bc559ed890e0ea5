//! Error taxonomy for open-platform calls.

use crate::core::ConfigError;

/// Result type for open-platform operations.
pub type FeishuResult<T> = Result<T, FeishuError>;

/// Codes meaning the access token sent with a request is invalid or expired.
pub const INVALID_ACCESS_TOKEN_CODES: [i64; 3] = [99_991_663, 99_991_668, 99_991_677];

/// Codes meaning a refresh token is expired, revoked or already used.
pub const REFRESH_REVOKED_CODES: [i64; 3] = [20_026, 20_037, 20_064];

/// Error types for open-platform operations.
#[derive(Debug, thiserror::Error)]
pub enum FeishuError {
    /// Credential issuance failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A human has to complete the OAuth authorization step.
    #[error("authorization required ({reason}); open {auth_url} and run `larkflow auth exchange <code>`")]
    NeedsAuthorization { auth_url: String, reason: String },

    /// Network-level failure after the retry budget was spent.
    #[error("transport error after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },

    /// Well-formed error response from the remote API.
    #[error("remote error {code}: {message}")]
    RemoteApplication { code: i64, message: String },

    /// The response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A value needed for the call is not configured.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Local file error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FeishuError {
    /// Whether the remote rejected the access token itself.
    pub fn is_invalid_access_token(&self) -> bool {
        matches!(self, Self::RemoteApplication { code, .. } if INVALID_ACCESS_TOKEN_CODES.contains(code))
    }

    /// Whether the remote rejected a refresh token as expired or revoked.
    pub fn is_refresh_revoked(&self) -> bool {
        matches!(self, Self::RemoteApplication { code, .. } if REFRESH_REVOKED_CODES.contains(code))
    }

    /// Remote application error code, if any.
    pub fn remote_code(&self) -> Option<i64> {
        match self {
            Self::RemoteApplication { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<ConfigError> for FeishuError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Missing(keys) => Self::MissingConfig(keys.join(", ")),
            ConfigError::Io { source, .. } => Self::Io(source),
            other => Self::MissingConfig(other.to_string()),
        }
    }
}
