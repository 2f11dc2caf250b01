//! Error types for identity operations.
//!
//! `ProviderError` describes what went wrong talking to the identity
//! provider. `AuthError` is the taxonomy callers (forms, the session store)
//! see; the identity client is the only place one becomes the other.

use serde::Deserialize;
use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Provider error codes that mean the credentials were wrong.
const INVALID_CREDENTIAL_CODES: &[&str] = &["invalid_credentials", "invalid_grant"];

/// Provider error codes that mean the account does not exist.
const USER_NOT_FOUND_CODES: &[&str] = &["user_not_found"];

/// Provider error codes that mean a refresh token is no longer usable.
const REFRESH_REJECTED_CODES: &[&str] = &[
    "invalid_grant",
    "refresh_token_not_found",
    "refresh_token_already_used",
    "session_not_found",
    "session_expired",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Network unavailable")]
    NetworkUnavailable,

    #[error("Rejected by identity provider: {0}")]
    ProviderRejected(String),

    #[error("Not signed in")]
    Unauthenticated,

    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl AuthError {
    /// Message safe to show to the user. Raw provider text is never included;
    /// it is logged where the error is created.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "Invalid email or password.",
            AuthError::NetworkUnavailable => {
                "Unable to connect to server. Check your internet connection."
            }
            AuthError::ProviderRejected(_) => "The request was rejected. Please try again.",
            AuthError::Unauthenticated => "Your session has ended. Please sign in again.",
            AuthError::Unknown(_) => "Something went wrong. Please try again.",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Provider error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No active session")]
    MissingSession,
}

/// Error body shapes the provider uses across its endpoints.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    error_code: Option<String>,
    code: Option<serde_json::Value>,
    msg: Option<String>,
    message: Option<String>,
}

impl ProviderError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();

        let code = parsed
            .error_code
            .or_else(|| parsed.code.as_ref().and_then(|c| c.as_str().map(str::to_string)))
            .or(parsed.error);

        let message = parsed
            .error_description
            .or(parsed.msg)
            .or(parsed.message)
            .unwrap_or_else(|| Self::truncate_body(body));

        ProviderError::Api {
            status,
            code,
            message,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ProviderError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn is_invalid_credentials(&self) -> bool {
        match self {
            ProviderError::Api { code, message, .. } => {
                code.as_deref()
                    .map(|c| INVALID_CREDENTIAL_CODES.contains(&c))
                    .unwrap_or(false)
                    || message.to_lowercase().contains("invalid login credentials")
            }
            _ => false,
        }
    }

    /// Only the provider's own error code counts; a bare 404 is a missing
    /// endpoint, not a missing account.
    pub fn is_user_not_found(&self) -> bool {
        self.code()
            .map(|c| USER_NOT_FOUND_CODES.contains(&c))
            .unwrap_or(false)
    }

    /// The provider refused the refresh token itself. Server errors and rate
    /// limits are not a verdict on the token.
    pub fn is_refresh_rejected(&self) -> bool {
        match self {
            ProviderError::Api { status, code, .. } => {
                matches!(status, 400 | 401 | 403)
                    || code
                        .as_deref()
                        .map(|c| REFRESH_REJECTED_CODES.contains(&c))
                        .unwrap_or(false)
            }
            ProviderError::MissingSession => true,
            _ => false,
        }
    }

    fn is_unauthorized(&self) -> bool {
        matches!(self, ProviderError::Api { status: 401 | 403, .. })
            || matches!(self, ProviderError::MissingSession)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::InvalidResponse(e.to_string())
        } else {
            ProviderError::Network(e.to_string())
        }
    }
}

impl From<ProviderError> for AuthError {
    fn from(e: ProviderError) -> Self {
        if e.is_invalid_credentials() {
            return AuthError::InvalidCredentials;
        }
        if e.is_unauthorized() {
            return AuthError::Unauthenticated;
        }
        match e {
            ProviderError::Network(_) | ProviderError::Timeout => AuthError::NetworkUnavailable,
            ProviderError::Api { message, .. } => AuthError::ProviderRejected(message),
            ProviderError::InvalidResponse(msg) => AuthError::Unknown(msg),
            ProviderError::MissingSession => AuthError::Unauthenticated,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
