use thiserror::Error;

pub type Result<T, E = OAuthError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum OAuthError {
    /// The loopback listener could not be bound. Raised before any URL is shown.
    #[error("failed to start oauth callback server: {0}")]
    ServerStart(#[source] std::io::Error),

    /// The loopback listener faulted after it started.
    #[error("oauth callback server failed: {0}")]
    Listener(#[source] std::io::Error),

    #[error("no authorization code received")]
    NoAuthorizationCode,

    /// The callback query string could not be parsed.
    #[error("malformed oauth callback: {0}")]
    MalformedCallback(String),

    #[error("oauth state mismatch")]
    InvalidState,

    /// The authorization server redirected back with `?error=`.
    #[error("authorization denied: {error}{}", description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    /// The token endpoint answered 401: the code was consumed, invalid or expired.
    #[error("authentication failed: invalid authorization code")]
    AuthenticationFailed,

    #[error("token exchange failed ({status} {status_text}){}", fmt_detail(detail))]
    TokenExchange {
        status: u16,
        status_text: String,
        detail: Option<String>,
    },

    #[error("token refresh failed ({status} {status_text}){}", fmt_detail(detail))]
    TokenRefresh {
        status: u16,
        status_text: String,
        detail: Option<String>,
    },

    #[error("request to authorization server failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// The OS random source failed. Never retried.
    #[error("secure random source unavailable: {0}")]
    Entropy(String),

    /// The caller-supplied prompt could not present the authorization URL.
    #[error("failed to present authorization url: {0}")]
    Prompt(#[source] anyhow::Error),

    #[error("authorization cancelled")]
    Cancelled,

    #[error("timed out waiting for authorization after {0}s")]
    TimedOut(u64),

    /// Both completion channels went away without producing a code.
    #[error("authorization channels closed before a code arrived")]
    ChannelClosed,

    #[error("no refresh token stored for account {0}")]
    NoRefreshToken(String),

    #[error("no token set stored for account {0}")]
    AccountNotFound(String),

    #[error("token storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("invalid credentials: {0}")]
    Credentials(String),
}

fn fmt_detail(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default()
}
