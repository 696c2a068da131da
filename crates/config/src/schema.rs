use serde::{Deserialize, Serialize};

/// Root of the c2switch config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct C2Config {
    pub oauth: OAuthSection,
}

/// Overrides for the OAuth login and refresh flow.
///
/// Unset fields fall back to the defaults compiled into `c2switch-oauth`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSection {
    pub client_id: Option<String>,
    /// Consumer-facing authorization endpoint.
    pub authorize_url: Option<String>,
    /// Enterprise-facing authorization endpoint.
    pub alternate_authorize_url: Option<String>,
    pub token_url: Option<String>,
    /// Redirect target used when the operator pastes the code by hand.
    pub manual_redirect_uri: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub inference_scope: Option<String>,
    pub success_url: Option<String>,
    pub inference_success_url: Option<String>,
    pub fallback_url: Option<String>,
    /// Seconds before expiry at which a token counts as stale.
    pub refresh_buffer_secs: Option<u64>,
    /// Upper bound on the wait for an authorization code. No bound when unset.
    pub authorization_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}
