//! Built-in OAuth client constants and config-file merging.

use {c2switch_config::OAuthSection, tracing::warn};

use crate::types::OAuthConfig;

/// Public client identifier of the Claude Code desktop/CLI login.
pub const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";
pub const AUTHORIZE_URL: &str = "https://claude.ai/oauth/authorize";
pub const ALTERNATE_AUTHORIZE_URL: &str = "https://platform.claude.com/oauth/authorize";
pub const TOKEN_URL: &str = "https://platform.claude.com/v1/oauth/token";
pub const MANUAL_REDIRECT_URI: &str = "https://platform.claude.com/oauth/code/callback";
pub const SCOPES: &[&str] = &[
    "org:create_api_key",
    "user:profile",
    "user:inference",
    "user:sessions:claude_code",
    "user:mcp_servers",
];
pub const INFERENCE_SCOPE: &str = "user:inference";
pub const SUCCESS_URL: &str = "https://platform.claude.com/oauth/code/success?app=claude-code";
pub const INFERENCE_SUCCESS_URL: &str = "https://claude.ai/oauth/code/success?app=claude-code";
pub const FALLBACK_URL: &str = "https://platform.claude.com/oauth/code/success?app=claude-code";
pub const REFRESH_BUFFER_SECS: u64 = 600;
pub const REQUEST_TIMEOUT_SECS: u64 = 10;
/// Used when a 200 token response omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Path of the loopback redirect target.
pub const CALLBACK_PATH: &str = "/callback";

/// Redirect URI for the automatic channel on `port`.
pub fn callback_redirect_uri(port: u16) -> String {
    format!("http://localhost:{port}{CALLBACK_PATH}")
}

/// Load the OAuth config: built-in defaults overlaid with the config file.
///
/// An unreadable or malformed config file is logged and ignored.
pub fn load_oauth_config() -> OAuthConfig {
    match c2switch_config::load_config() {
        Ok(config) => merge_section(OAuthConfig::default(), config.oauth),
        Err(e) => {
            warn!(error = %e, "failed to load config, using oauth defaults");
            OAuthConfig::default()
        },
    }
}

pub fn merge_section(mut base: OAuthConfig, section: OAuthSection) -> OAuthConfig {
    if let Some(v) = section.client_id {
        base.client_id = v;
    }
    if let Some(v) = section.authorize_url {
        base.authorize_url = v;
    }
    if let Some(v) = section.alternate_authorize_url {
        base.alternate_authorize_url = v;
    }
    if let Some(v) = section.token_url {
        base.token_url = v;
    }
    if let Some(v) = section.manual_redirect_uri {
        base.manual_redirect_uri = v;
    }
    if let Some(v) = section.scopes.filter(|s| !s.is_empty()) {
        base.scopes = v;
    }
    if let Some(v) = section.inference_scope {
        base.inference_scope = v;
    }
    if let Some(v) = section.success_url {
        base.success_url = v;
    }
    if let Some(v) = section.inference_success_url {
        base.inference_success_url = v;
    }
    if let Some(v) = section.fallback_url {
        base.fallback_url = v;
    }
    if let Some(v) = section.refresh_buffer_secs {
        base.refresh_buffer_secs = v;
    }
    if section.authorization_timeout_secs.is_some() {
        base.authorization_timeout_secs = section.authorization_timeout_secs;
    }
    if let Some(v) = section.request_timeout_secs {
        base.request_timeout_secs = v;
    }
    base
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_uri_uses_localhost() {
        assert_eq!(callback_redirect_uri(54545), "http://localhost:54545/callback");
    }

    #[test]
    fn empty_section_keeps_defaults() {
        let merged = merge_section(OAuthConfig::default(), OAuthSection::default());
        assert_eq!(merged.client_id, CLIENT_ID);
        assert_eq!(merged.refresh_buffer_secs, REFRESH_BUFFER_SECS);
        assert!(merged.authorization_timeout_secs.is_none());
    }

    #[test]
    fn section_overrides_defaults() {
        let section = OAuthSection {
            token_url: Some("http://127.0.0.1:1/token".into()),
            refresh_buffer_secs: Some(300),
            authorization_timeout_secs: Some(90),
            scopes: Some(vec![]),
            ..Default::default()
        };
        let merged = merge_section(OAuthConfig::default(), section);
        assert_eq!(merged.token_url, "http://127.0.0.1:1/token");
        assert_eq!(merged.refresh_buffer_secs, 300);
        assert_eq!(merged.authorization_timeout_secs, Some(90));
        // An empty scope list is not a usable override.
        assert_eq!(merged.scopes.len(), SCOPES.len());
    }
}
