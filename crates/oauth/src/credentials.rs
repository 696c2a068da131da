//! Claude Code `.credentials.json` codec.
//!
//! The file holds one `claudeAiOauth` object with millisecond expiry. Fields
//! this crate does not know about are carried through unchanged.

use std::path::{Path, PathBuf};

use {
    secrecy::SecretString,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    tracing::info,
};

use crate::{
    error::{OAuthError, Result},
    storage::write_private_file,
    types::{TokenSet, serialize_option_secret, serialize_secret},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeCredentials {
    pub claude_ai_oauth: ClaudeAiOauth,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeAiOauth {
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: SecretString,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<SecretString>,
    /// Unix timestamp in milliseconds.
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<&TokenSet> for ClaudeAiOauth {
    fn from(tokens: &TokenSet) -> Self {
        Self {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            expires_at: tokens.expires_at.map(|secs| secs.saturating_mul(1000)),
            scopes: tokens.scopes.clone(),
            subscription_type: tokens.subscription_type.clone(),
            extra: Map::new(),
        }
    }
}

impl From<&ClaudeAiOauth> for TokenSet {
    fn from(oauth: &ClaudeAiOauth) -> Self {
        Self {
            access_token: oauth.access_token.clone(),
            refresh_token: oauth.refresh_token.clone(),
            expires_at: oauth.expires_at.map(|ms| ms / 1000),
            scopes: oauth.scopes.clone(),
            subscription_type: oauth.subscription_type.clone(),
        }
    }
}

impl From<&TokenSet> for ClaudeCredentials {
    fn from(tokens: &TokenSet) -> Self {
        Self {
            claude_ai_oauth: tokens.into(),
            extra: Map::new(),
        }
    }
}

impl ClaudeCredentials {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| OAuthError::Credentials(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| OAuthError::Credentials(e.to_string()))
    }

    pub fn token_set(&self) -> TokenSet {
        (&self.claude_ai_oauth).into()
    }

    /// Swap in a new token set, keeping unknown fields at both levels.
    pub fn replace_tokens(&mut self, tokens: &TokenSet) {
        let extra = std::mem::take(&mut self.claude_ai_oauth.extra);
        self.claude_ai_oauth = ClaudeAiOauth {
            extra,
            ..tokens.into()
        };
    }
}

/// `~/.claude/.credentials.json`.
pub fn default_credentials_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".claude").join(".credentials.json"))
}

pub fn read_credentials(path: &Path) -> Result<ClaudeCredentials> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| OAuthError::Credentials(format!("{}: {e}", path.display())))?;
    ClaudeCredentials::parse(&raw)
}

/// Atomically replace the credentials file with owner-only permissions.
pub fn write_credentials(path: &Path, credentials: &ClaudeCredentials) -> Result<()> {
    let json = credentials.to_json()?;
    write_private_file(path, json.as_bytes())
        .map_err(|e| OAuthError::Credentials(format!("{}: {e}", path.display())))?;
    info!(path = %path.display(), "wrote credentials");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "claudeAiOauth": {
            "accessToken": "sk-ant-oat01-abc",
            "refreshToken": "sk-ant-ort01-def",
            "expiresAt": 1900000000123,
            "scopes": ["user:inference", "user:profile"],
            "subscriptionType": "max",
            "rateLimitTier": "default_claude_max_20x"
        },
        "mcpOAuth": {"server": {}}
    }"#;

    #[test]
    fn parses_and_converts_milliseconds() {
        let creds = ClaudeCredentials::parse(SAMPLE).unwrap();
        let tokens = creds.token_set();
        assert_eq!(tokens.access_token(), "sk-ant-oat01-abc");
        assert_eq!(tokens.refresh_token(), Some("sk-ant-ort01-def"));
        assert_eq!(tokens.expires_at, Some(1_900_000_000));
        assert_eq!(tokens.subscription_type.as_deref(), Some("max"));
        assert_eq!(tokens.scopes.len(), 2);
    }

    #[test]
    fn missing_oauth_section_is_rejected() {
        assert!(matches!(
            ClaudeCredentials::parse(r#"{"other": 1}"#),
            Err(OAuthError::Credentials(_))
        ));
        assert!(ClaudeCredentials::parse("not json").is_err());
    }

    #[test]
    fn replace_keeps_unknown_fields() {
        let mut creds = ClaudeCredentials::parse(SAMPLE).unwrap();
        let fresh = TokenSet {
            access_token: SecretString::new("new-at".into()),
            refresh_token: Some(SecretString::new("new-rt".into())),
            expires_at: Some(2_000_000_000),
            scopes: vec!["user:inference".into()],
            subscription_type: None,
        };
        creds.replace_tokens(&fresh);

        let json: Value = serde_json::from_str(&creds.to_json().unwrap()).unwrap();
        let oauth = &json["claudeAiOauth"];
        assert_eq!(oauth["accessToken"], "new-at");
        assert_eq!(oauth["refreshToken"], "new-rt");
        assert_eq!(oauth["expiresAt"], 2_000_000_000_000u64);
        assert_eq!(oauth["rateLimitTier"], "default_claude_max_20x");
        assert!(json.get("mcpOAuth").is_some());
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".claude/.credentials.json");
        let creds = ClaudeCredentials::parse(SAMPLE).unwrap();

        write_credentials(&path, &creds).unwrap();
        let back = read_credentials(&path).unwrap();
        assert_eq!(back.token_set().access_token(), "sk-ant-oat01-abc");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn reading_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_credentials(&dir.path().join("absent.json")),
            Err(OAuthError::Credentials(_))
        ));
    }
}
