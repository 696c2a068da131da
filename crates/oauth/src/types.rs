use {
    secrecy::{ExposeSecret, SecretString},
    serde::{Deserialize, Serialize, Serializer},
};

use crate::defaults;

/// OAuth client configuration: endpoints, scopes, redirect targets and policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    /// Consumer-facing authorization endpoint.
    pub authorize_url: String,
    /// Enterprise-facing authorization endpoint.
    pub alternate_authorize_url: String,
    pub token_url: String,
    /// Fixed remote redirect target for the copy-paste channel.
    pub manual_redirect_uri: String,
    pub scopes: Vec<String>,
    /// The single scope requested for inference-only logins.
    pub inference_scope: String,
    pub success_url: String,
    pub inference_success_url: String,
    pub fallback_url: String,
    pub refresh_buffer_secs: u64,
    #[serde(default)]
    pub authorization_timeout_secs: Option<u64>,
    pub request_timeout_secs: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: defaults::CLIENT_ID.into(),
            authorize_url: defaults::AUTHORIZE_URL.into(),
            alternate_authorize_url: defaults::ALTERNATE_AUTHORIZE_URL.into(),
            token_url: defaults::TOKEN_URL.into(),
            manual_redirect_uri: defaults::MANUAL_REDIRECT_URI.into(),
            scopes: defaults::SCOPES.iter().map(|s| (*s).to_string()).collect(),
            inference_scope: defaults::INFERENCE_SCOPE.into(),
            success_url: defaults::SUCCESS_URL.into(),
            inference_success_url: defaults::INFERENCE_SUCCESS_URL.into(),
            fallback_url: defaults::FALLBACK_URL.into(),
            refresh_buffer_secs: defaults::REFRESH_BUFFER_SECS,
            authorization_timeout_secs: None,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

impl OAuthConfig {
    pub fn authorize_endpoint(&self, use_alternate_authority: bool) -> &str {
        if use_alternate_authority {
            &self.alternate_authorize_url
        } else {
            &self.authorize_url
        }
    }

    pub fn requested_scopes(&self, inference_only: bool) -> Vec<String> {
        if inference_only {
            vec![self.inference_scope.clone()]
        } else {
            self.scopes.clone()
        }
    }

    /// Where the browser lands after a successful automatic login.
    ///
    /// Scopes that are exactly the inference scope go to the inference page;
    /// anything else goes to the console page.
    pub fn success_url_for(&self, granted_scopes: &[String]) -> &str {
        match granted_scopes {
            [only] if *only == self.inference_scope => &self.inference_success_url,
            _ => &self.success_url,
        }
    }
}

/// Token set for one account. Replaced wholesale on refresh, never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: SecretString,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<SecretString>,
    /// Unix timestamp (seconds) when the access token expires.
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
}

impl TokenSet {
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose_secret().as_str())
    }
}

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

pub fn serialize_secret<S: Serializer>(
    secret: &SecretString,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

pub fn serialize_option_secret<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
