//! Token endpoint client: authorization_code and refresh_token grants.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use {
    reqwest::StatusCode,
    secrecy::SecretString,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use c2switch_metrics::{counter, labels, oauth as oauth_metrics};

use crate::{
    defaults::DEFAULT_EXPIRES_IN_SECS,
    error::{OAuthError, Result},
    types::{OAuthConfig, TokenSet},
};

const ERROR_DETAIL_MAX_CHARS: usize = 240;

/// Everything needed to redeem one authorization code.
#[derive(Debug, Clone)]
pub struct CodeExchange<'a> {
    pub code: &'a str,
    pub state: &'a str,
    pub verifier: &'a str,
    /// Must be the redirect URI of the channel that delivered `code`.
    pub redirect_uri: &'a str,
    /// Requested token lifetime; omitted from the request when `None`.
    pub expires_in: Option<u64>,
    /// Used when the response carries no `scope`.
    pub requested_scopes: &'a [String],
}

#[derive(Serialize)]
struct AuthorizationCodeGrant<'a> {
    grant_type: &'static str,
    code: &'a str,
    redirect_uri: &'a str,
    client_id: &'a str,
    code_verifier: &'a str,
    state: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    subscription_type: Option<String>,
}

#[derive(Clone, Copy)]
enum Grant {
    AuthorizationCode,
    Refresh,
}

impl Grant {
    fn label(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Refresh => "refresh_token",
        }
    }
}

/// HTTP client bound to one token endpoint.
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    config: OAuthConfig,
}

impl TokenClient {
    pub fn new(config: OAuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn with_http(config: OAuthConfig, http: reqwest::Client) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Redeem an authorization code. Never retried.
    pub async fn exchange(&self, request: &CodeExchange<'_>) -> Result<TokenSet> {
        let body = AuthorizationCodeGrant {
            grant_type: "authorization_code",
            code: request.code,
            redirect_uri: request.redirect_uri,
            client_id: &self.config.client_id,
            code_verifier: request.verifier,
            state: request.state,
            expires_in: request.expires_in,
        };
        debug!(redirect_uri = request.redirect_uri, "exchanging authorization code");

        let resp = self.post(Grant::AuthorizationCode, &body).await?;
        let status = resp.status();
        record_exchange(Grant::AuthorizationCode, status);

        if status == StatusCode::UNAUTHORIZED {
            warn!("token endpoint rejected authorization code");
            return Err(OAuthError::AuthenticationFailed);
        }
        if status != StatusCode::OK {
            let (status_text, detail) = describe_failure(status, resp).await;
            warn!(status = status.as_u16(), detail = ?detail, "token exchange failed");
            return Err(OAuthError::TokenExchange {
                status: status.as_u16(),
                status_text,
                detail,
            });
        }

        let parsed: TokenResponse = parse_body(resp).await?;
        Ok(token_set_from(parsed, None, request.requested_scopes))
    }

    /// Trade a refresh token for a new token set.
    ///
    /// The input refresh token is carried over when the response omits one.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let body = RefreshGrant {
            grant_type: "refresh_token",
            refresh_token,
            client_id: &self.config.client_id,
        };
        let resp = self.post(Grant::Refresh, &body).await?;
        let status = resp.status();
        record_exchange(Grant::Refresh, status);

        if status != StatusCode::OK {
            let (status_text, detail) = describe_failure(status, resp).await;
            warn!(status = status.as_u16(), detail = ?detail, "token refresh failed");
            return Err(OAuthError::TokenRefresh {
                status: status.as_u16(),
                status_text,
                detail,
            });
        }

        let parsed: TokenResponse = parse_body(resp).await?;
        Ok(token_set_from(parsed, Some(refresh_token), &[]))
    }

    async fn post<B: Serialize>(&self, grant: Grant, body: &B) -> Result<reqwest::Response> {
        debug!(grant = grant.label(), url = %self.config.token_url, "calling token endpoint");
        Ok(self
            .http
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?)
    }
}

async fn parse_body(resp: reqwest::Response) -> Result<TokenResponse> {
    let text = resp.text().await?;
    let parsed: TokenResponse =
        serde_json::from_str(&text).map_err(|e| OAuthError::InvalidResponse(e.to_string()))?;
    if parsed.access_token.trim().is_empty() {
        return Err(OAuthError::InvalidResponse("empty access_token".into()));
    }
    Ok(parsed)
}

fn token_set_from(
    resp: TokenResponse,
    previous_refresh: Option<&str>,
    fallback_scopes: &[String],
) -> TokenSet {
    let expires_in = resp.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
    let scopes = match resp.scope.as_deref() {
        Some(scope) if !scope.trim().is_empty() => {
            scope.split_whitespace().map(str::to_string).collect()
        },
        _ => fallback_scopes.to_vec(),
    };
    let refresh_token = resp
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| previous_refresh.map(str::to_string))
        .map(SecretString::new);

    TokenSet {
        access_token: SecretString::new(resp.access_token),
        refresh_token,
        expires_at: Some(unix_now().saturating_add(expires_in)),
        scopes,
        subscription_type: resp.subscription_type,
    }
}

/// Canonical reason phrase plus whatever diagnostic the body carries.
async fn describe_failure(
    status: StatusCode,
    resp: reqwest::Response,
) -> (String, Option<String>) {
    let status_text = status.canonical_reason().unwrap_or_default().to_string();
    let body = resp.text().await.unwrap_or_default();
    (status_text, error_detail(&body))
}

/// Pull `error`/`error_description` (or the nested `error.{type,message}`
/// shape) out of an error body. Non-JSON bodies are returned truncated.
pub(crate) fn error_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Some(truncate(body));
    };

    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut code = non_empty(value.get("error"));
    let mut message = non_empty(value.get("error_description"));
    if let Some(obj) = value.get("error").and_then(Value::as_object) {
        code = code.or_else(|| non_empty(obj.get("type")).or_else(|| non_empty(obj.get("code"))));
        message = message.or_else(|| non_empty(obj.get("message")));
    }

    match (code, message) {
        (Some(code), Some(message)) => Some(truncate(&format!("{code}: {message}"))),
        (Some(only), None) | (None, Some(only)) => Some(truncate(&only)),
        (None, None) => None,
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(ERROR_DETAIL_MAX_CHARS).collect()
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(feature = "metrics")]
fn record_exchange(grant: Grant, status: StatusCode) {
    counter!(
        oauth_metrics::TOKEN_EXCHANGES_TOTAL,
        "grant" => grant.label(),
        labels::STATUS => status.as_u16().to_string()
    )
    .increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_exchange(_grant: Grant, _status: StatusCode) {}
