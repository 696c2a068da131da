//! Authorization URL construction for the automatic and manual channels.

use url::Url;

use crate::{defaults, types::OAuthConfig};

/// Parameters shared by both authorization URLs of one flow.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest<'a> {
    pub code_challenge: &'a str,
    pub state: &'a str,
    /// Loopback port; ignored for the manual URL.
    pub port: u16,
    pub use_alternate_authority: bool,
    pub inference_only: bool,
    pub organization_id: Option<&'a str>,
}

/// The pair of URLs handed out for one flow.
#[derive(Debug, Clone)]
pub struct AuthorizationUrls {
    /// Redirects to the loopback listener. `None` in manual-only mode.
    pub automatic: Option<String>,
    /// Redirects to the fixed remote page that displays the code.
    pub manual: String,
}

impl AuthorizationUrls {
    pub fn new(config: &OAuthConfig, request: &AuthorizeRequest<'_>, with_automatic: bool) -> Self {
        Self {
            automatic: with_automatic.then(|| build_authorize_url(config, request, false)),
            manual: build_authorize_url(config, request, true),
        }
    }
}

/// Redirect URI for the given channel.
pub fn redirect_uri(config: &OAuthConfig, port: u16, manual: bool) -> String {
    if manual {
        config.manual_redirect_uri.clone()
    } else {
        defaults::callback_redirect_uri(port)
    }
}

/// Build one fully qualified authorization URL. Pure; never fails.
pub fn build_authorize_url(
    config: &OAuthConfig,
    request: &AuthorizeRequest<'_>,
    manual: bool,
) -> String {
    let endpoint = config.authorize_endpoint(request.use_alternate_authority);
    let redirect = redirect_uri(config, request.port, manual);
    let scope = config.requested_scopes(request.inference_only).join(" ");

    let mut params: Vec<(&str, &str)> = vec![
        ("code", "true"),
        ("response_type", "code"),
        ("client_id", config.client_id.as_str()),
        ("redirect_uri", redirect.as_str()),
        ("scope", scope.as_str()),
        ("code_challenge", request.code_challenge),
        ("code_challenge_method", "S256"),
        ("state", request.state),
    ];
    if let Some(org) = request.organization_id {
        params.push(("organization_uuid", org));
    }

    match Url::parse(endpoint) {
        Ok(mut url) => {
            url.query_pairs_mut().extend_pairs(params);
            url.into()
        },
        // A malformed configured endpoint still yields a usable string.
        Err(_) => {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params)
                .finish();
            format!("{endpoint}?{query}")
        },
    }
}
