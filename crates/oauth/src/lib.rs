//! OAuth2 authorization code + PKCE login for Claude accounts.
//!
//! The code is delivered over two racing channels: a loopback redirect to
//! `http://localhost:{port}/callback` and a code the user pastes from the
//! provider's success page. Whichever arrives first is redeemed.

pub mod authorize_url;
pub mod callback_server;
pub mod code_race;
pub mod credentials;
pub mod defaults;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod refresh;
pub mod storage;
pub mod token_exchange;
pub mod types;

pub use {
    authorize_url::{AuthorizationUrls, AuthorizeRequest, build_authorize_url},
    callback_server::{CallbackOutcome, CallbackServer},
    code_race::{CodeChannel, CodeRace, ManualCodeSender, WinningCode, parse_manual_input},
    credentials::{ClaudeCredentials, read_credentials, write_credentials},
    defaults::load_oauth_config,
    error::{OAuthError, Result},
    flow::{AuthorizationPrompt, FlowOptions, OAuthFlow, PendingAuthorization, TerminalPrompt},
    refresh::{TokenManager, needs_refresh, needs_refresh_at},
    storage::{TokenSink, TokenStore},
    token_exchange::{CodeExchange, TokenClient},
    types::{OAuthConfig, PkcePair, TokenSet, serialize_option_secret, serialize_secret},
};
