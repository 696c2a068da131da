//! Dual-channel authorization code flow.
//!
//! [`OAuthFlow::start`] binds the loopback listener, draws the PKCE pair and
//! state, and builds both authorization URLs. [`PendingAuthorization::finish`]
//! waits for the first code from either channel, redeems it, steers the
//! browser to the right landing page and always closes the listener.

use std::{sync::OnceLock, time::Duration};

use {
    async_trait::async_trait,
    tokio::sync::{Mutex, mpsc},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use c2switch_metrics::{counter, labels, oauth as oauth_metrics};

use crate::{
    authorize_url::{AuthorizationUrls, AuthorizeRequest, redirect_uri},
    callback_server::CallbackServer,
    code_race::{CodeChannel, CodeRace, ManualCodeSender, WinningCode},
    defaults::load_oauth_config,
    error::{OAuthError, Result},
    pkce::generate_state,
    storage::TokenSink,
    token_exchange::{CodeExchange, TokenClient},
    types::{OAuthConfig, PkcePair, TokenSet},
};

/// How the authorization URLs are presented to the user.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    /// Show the manual URL. `manual` accepts the code the user pastes back.
    /// Awaited before any browser is opened.
    async fn display_url(&self, url: &str, manual: ManualCodeSender) -> anyhow::Result<()>;

    /// Launch a browser at `url` without waiting for it.
    fn open_browser(&self, url: &str) -> anyhow::Result<()> {
        open::that_detached(url)?;
        Ok(())
    }
}

/// Prints the manual URL to stderr and reads a pasted code from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

#[async_trait]
impl AuthorizationPrompt for TerminalPrompt {
    async fn display_url(&self, url: &str, manual: ManualCodeSender) -> anyhow::Result<()> {
        eprintln!("Sign in with your browser. If it does not open, visit:\n\n  {url}\n");
        eprintln!("Then paste the code shown on the page here and press Enter.");

        tokio::spawn(forward_pasted_code(stdin_lines(), manual));
        Ok(())
    }
}

const INPUT_POLL: Duration = Duration::from_millis(250);

type LineQueue = Mutex<mpsc::UnboundedReceiver<String>>;

/// Non-empty stdin lines, read by one thread for the whole process.
fn stdin_lines() -> &'static LineQueue {
    static LINES: OnceLock<LineQueue> = OnceLock::new();
    LINES.get_or_init(|| {
        let (tx, rx) = mpsc::unbounded_channel();
        // Plain thread: a blocked stdin read must not hold up runtime shutdown.
        let spawned = std::thread::Builder::new()
            .name("oauth-code-input".into())
            .spawn(move || {
                let mut line = String::new();
                loop {
                    line.clear();
                    match std::io::stdin().read_line(&mut line) {
                        Ok(0) | Err(_) => break,
                        Ok(_) if line.trim().is_empty() => continue,
                        Ok(_) => {
                            if tx.send(line.trim().to_string()).is_err() {
                                break;
                            }
                        },
                    }
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "could not start stdin reader, pasted codes will be ignored");
        }
        Mutex::new(rx)
    })
}

/// Hand the next line to `manual`. Gives up the queue as soon as the race
/// settles so the next flow's reader gets every later line.
async fn forward_pasted_code(queue: &LineQueue, manual: ManualCodeSender) {
    let mut lines = queue.lock().await;
    // Typed before this flow's URL was shown.
    while lines.try_recv().is_ok() {}

    while manual.is_open() {
        tokio::select! {
            line = lines.recv() => {
                match line {
                    Some(line) => {
                        if !manual.submit(line) {
                            debug!("pasted code arrived after the race settled");
                        }
                    },
                    None => debug!("stdin closed"),
                }
                break;
            },
            () = tokio::time::sleep(INPUT_POLL) => {},
        }
    }
}

/// Per-login choices.
#[derive(Debug, Clone)]
pub struct FlowOptions {
    pub use_alternate_authority: bool,
    /// Request only the inference scope.
    pub inference_only: bool,
    pub organization_id: Option<String>,
    /// Skip the loopback listener and rely on the pasted code alone.
    pub manual_only: bool,
    pub open_browser: bool,
    /// Requested token lifetime, forwarded to the token endpoint.
    pub expires_in: Option<u64>,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            use_alternate_authority: false,
            inference_only: false,
            organization_id: None,
            manual_only: false,
            open_browser: true,
            expires_in: None,
        }
    }
}

pub struct OAuthFlow {
    client: TokenClient,
}

impl OAuthFlow {
    pub fn new(config: OAuthConfig) -> Result<Self> {
        Ok(Self {
            client: TokenClient::new(config)?,
        })
    }

    /// Built-in defaults overlaid with the c2switch config file.
    pub fn from_config_file() -> Result<Self> {
        Self::new(load_oauth_config())
    }

    pub fn with_client(client: TokenClient) -> Self {
        Self { client }
    }

    pub fn config(&self) -> &OAuthConfig {
        self.client.config()
    }

    /// Begin a flow. Fails with [`OAuthError::ServerStart`] before any URL
    /// exists when the listener cannot be bound.
    pub async fn start(&self, options: &FlowOptions) -> Result<PendingAuthorization> {
        let config = self.config();
        let state = generate_state()?;
        let pkce = PkcePair::generate()?;

        let (server, automatic) = if options.manual_only {
            (None, None)
        } else {
            let (server, outcome) = CallbackServer::bind(state.clone(), config).await?;
            (Some(server), Some(outcome))
        };
        let port = server.as_ref().map(CallbackServer::port);

        let urls = AuthorizationUrls::new(
            config,
            &AuthorizeRequest {
                code_challenge: &pkce.challenge,
                state: &state,
                port: port.unwrap_or_default(),
                use_alternate_authority: options.use_alternate_authority,
                inference_only: options.inference_only,
                organization_id: options.organization_id.as_deref(),
            },
            server.is_some(),
        );
        let (race, manual) = CodeRace::new(state.clone(), automatic);

        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::FLOWS_STARTED_TOTAL).increment(1);
        info!(
            port = ?port,
            manual_only = options.manual_only,
            alternate_authority = options.use_alternate_authority,
            "started oauth authorization flow"
        );

        Ok(PendingAuthorization {
            client: self.client.clone(),
            server,
            race,
            manual,
            urls,
            state,
            verifier: pkce.verifier,
            port,
            requested_scopes: config.requested_scopes(options.inference_only),
            expires_in: options.expires_in,
            timeout: config.authorization_timeout_secs.map(Duration::from_secs),
        })
    }

    /// Run a complete login: present the URLs, wait for a code, redeem it.
    pub async fn obtain_tokens(
        &self,
        options: &FlowOptions,
        prompt: &dyn AuthorizationPrompt,
        cancel: &CancellationToken,
    ) -> Result<TokenSet> {
        let pending = self.start(options).await?;

        if let Err(e) = prompt
            .display_url(pending.manual_url(), pending.manual_sender())
            .await
        {
            pending.abandon().await;
            return Err(OAuthError::Prompt(e));
        }

        if options.open_browser {
            let target = pending.automatic_url().unwrap_or(pending.manual_url());
            if let Err(e) = prompt.open_browser(target) {
                warn!(error = %e, "failed to open browser");
                if target != pending.manual_url()
                    && let Err(e) = prompt.open_browser(pending.manual_url())
                {
                    warn!(error = %e, "failed to open browser with manual url");
                }
            }
        }

        pending.finish(cancel).await
    }

    /// [`obtain_tokens`](Self::obtain_tokens), then hand the result to `sink`.
    pub async fn login(
        &self,
        account_id: &str,
        options: &FlowOptions,
        prompt: &dyn AuthorizationPrompt,
        sink: &dyn TokenSink,
        cancel: &CancellationToken,
    ) -> Result<TokenSet> {
        let tokens = self.obtain_tokens(options, prompt, cancel).await?;
        sink.save(account_id, &tokens)
            .await
            .map_err(OAuthError::Storage)?;
        info!(account_id, "saved tokens after login");
        Ok(tokens)
    }

    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenSet> {
        self.client.refresh(refresh_token).await
    }
}

/// A started flow waiting for its authorization code.
///
/// Dropping it closes the listener; a parked browser request is sent to the
/// fallback page.
pub struct PendingAuthorization {
    client: TokenClient,
    server: Option<CallbackServer>,
    race: CodeRace,
    manual: ManualCodeSender,
    urls: AuthorizationUrls,
    state: String,
    verifier: String,
    port: Option<u16>,
    requested_scopes: Vec<String>,
    expires_in: Option<u64>,
    timeout: Option<Duration>,
}

impl PendingAuthorization {
    pub fn urls(&self) -> &AuthorizationUrls {
        &self.urls
    }

    pub fn manual_url(&self) -> &str {
        &self.urls.manual
    }

    /// `None` in manual-only mode.
    pub fn automatic_url(&self) -> Option<&str> {
        self.urls.automatic.as_deref()
    }

    pub fn manual_sender(&self) -> ManualCodeSender {
        self.manual.clone()
    }

    /// Loopback port, when a listener is running.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Wait for a code, redeem it and settle the browser.
    ///
    /// The listener is closed on every path out of this call.
    pub async fn finish(self, cancel: &CancellationToken) -> Result<TokenSet> {
        let Self {
            client,
            mut server,
            race,
            manual,
            urls: _,
            state,
            verifier,
            port,
            requested_scopes,
            expires_in,
            timeout,
        } = self;
        // Only caller-held senders keep the manual channel open from here.
        drop(manual);

        let outcome = async {
            let won = race.wait(cancel, timeout).await?;
            let channel = won.channel;
            let redirect = redirect_uri(
                client.config(),
                port.unwrap_or_default(),
                channel == CodeChannel::Manual,
            );
            let exchange = CodeExchange {
                code: &won.code,
                state: &state,
                verifier: &verifier,
                redirect_uri: &redirect,
                expires_in,
                requested_scopes: &requested_scopes,
            };
            let exchanged = tokio::select! {
                exchanged = client.exchange(&exchange) => exchanged,
                () = cancel.cancelled() => Err(OAuthError::Cancelled),
            };
            settle_browser(server.as_ref(), &won, exchanged.as_ref().ok());
            exchanged.map(|tokens| (tokens, channel))
        }
        .await;

        if let Some(server) = server.as_mut() {
            server.close().await;
        }

        match outcome {
            Ok((tokens, channel)) => {
                #[cfg(feature = "metrics")]
                counter!(oauth_metrics::FLOWS_COMPLETED_TOTAL, labels::CHANNEL => channel.as_str())
                    .increment(1);
                info!(channel = channel.as_str(), scopes = ?tokens.scopes, "oauth login complete");
                Ok(tokens)
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(oauth_metrics::FLOWS_FAILED_TOTAL).increment(1);
                warn!(error = %e, "oauth login failed");
                Err(e)
            },
        }
    }

    /// Give up without waiting; the listener is closed.
    pub async fn abandon(self) {
        if let Some(mut server) = self.server {
            server.close().await;
        }
        debug!("abandoned oauth authorization flow");
    }
}

/// Answer the parked browser request when the automatic channel won.
fn settle_browser(server: Option<&CallbackServer>, won: &WinningCode, tokens: Option<&TokenSet>) {
    if won.channel != CodeChannel::Automatic {
        return;
    }
    let Some(server) = server else {
        return;
    };
    match tokens {
        Some(tokens) => {
            server.redirect_success(&tokens.scopes);
        },
        None => {
            server.redirect_error();
        },
    }
}
