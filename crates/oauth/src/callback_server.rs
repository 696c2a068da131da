//! Loopback listener for the automatic OAuth redirect.
//!
//! Serves exactly one route, `GET /callback`. A validated callback is not
//! answered right away: its response is parked as the single pending redirect
//! and completed later by [`CallbackServer::redirect_success`] or
//! [`CallbackServer::redirect_error`], so the browser lands on the right page
//! once token exchange has finished. Every other path answers 404.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use {
    axum::{
        Router,
        extract::{Query, State, rejection::QueryRejection},
        http::{StatusCode, header},
        response::{IntoResponse, Response},
        routing::get,
    },
    serde::Deserialize,
    tokio::{net::TcpListener, sync::oneshot, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use c2switch_metrics::{counter, labels, oauth as oauth_metrics};

use crate::{
    defaults::CALLBACK_PATH,
    error::{OAuthError, Result},
    types::OAuthConfig,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// What the listener reports to the code race for a `/callback` request.
#[derive(Debug)]
pub enum CallbackOutcome {
    Success { code: String, state: String },
    Error(OAuthError),
}

#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// The one parked `/callback` response, released exactly once.
struct PendingRedirect {
    respond: oneshot::Sender<String>,
}

impl PendingRedirect {
    fn release(self, location: &str) {
        // The browser may already have gone away; nothing left to answer then.
        let _ = self.respond.send(location.to_string());
    }
}

#[derive(Default)]
struct RedirectSlot {
    pending: Option<PendingRedirect>,
    closed: bool,
}

struct Shared {
    expected_state: String,
    config: OAuthConfig,
    outcome_tx: Mutex<Option<oneshot::Sender<CallbackOutcome>>>,
    slot: Mutex<RedirectSlot>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Deliver an outcome to the race. Only the first one is delivered.
    fn signal(&self, outcome: CallbackOutcome) {
        match lock(&self.outcome_tx).take() {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    debug!("code race already settled, callback outcome discarded");
                }
            },
            None => debug!("callback outcome already delivered, discarding"),
        }
    }

    /// Park a validated response. Refused once closed or when one is already parked.
    fn hold(&self, pending: PendingRedirect) -> std::result::Result<(), PendingRedirect> {
        let mut slot = lock(&self.slot);
        if slot.closed || slot.pending.is_some() {
            return Err(pending);
        }
        slot.pending = Some(pending);
        Ok(())
    }

    fn take_pending(&self) -> Option<PendingRedirect> {
        lock(&self.slot).pending.take()
    }
}

/// Loopback HTTP listener on an OS-assigned port.
///
/// Dropping the server has the same effect as [`CallbackServer::close`]
/// except that it does not wait for the listener tasks to finish.
pub struct CallbackServer {
    port: u16,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind `localhost` on port 0 and start serving.
    ///
    /// Returns the server and the receiver of the first callback outcome.
    pub async fn bind(
        expected_state: impl Into<String>,
        config: &OAuthConfig,
    ) -> Result<(Self, oneshot::Receiver<CallbackOutcome>)> {
        let listeners = bind_loopback().await?;
        let port = listeners
            .first()
            .map(|l| l.local_addr())
            .transpose()
            .map_err(OAuthError::ServerStart)?
            .map(|addr| addr.port())
            .unwrap_or_default();

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            expected_state: expected_state.into(),
            config: config.clone(),
            outcome_tx: Mutex::new(Some(outcome_tx)),
            slot: Mutex::new(RedirectSlot::default()),
        });
        let shutdown = CancellationToken::new();

        let tasks = listeners
            .into_iter()
            .map(|listener| spawn_listener(listener, Arc::clone(&shared), shutdown.clone()))
            .collect();

        info!(port, "oauth callback server listening");
        Ok((
            Self {
                port,
                shared,
                shutdown,
                tasks,
            },
            outcome_rx,
        ))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Answer the parked callback with a 302 to the success page for `scopes`.
    ///
    /// Returns `false` when nothing was parked.
    pub fn redirect_success(&self, scopes: &[String]) -> bool {
        let Some(pending) = self.shared.take_pending() else {
            return false;
        };
        let location = self.shared.config.success_url_for(scopes);
        debug!(location, "redirecting browser to success page");
        pending.release(location);
        true
    }

    /// Answer the parked callback with a 302 to the fallback page.
    ///
    /// Returns `false` when nothing was parked.
    pub fn redirect_error(&self) -> bool {
        let Some(pending) = self.shared.take_pending() else {
            return false;
        };
        debug!("redirecting browser to fallback page");
        pending.release(&self.shared.config.fallback_url);
        true
    }

    /// Stop serving. Any parked callback is answered with the fallback
    /// redirect first. Safe to call more than once.
    pub async fn close(&mut self) {
        self.begin_shutdown();
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!("oauth callback server did not stop in time, aborting");
                task.abort();
            }
        }
    }

    fn begin_shutdown(&self) {
        let already_closed = {
            let mut slot = lock(&self.shared.slot);
            std::mem::replace(&mut slot.closed, true)
        };
        self.redirect_error();
        lock(&self.shared.outcome_tx).take();
        self.shutdown.cancel();
        if !already_closed {
            info!(port = self.port, "oauth callback server closed");
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.begin_shutdown();
    }
}

/// Bind 127.0.0.1 and ::1 on one OS-assigned port. One family is enough.
async fn bind_loopback() -> Result<Vec<TcpListener>> {
    let v4 = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    let v6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 0);

    let (first, second_ip) = match TcpListener::bind(v4).await {
        Ok(listener) => (listener, v6.ip()),
        Err(v4_err) => match TcpListener::bind(v6).await {
            Ok(listener) => (listener, v4.ip()),
            Err(v6_err) => {
                warn!(%v4_err, %v6_err, "no loopback interface could be bound");
                return Err(OAuthError::ServerStart(v4_err));
            },
        },
    };
    let port = first.local_addr().map_err(OAuthError::ServerStart)?.port();

    let mut listeners = vec![first];
    match TcpListener::bind(SocketAddr::new(second_ip, port)).await {
        Ok(listener) => listeners.push(listener),
        Err(e) => debug!(%second_ip, port, error = %e, "second loopback family unavailable"),
    }
    Ok(listeners)
}

fn spawn_listener(
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let app = Router::new()
        .route(CALLBACK_PATH, get(callback_handler))
        .fallback(not_found_handler)
        .with_state(Arc::clone(&shared));

    tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
        if let Err(e) = served {
            warn!(error = %e, "oauth callback server failed");
            shared.signal(CallbackOutcome::Error(OAuthError::Listener(e)));
        }
    })
}

async fn callback_handler(
    State(shared): State<Arc<Shared>>,
    query: std::result::Result<Query<CallbackParams>, QueryRejection>,
) -> Response {
    let checked = query
        .map_err(|rejection| OAuthError::MalformedCallback(rejection.body_text()))
        .and_then(|Query(params)| validate_callback(params, &shared.expected_state));
    let (code, state) = match checked {
        Ok(accepted) => accepted,
        Err(reason) => {
            warn!(reason = %reason, "rejected oauth callback");
            record_callback(outcome_label(&reason));
            let body = format!("Authorization failed: {reason}. You can close this window.");
            shared.signal(CallbackOutcome::Error(reason));
            return (StatusCode::BAD_REQUEST, body).into_response();
        },
    };

    let (respond, located) = oneshot::channel();
    if shared.hold(PendingRedirect { respond }).is_err() {
        debug!("callback arrived with a redirect already pending or after close");
        record_callback("duplicate");
        return found(&shared.config.fallback_url);
    }

    info!("accepted oauth callback");
    record_callback("accepted");
    shared.signal(CallbackOutcome::Success { code, state });

    // Held open until the flow decides where the browser should land.
    let location = located
        .await
        .unwrap_or_else(|_| shared.config.fallback_url.clone());
    found(&location)
}

async fn not_found_handler() -> StatusCode {
    record_callback("not_found");
    StatusCode::NOT_FOUND
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn validate_callback(
    params: CallbackParams,
    expected_state: &str,
) -> Result<(String, String)> {
    if let Some(error) = params.error {
        return Err(OAuthError::AuthorizationDenied {
            error,
            description: params.error_description,
        });
    }
    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or(OAuthError::NoAuthorizationCode)?;
    let state = params.state.unwrap_or_default();
    if !states_match(&state, expected_state) {
        return Err(OAuthError::InvalidState);
    }
    Ok((code, state))
}

/// Exact, constant-time state comparison.
pub(crate) fn states_match(received: &str, expected: &str) -> bool {
    let (a, b) = (received.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn outcome_label(reason: &OAuthError) -> &'static str {
    match reason {
        OAuthError::NoAuthorizationCode => "missing_code",
        OAuthError::MalformedCallback(_) => "malformed",
        OAuthError::InvalidState => "invalid_state",
        OAuthError::AuthorizationDenied { .. } => "denied",
        _ => "error",
    }
}

#[cfg(feature = "metrics")]
fn record_callback(outcome: &'static str) {
    counter!(oauth_metrics::CALLBACK_REQUESTS_TOTAL, labels::OUTCOME => outcome).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_callback(_outcome: &'static str) {}
