//! First-wins coordination between the loopback callback and a pasted code.

use std::{
    sync::{Arc, Mutex, PoisonError, Weak},
    time::Duration,
};

use {
    tokio::sync::oneshot,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::{
    callback_server::{CallbackOutcome, states_match},
    error::{OAuthError, Result},
};

/// Which channel delivered the authorization code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChannel {
    Automatic,
    Manual,
}

impl CodeChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WinningCode {
    pub code: String,
    pub channel: CodeChannel,
}

type ManualSlot = Mutex<Option<oneshot::Sender<String>>>;

/// Handle for delivering a code the user pasted.
///
/// Cloneable; the first [`submit`](Self::submit) across all clones is the one
/// that counts. Once the race has settled every submit returns `false`.
#[derive(Clone)]
pub struct ManualCodeSender {
    slot: Arc<ManualSlot>,
}

impl ManualCodeSender {
    /// Offer raw user input (`code` or `code#state`). Returns whether it was taken.
    pub fn submit(&self, input: impl Into<String>) -> bool {
        let taken = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(tx) => tx.send(input.into()).is_ok(),
            None => false,
        }
    }

    /// Whether the race would still accept a submission.
    pub fn is_open(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl std::fmt::Debug for ManualCodeSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualCodeSender")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Waits for whichever of the two channels produces a code first.
pub struct CodeRace {
    expected_state: String,
    automatic: Option<oneshot::Receiver<CallbackOutcome>>,
    manual: oneshot::Receiver<String>,
    // Weak so that dropping every sender closes the manual channel.
    manual_slot: Weak<ManualSlot>,
}

impl CodeRace {
    /// `automatic` is `None` when no loopback listener is running.
    pub fn new(
        expected_state: impl Into<String>,
        automatic: Option<oneshot::Receiver<CallbackOutcome>>,
    ) -> (Self, ManualCodeSender) {
        let (tx, manual) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let race = Self {
            expected_state: expected_state.into(),
            automatic,
            manual,
            manual_slot: Arc::downgrade(&slot),
        };
        (race, ManualCodeSender { slot })
    }

    /// Resolve with the first code, the first fatal error, cancellation or
    /// the deadline. Later deliveries on either channel are ignored.
    pub async fn wait(
        self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<WinningCode> {
        let Self {
            expected_state,
            mut automatic,
            mut manual,
            manual_slot,
        } = self;
        let mut manual_open = true;

        let deadline = async {
            match timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let result = loop {
            if automatic.is_none() && !manual_open {
                break Err(OAuthError::ChannelClosed);
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Err(OAuthError::Cancelled),
                () = &mut deadline => {
                    break Err(OAuthError::TimedOut(timeout.map(|d| d.as_secs()).unwrap_or_default()));
                },
                received = recv_automatic(&mut automatic), if automatic.is_some() => match received {
                    Some(CallbackOutcome::Success { code, .. }) => {
                        break Ok(WinningCode { code, channel: CodeChannel::Automatic });
                    },
                    Some(CallbackOutcome::Error(e)) => break Err(e),
                    None => {
                        debug!("callback listener gone without a result, waiting for manual code");
                        automatic = None;
                    },
                },
                pasted = &mut manual, if manual_open => match pasted {
                    Ok(input) => {
                        break parse_manual_input(&input, &expected_state)
                            .map(|code| WinningCode { code, channel: CodeChannel::Manual });
                    },
                    Err(_) => {
                        debug!("manual code channel closed");
                        manual_open = false;
                    },
                },
            }
        };

        if let Some(slot) = manual_slot.upgrade() {
            slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
        if let Ok(winner) = &result {
            info!(channel = winner.channel.as_str(), "authorization code received");
        }
        result
    }
}

async fn recv_automatic(
    rx: &mut Option<oneshot::Receiver<CallbackOutcome>>,
) -> Option<CallbackOutcome> {
    match rx {
        Some(rx) => rx.await.ok(),
        None => std::future::pending().await,
    }
}

/// Extract the code from pasted input.
///
/// The success page shows `code#state`; a bare code is accepted too. When a
/// state fragment is present it must match exactly.
pub fn parse_manual_input(input: &str, expected_state: &str) -> Result<String> {
    let input = input.trim();
    let (code, state) = match input.split_once('#') {
        Some((code, state)) => (code.trim(), Some(state.trim())),
        None => (input, None),
    };
    if code.is_empty() {
        return Err(OAuthError::NoAuthorizationCode);
    }
    if let Some(state) = state
        && !states_match(state, expected_state)
    {
        return Err(OAuthError::InvalidState);
    }
    Ok(code.to_string())
}
