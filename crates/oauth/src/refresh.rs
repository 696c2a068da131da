//! Expiry checks and refresh-on-read for stored token sets.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError},
};

use {
    tokio::sync::{Mutex, OwnedMutexGuard},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use c2switch_metrics::{counter, oauth as oauth_metrics};

use crate::{
    error::{OAuthError, Result},
    storage::TokenSink,
    token_exchange::{TokenClient, unix_now},
    types::TokenSet,
};

/// True iff `now + buffer_secs >= expires_at`. Never true without an expiry.
pub fn needs_refresh_at(expires_at: Option<u64>, buffer_secs: u64, now: u64) -> bool {
    expires_at.is_some_and(|expires_at| now.saturating_add(buffer_secs) >= expires_at)
}

pub fn needs_refresh(tokens: &TokenSet, buffer_secs: u64) -> bool {
    needs_refresh_at(tokens.expires_at, buffer_secs, unix_now())
}

/// Hands out usable token sets, refreshing and persisting them when they are
/// about to expire. Refreshes are serialized per account so a rotated refresh
/// token is never redeemed twice.
pub struct TokenManager<S> {
    client: TokenClient,
    sink: S,
    buffer_secs: u64,
    account_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: TokenSink> TokenManager<S> {
    /// Uses the client's configured refresh buffer.
    pub fn new(client: TokenClient, sink: S) -> Self {
        let buffer_secs = client.config().refresh_buffer_secs;
        Self {
            client,
            sink,
            buffer_secs,
            account_locks: std::sync::Mutex::default(),
        }
    }

    #[must_use]
    pub fn with_buffer_secs(mut self, buffer_secs: u64) -> Self {
        self.buffer_secs = buffer_secs;
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The stored token set for `account_id`, refreshed first if it is
    /// inside the buffer window.
    pub async fn valid_tokens(&self, account_id: &str) -> Result<TokenSet> {
        let _guard = self.lock_account(account_id).await;
        let current = self.load(account_id).await?;
        if !needs_refresh(&current, self.buffer_secs) {
            debug!(account_id, "stored token still fresh");
            return Ok(current);
        }
        self.refresh_locked(account_id, current).await
    }

    /// Refresh regardless of expiry.
    pub async fn force_refresh(&self, account_id: &str) -> Result<TokenSet> {
        let _guard = self.lock_account(account_id).await;
        let current = self.load(account_id).await?;
        self.refresh_locked(account_id, current).await
    }

    async fn lock_account(&self, account_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .account_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(account_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    async fn load(&self, account_id: &str) -> Result<TokenSet> {
        self.sink
            .load(account_id)
            .await
            .map_err(OAuthError::Storage)?
            .ok_or_else(|| OAuthError::AccountNotFound(account_id.to_string()))
    }

    async fn refresh_locked(&self, account_id: &str, current: TokenSet) -> Result<TokenSet> {
        let refresh_token = current
            .refresh_token()
            .ok_or_else(|| OAuthError::NoRefreshToken(account_id.to_string()))?;

        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::TOKEN_REFRESHES_TOTAL).increment(1);

        let mut fresh = match self.client.refresh(refresh_token).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(account_id, error = %e, "token refresh failed");
                #[cfg(feature = "metrics")]
                counter!(oauth_metrics::TOKEN_REFRESH_ERRORS_TOTAL).increment(1);
                return Err(e);
            },
        };
        if fresh.scopes.is_empty() {
            fresh.scopes = current.scopes.clone();
        }
        if fresh.subscription_type.is_none() {
            fresh.subscription_type = current.subscription_type.clone();
        }

        self.sink
            .save(account_id, &fresh)
            .await
            .map_err(OAuthError::Storage)?;
        info!(account_id, expires_at = ?fresh.expires_at, "refreshed access token");
        Ok(fresh)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use {
        async_trait::async_trait,
        axum::{Json, Router, routing::post},
        secrecy::SecretString,
    };

    use {super::*, crate::types::OAuthConfig};

    #[derive(Default)]
    struct MemorySink {
        tokens: std::sync::Mutex<HashMap<String, TokenSet>>,
    }

    #[async_trait]
    impl TokenSink for MemorySink {
        async fn save(&self, account_id: &str, tokens: &TokenSet) -> anyhow::Result<()> {
            self.tokens
                .lock()
                .unwrap()
                .insert(account_id.to_string(), tokens.clone());
            Ok(())
        }

        async fn load(&self, account_id: &str) -> anyhow::Result<Option<TokenSet>> {
            Ok(self.tokens.lock().unwrap().get(account_id).cloned())
        }
    }

    async fn start_mock(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Refresh endpoint that counts calls and never rotates the refresh token.
    async fn refresh_endpoint() -> (TokenClient, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = Router::new().route(
            "/token",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Json(serde_json::json!({
                        "access_token": format!("at-{n}"),
                        "expires_in": 3600
                    }))
                }
            }),
        );
        let base = start_mock(app).await;
        let config = OAuthConfig {
            token_url: format!("{base}/token"),
            ..Default::default()
        };
        (TokenClient::new(config).unwrap(), calls)
    }

    fn stored(expires_at: Option<u64>, refresh: Option<&str>) -> TokenSet {
        TokenSet {
            access_token: SecretString::new("at-old".into()),
            refresh_token: refresh.map(|r| SecretString::new(r.into())),
            expires_at,
            scopes: vec!["user:inference".into()],
            subscription_type: Some("max".into()),
        }
    }

    #[test]
    fn buffer_boundary_is_inclusive() {
        let now = 1_000_000;
        assert!(needs_refresh_at(Some(now + 250), 300, now));
        assert!(needs_refresh_at(Some(now + 300), 300, now));
        assert!(!needs_refresh_at(Some(now + 301), 300, now));
        assert!(needs_refresh_at(Some(now - 1), 0, now));
    }

    #[test]
    fn no_expiry_never_needs_refresh() {
        assert!(!needs_refresh_at(None, u64::MAX, 0));
        assert!(!needs_refresh(&stored(None, Some("rt")), 600));
    }

    #[tokio::test]
    async fn fresh_tokens_are_returned_untouched() {
        let (client, calls) = refresh_endpoint().await;
        let manager = TokenManager::new(client, MemorySink::default());
        let far = unix_now() + 86_400;
        manager.sink().save("a", &stored(Some(far), Some("rt"))).await.unwrap();

        let tokens = manager.valid_tokens("a").await.unwrap();
        assert_eq!(tokens.access_token(), "at-old");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_tokens_are_refreshed_and_saved() {
        let (client, calls) = refresh_endpoint().await;
        let manager = TokenManager::new(client, MemorySink::default()).with_buffer_secs(300);
        let soon = unix_now() + 100;
        manager.sink().save("a", &stored(Some(soon), Some("rt-1"))).await.unwrap();

        let tokens = manager.valid_tokens("a").await.unwrap();
        assert_eq!(tokens.access_token(), "at-0");
        assert_eq!(tokens.refresh_token(), Some("rt-1"));
        assert_eq!(tokens.scopes, vec!["user:inference"]);
        assert_eq!(tokens.subscription_type.as_deref(), Some("max"));

        let saved = manager.sink().load("a").await.unwrap().unwrap();
        assert_eq!(saved.access_token(), "at-0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_reads_refresh_once() {
        let (client, calls) = refresh_endpoint().await;
        let manager = Arc::new(TokenManager::new(client, MemorySink::default()));
        manager.sink().save("a", &stored(Some(1), Some("rt"))).await.unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.valid_tokens("a").await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().access_token(), "at-0");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_of_one_account_does_not_block_another() {
        let (client, _) = refresh_endpoint().await;
        let manager = TokenManager::new(client, MemorySink::default());
        let far = unix_now() + 86_400;
        manager.sink().save("b", &stored(Some(far), Some("rt"))).await.unwrap();

        let held = manager.lock_account("a").await;
        let tokens = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            manager.valid_tokens("b"),
        )
        .await
        .expect("account b waited on account a")
        .unwrap();
        assert_eq!(tokens.access_token(), "at-old");
        drop(held);
    }

    #[tokio::test]
    async fn force_refresh_ignores_expiry() {
        let (client, calls) = refresh_endpoint().await;
        let manager = TokenManager::new(client, MemorySink::default());
        manager.sink().save("a", &stored(None, Some("rt"))).await.unwrap();
        manager.force_refresh("a").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_account_or_refresh_token() {
        let (client, _) = refresh_endpoint().await;
        let manager = TokenManager::new(client, MemorySink::default());
        assert!(matches!(
            manager.valid_tokens("nobody").await,
            Err(OAuthError::AccountNotFound(_))
        ));

        manager.sink().save("a", &stored(Some(1), None)).await.unwrap();
        assert!(matches!(
            manager.valid_tokens("a").await,
            Err(OAuthError::NoRefreshToken(_))
        ));
    }
}
