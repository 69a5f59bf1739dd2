//! Bearer-token acquisition with single-flight refresh.
//!
//! Resumable-upload sessions authenticate with a short-lived bearer token
//! instead of per-request signatures. The cache here makes sure that when a
//! token expires under concurrent load, exactly one fetch goes to the
//! provider and every waiter shares its result.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;

use crate::error::Error;

/// A bearer token plus its absolute expiry.
#[derive(Debug, Clone)]
pub struct BearerToken {
    pub value: String,
    pub expires_at: Instant,
}

impl BearerToken {
    pub fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn fresh_at(&self, now: Instant, skew: Duration) -> bool {
        now + skew < self.expires_at
    }
}

/// Source of bearer tokens, typically a metadata server or an OAuth exchange.
pub trait TokenProvider: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, Result<BearerToken, Error>>;
}

/// Caches the current token and refreshes it through the provider when it is
/// within `expiry_skew` of expiring.
///
/// The mutex is held across the provider call. That is the single-flight
/// mechanism: concurrent callers that find a stale token queue on the lock,
/// and all but the first observe the freshly stored token without fetching.
pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    slot: Mutex<Option<BearerToken>>,
    expiry_skew: Duration,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self::with_skew(provider, Duration::from_secs(30))
    }

    pub fn with_skew(provider: Arc<dyn TokenProvider>, expiry_skew: Duration) -> Self {
        Self {
            provider,
            slot: Mutex::new(None),
            expiry_skew,
        }
    }

    pub async fn get(&self) -> Result<BearerToken, Error> {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref() {
            if token.fresh_at(Instant::now(), self.expiry_skew) {
                return Ok(token.clone());
            }
        }

        tracing::debug!("bearer token stale, refreshing");
        let token = self.provider.fetch().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next [`get`](Self::get) refetches. Used
    /// after a 401 on a request that carried a token we believed fresh.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}
