//! Cached provider credentials with single-flight refresh.

use crate::error::GatewayError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Tokens are considered stale this long before they actually expire.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// Validity assumed when the provider does not report one.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn with_default_ttl(value: String, now: DateTime<Utc>) -> Self {
        Self {
            value,
            expires_at: now + Duration::hours(DEFAULT_TOKEN_TTL_HOURS),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Something that can log in and hand out a new token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn login(&self) -> Result<AccessToken, GatewayError>;
}

/// Owns the current token and its expiry.
///
/// Concurrent callers that find the token stale wait on the same mutex, so at
/// most one login is in flight; the rest reuse its result.
pub struct CredentialCache {
    source: Arc<dyn TokenSource>,
    token: Mutex<Option<AccessToken>>,
}

impl CredentialCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            token: Mutex::new(None),
        }
    }

    #[instrument(skip(self))]
    pub async fn get_valid_token(&self) -> Result<String, GatewayError> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref()
            && token.is_fresh(Utc::now())
        {
            return Ok(token.value.clone());
        }

        debug!("Refreshing provider token");
        let token = self.source.login().await?;
        let value = token.value.clone();
        *slot = Some(token);
        Ok(value)
    }

    /// Drops the cached token if it is still the one the provider rejected.
    ///
    /// Returns whether the token was dropped. A caller holding an older token
    /// leaves a newer login in place.
    pub async fn invalidate(&self, rejected: &str) -> bool {
        let mut slot = self.token.lock().await;
        if slot.as_ref().is_some_and(|token| token.value == rejected) {
            *slot = None;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        logins: AtomicUsize,
        ttl: Duration,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn login(&self) -> Result<AccessToken, GatewayError> {
            let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(AccessToken {
                value: format!("token-{n}"),
                expires_at: Utc::now() + self.ttl,
            })
        }
    }

    fn source(ttl: Duration) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            logins: AtomicUsize::new(0),
            ttl,
        })
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_login() {
        let source = source(Duration::hours(24));
        let cache = Arc::new(CredentialCache::new(source.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get_valid_token().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(source.logins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed() {
        let source = source(Duration::seconds(30));
        let cache = CredentialCache::new(source.clone());
        cache.get_valid_token().await.unwrap();
        assert_eq!(cache.get_valid_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_invalidate_forces_login() {
        let source = source(Duration::hours(24));
        let cache = CredentialCache::new(source.clone());
        let token = cache.get_valid_token().await.unwrap();
        assert!(cache.invalidate(&token).await);
        assert_eq!(cache.get_valid_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_stale_rejection_keeps_newer_token() {
        let source = source(Duration::hours(24));
        let cache = Arc::new(CredentialCache::new(source.clone()));
        let first = cache.get_valid_token().await.unwrap();
        let second = cache.get_valid_token().await.unwrap();
        assert_eq!(first, second);

        // Both requests were rejected; only the first rejection forces a login.
        assert!(cache.invalidate(&first).await);
        assert_eq!(cache.get_valid_token().await.unwrap(), "token-2");
        assert!(!cache.invalidate(&second).await);
        assert_eq!(cache.get_valid_token().await.unwrap(), "token-2");
        assert_eq!(source.logins.load(Ordering::SeqCst), 2);
    }
}
