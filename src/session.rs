//!
//! Account-session store: cached access tokens keyed by refresh credential.
//!
//! One entry per refresh credential (`rt`), created lazily on first use and
//! kept for the process lifetime. Each entry carries the current short-lived
//! access token, its expiry, and a sticky suspension flag set by the ban
//! detectors. Suspension is never cleared at runtime - a restart is the only
//! reset.
//!
//! The store performs no HTTP itself; refreshing is delegated through the
//! [`TokenRefresher`] seam so the upstream client stays the single place
//! that talks to the vendor (and tests can refresh without a network).
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{HighlightError, Result};

/* --- types ----------------------------------------------------------------------------------- */

///
/// Result of a successful token refresh against the vendor.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    /** new short-lived bearer token */
    pub access_token: String,
    /** server-declared lifetime in seconds */
    pub expires_in_secs: u64,
}

///
/// Seam for the vendor's token-refresh operation.
///
/// Implemented by the upstream client; mocked in tests.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    ///
    /// Exchange the refresh credential for a fresh access token.
    ///
    /// # Arguments
    ///  * `rt` - refresh credential
    ///  * `proxy` - optional per-account proxy URL
    async fn refresh_token(&self, rt: &str, proxy: Option<&str>) -> Result<RefreshedToken>;
}

///
/// Cached state for one account.
#[derive(Debug, Default, Clone)]
struct AccountSession {
    /** current access token; empty until the first refresh */
    access_token: String,
    /** unix seconds after which the token is unusable */
    expires_at: u64,
    /** sticky quarantine flag; set once, never cleared */
    suspended: bool,
}

///
/// Concurrency-safe token cache keyed by refresh credential.
///
/// All reads and writes go through one async mutex, which makes every
/// per-key update atomic. Token replacement is last-writer-wins; the
/// suspension flag is checked again after a refresh completes so a race
/// between a ban verdict and an in-flight refresh can never hand out a
/// token for a quarantined account.
pub struct SessionStore {
    /** upstream refresh operation */
    refresher: Arc<dyn TokenRefresher>,
    /** per-`rt` session entries */
    sessions: Mutex<HashMap<String, AccountSession>>,
}

/* --- constants ------------------------------------------------------------------------------ */

/** tokens are treated as expired this many seconds before the server says so */
const EXPIRY_MARGIN_SECS: u64 = 60;

/* --- start of code -------------------------------------------------------------------------- */

impl SessionStore {
    ///
    /// Create an empty store delegating refreshes to the given implementation.
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { refresher, sessions: Mutex::new(HashMap::new()) }
    }

    ///
    /// Get a usable access token for the account, refreshing if needed.
    ///
    /// Fails fast with `AccountSuspended` for quarantined accounts, without
    /// any network call. A cached token is returned only while strictly
    /// before its (margin-adjusted) expiry.
    ///
    /// # Arguments
    ///  * `rt` - refresh credential
    ///  * `proxy` - optional per-account proxy URL
    ///
    /// # Returns
    ///  * Valid access token
    ///  * `HighlightError::AccountSuspended` for quarantined accounts
    ///  * `HighlightError::UpstreamAuth` if the refresh is rejected
    pub async fn access_token(&self, rt: &str, proxy: Option<&str>) -> Result<String> {
        {
            let sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get(rt) {
                if session.suspended {
                    return Err(HighlightError::AccountSuspended);
                }
                if now_unix() < session.expires_at {
                    return Ok(session.access_token.clone());
                }
            }
        }

        self.force_refresh(rt, proxy).await
    }

    ///
    /// Unconditionally refresh the account's token and replace the cache entry.
    ///
    /// Called on cache misses, expiry, and after the upstream rejects a token
    /// with 401. Refreshing never clears the suspension flag; if the account
    /// was quarantined while the refresh was in flight, the fresh token is
    /// discarded.
    ///
    /// # Arguments
    ///  * `rt` - refresh credential
    ///  * `proxy` - optional per-account proxy URL
    ///
    /// # Returns
    ///  * Newly minted access token
    pub async fn force_refresh(&self, rt: &str, proxy: Option<&str>) -> Result<String> {
        if self.is_suspended(rt).await {
            return Err(HighlightError::AccountSuspended);
        }

        debug!(rt = mask(rt), "refreshing access token");
        let refreshed = self.refresher.refresh_token(rt, proxy).await?;
        let expires_at =
            now_unix() + refreshed.expires_in_secs.saturating_sub(EXPIRY_MARGIN_SECS);

        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(rt.to_string()).or_default();
        if session.suspended {
            warn!(rt = mask(rt), "account suspended during refresh, discarding token");
            return Err(HighlightError::AccountSuspended);
        }
        session.access_token = refreshed.access_token.clone();
        session.expires_at = expires_at;

        Ok(refreshed.access_token)
    }

    ///
    /// Quarantine the account. Idempotent; the flag is never cleared.
    ///
    /// # Arguments
    ///  * `rt` - refresh credential
    pub async fn mark_suspended(&self, rt: &str) {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(rt.to_string()).or_default();
        if !session.suspended {
            warn!(rt = mask(rt), "account marked suspended");
        }
        session.suspended = true;
    }

    ///
    /// Whether the account is quarantined.
    pub async fn is_suspended(&self, rt: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions.get(rt).map(|s| s.suspended).unwrap_or(false)
    }
}

///
/// Current unix time in seconds.
fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

///
/// Shorten a refresh credential for log lines.
fn mask(rt: &str) -> &str {
    let end = rt.char_indices().nth(8).map(|(i, _)| i).unwrap_or(rt.len());
    &rt[..end]
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct FakeRefresher {
        calls: AtomicU32,
        expires_in_secs: u64,
        reject: bool,
    }

    impl FakeRefresher {
        fn new(expires_in_secs: u64) -> Self {
            Self { calls: AtomicU32::new(0), expires_in_secs, reject: false }
        }

        fn rejecting() -> Self {
            Self { calls: AtomicU32::new(0), expires_in_secs: 3600, reject: true }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh_token(&self, _rt: &str, _proxy: Option<&str>) -> Result<RefreshedToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.reject {
                return Err(HighlightError::UpstreamAuth("refresh rejected".into()));
            }
            Ok(RefreshedToken {
                access_token: format!("at_{}", n),
                expires_in_secs: self.expires_in_secs,
            })
        }
    }

    #[tokio::test]
    async fn caches_token_until_expiry() {
        let refresher = Arc::new(FakeRefresher::new(3600));
        let store = SessionStore::new(refresher.clone());

        let first = store.access_token("rt_a", None).await.unwrap();
        let second = store.access_token("rt_a", None).await.unwrap();

        assert_eq!(first, "at_1");
        assert_eq!(second, "at_1");
        assert_eq!(refresher.call_count(), 1);
    }

    #[tokio::test]
    async fn short_ttl_never_serves_a_stale_token() {
        // A 10-second TTL falls entirely inside the 60-second safety margin,
        // so the cached token is already "expired" and every get refreshes.
        let refresher = Arc::new(FakeRefresher::new(10));
        let store = SessionStore::new(refresher.clone());

        let first = store.access_token("rt_a", None).await.unwrap();
        let second = store.access_token("rt_a", None).await.unwrap();

        assert_eq!(first, "at_1");
        assert_eq!(second, "at_2");
        assert_eq!(refresher.call_count(), 2);
    }

    #[tokio::test]
    async fn force_refresh_replaces_cached_token() {
        let refresher = Arc::new(FakeRefresher::new(3600));
        let store = SessionStore::new(refresher.clone());

        store.access_token("rt_a", None).await.unwrap();
        let forced = store.force_refresh("rt_a", None).await.unwrap();
        let cached = store.access_token("rt_a", None).await.unwrap();

        assert_eq!(forced, "at_2");
        assert_eq!(cached, "at_2");
    }

    #[tokio::test]
    async fn accounts_are_cached_independently() {
        let refresher = Arc::new(FakeRefresher::new(3600));
        let store = SessionStore::new(refresher.clone());

        store.access_token("rt_a", None).await.unwrap();
        store.access_token("rt_b", None).await.unwrap();

        assert_eq!(refresher.call_count(), 2);
    }

    #[tokio::test]
    async fn suspended_account_fails_fast_without_network() {
        let refresher = Arc::new(FakeRefresher::new(3600));
        let store = SessionStore::new(refresher.clone());

        store.mark_suspended("rt_a").await;

        let err = store.access_token("rt_a", None).await.unwrap_err();
        assert!(matches!(err, HighlightError::AccountSuspended));
        assert_eq!(refresher.call_count(), 0);

        let err = store.force_refresh("rt_a", None).await.unwrap_err();
        assert!(matches!(err, HighlightError::AccountSuspended));
        assert_eq!(refresher.call_count(), 0);
    }

    #[tokio::test]
    async fn refresh_does_not_clear_suspension() {
        let refresher = Arc::new(FakeRefresher::new(3600));
        let store = SessionStore::new(refresher.clone());

        store.access_token("rt_a", None).await.unwrap();
        store.mark_suspended("rt_a").await;
        store.mark_suspended("rt_a").await; // idempotent

        assert!(store.is_suspended("rt_a").await);
        assert!(store.access_token("rt_a", None).await.is_err());
    }

    #[tokio::test]
    async fn rejected_refresh_propagates_auth_error() {
        let refresher = Arc::new(FakeRefresher::rejecting());
        let store = SessionStore::new(refresher);

        let err = store.access_token("rt_a", None).await.unwrap_err();
        assert!(matches!(err, HighlightError::UpstreamAuth(_)));
    }
}
