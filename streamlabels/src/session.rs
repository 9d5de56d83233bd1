//! The user access token shared by every background task.

use crate::credentials::{self, CredentialStore};
use crate::oauth::{Authenticator, TokenGrant};
use eyre::Context;
use jiff::{SignedDuration, Timestamp};
use oauth2::{AccessToken, RefreshToken};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Tokens are renewed once they are this close to expiring.
pub const REFRESH_MARGIN: SignedDuration = SignedDuration::from_secs(10 * 60);

/// Lifetime assumed when the token endpoint does not report one.
const DEFAULT_LIFETIME: SignedDuration = SignedDuration::from_secs(60 * 60);

/// A user access token together with the means to renew it.
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    access_token: AccessToken,
    refresh_token: RefreshToken,
    expires_at: Timestamp,
}

impl OAuthCredentials {
    /// Builds credentials from a token grant received at `now`.
    ///
    /// Twitch may leave out the refresh token when refreshing; `previous` is kept in that case.
    pub fn from_grant(
        grant: TokenGrant,
        previous: Option<RefreshToken>,
        now: Timestamp,
    ) -> eyre::Result<Self> {
        let refresh_token = match (grant.refresh_token.clone(), previous) {
            (Some(fresh), _) => fresh,
            (None, Some(previous)) => {
                tracing::trace!("new token lacks refresh token, preserving original");
                previous
            }
            (None, None) => eyre::bail!("token response did not include a refresh token"),
        };
        let missing = grant.missing_scopes();
        if !missing.is_empty() {
            tracing::warn!(
                ?missing,
                "token lacks scopes, the labels needing them will fail to fetch"
            );
        }
        let lifetime = grant
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(SignedDuration::from_secs)
            .unwrap_or(DEFAULT_LIFETIME);
        let expires_at = now
            .checked_add(lifetime)
            .context("compute token expiry")?;
        Ok(Self {
            access_token: grant.access_token,
            refresh_token,
            expires_at,
        })
    }

    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &RefreshToken {
        &self.refresh_token
    }

    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// Whether the token should be renewed at `now`.
    pub fn needs_refresh(&self, now: Timestamp) -> bool {
        needs_refresh(self.expires_at, now)
    }
}

/// True once `now` is within [`REFRESH_MARGIN`] of `expires_at` (or past it).
pub fn needs_refresh(expires_at: Timestamp, now: Timestamp) -> bool {
    match expires_at.checked_sub(REFRESH_MARGIN) {
        Ok(refresh_at) => now >= refresh_at,
        Err(_) => true,
    }
}

/// Exclusive holder of the [`OAuthCredentials`] of this process.
///
/// Cloning is cheap; all clones see the same credentials. A refresh holds the lock for its whole
/// duration, so readers either get the old token before the refresh starts or the new one after
/// it completes.
#[derive(Debug, Clone)]
pub struct Session {
    credentials: Arc<Mutex<OAuthCredentials>>,
    store: Arc<dyn CredentialStore>,
}

impl Session {
    /// Wraps already-valid credentials.
    pub fn new(credentials: OAuthCredentials, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            credentials: Arc::new(Mutex::new(credentials)),
            store,
        }
    }

    /// Produces a usable session, reusing stored tokens when there are any.
    ///
    /// Stored tokens are refreshed straight away since their expiry is not persisted. If that
    /// refresh is rejected the stored tokens are useless and the error says so. Without stored
    /// tokens, `auth` is asked to acquire new ones from the user. Either way the resulting
    /// token pair is written back to `store`.
    pub async fn establish<A: Authenticator>(
        auth: &A,
        store: Arc<dyn CredentialStore>,
    ) -> eyre::Result<Self> {
        let credentials = match credentials::load(&*store).context("load stored credentials")? {
            Some(stored) => {
                tracing::info!("refreshing stored credentials");
                let grant = auth.refresh(&stored.refresh_token).await.context(
                    "refresh stored credentials (run with --logout to discard them)",
                )?;
                OAuthCredentials::from_grant(grant, Some(stored.refresh_token), Timestamp::now())?
            }
            None => {
                tracing::info!("no stored credentials, asking user to authorize");
                let grant = auth.acquire().await.context("authorize user to Twitch")?;
                OAuthCredentials::from_grant(grant, None, Timestamp::now())?
            }
        };

        credentials::save(
            &*store,
            credentials.access_token(),
            credentials.refresh_token(),
        )
        .context("persist credentials")?;
        tracing::info!(expires_at = %credentials.expires_at(), "OAuth session established");

        Ok(Self::new(credentials, store))
    }

    /// The current access token.
    ///
    /// Waits for an in-flight refresh to finish.
    pub async fn access_token(&self) -> AccessToken {
        self.credentials.lock().await.access_token.clone()
    }

    pub async fn expires_at(&self) -> Timestamp {
        self.credentials.lock().await.expires_at
    }

    /// Refreshes the credentials if they expire within [`REFRESH_MARGIN`] of `now`.
    ///
    /// Returns whether a refresh took place. On success the new token pair is persisted.
    pub async fn refresh_if_expiring<A: Authenticator>(
        &self,
        auth: &A,
        now: Timestamp,
    ) -> eyre::Result<bool> {
        let mut credentials = self.credentials.lock().await;
        if !credentials.needs_refresh(now) {
            return Ok(false);
        }

        tracing::debug!(expires_at = %credentials.expires_at, "access token about to expire");
        let grant = auth
            .refresh(&credentials.refresh_token)
            .await
            .context("refresh OAuth token")?;
        let renewed =
            OAuthCredentials::from_grant(grant, Some(credentials.refresh_token.clone()), now)?;
        credentials::save(&*self.store, &renewed.access_token, &renewed.refresh_token)
            .context("persist refreshed credentials")?;
        *credentials = renewed;

        tracing::info!(expires_at = %credentials.expires_at, "access token refreshed");
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::credentials::{ACCESS_TOKEN, MemoryStore, REFRESH_TOKEN};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out numbered tokens and counts how often it was asked.
    #[derive(Debug, Default)]
    pub(crate) struct FakeAuth {
        pub(crate) acquired: AtomicUsize,
        pub(crate) refreshed: AtomicUsize,
        pub(crate) reject_refresh: bool,
    }

    impl FakeAuth {
        fn grant(kind: &str, n: usize) -> TokenGrant {
            TokenGrant {
                access_token: AccessToken::new(format!("{kind}-access-{n}")),
                refresh_token: Some(RefreshToken::new(format!("{kind}-refresh-{n}"))),
                expires_in: Some(4 * 60 * 60),
                scope: Vec::new(),
            }
        }
    }

    impl Authenticator for FakeAuth {
        async fn acquire(&self) -> eyre::Result<TokenGrant> {
            let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Self::grant("acquired", n))
        }

        async fn refresh(&self, _refresh_token: &RefreshToken) -> eyre::Result<TokenGrant> {
            if self.reject_refresh {
                eyre::bail!("token request failed with status 400: Invalid refresh token");
            }
            let n = self.refreshed.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Self::grant("refreshed", n))
        }
    }

    pub(crate) fn credentials_expiring_at(expires_at: Timestamp) -> OAuthCredentials {
        OAuthCredentials {
            access_token: AccessToken::new("old-access".to_string()),
            refresh_token: RefreshToken::new("old-refresh".to_string()),
            expires_at,
        }
    }

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_second(secs).unwrap()
    }

    #[test]
    fn refresh_window_starts_ten_minutes_before_expiry() {
        let expires_at = ts(1_700_000_000);
        assert!(!needs_refresh(expires_at, ts(1_700_000_000 - 3600)));
        assert!(!needs_refresh(expires_at, ts(1_700_000_000 - 601)));
        assert!(needs_refresh(expires_at, ts(1_700_000_000 - 600)));
        assert!(needs_refresh(expires_at, ts(1_700_000_000 - 1)));
        assert!(needs_refresh(expires_at, ts(1_700_000_000 + 5)));
    }

    #[test]
    fn grant_without_refresh_token_keeps_previous_one() {
        let grant = TokenGrant {
            access_token: AccessToken::new("new".to_string()),
            refresh_token: None,
            expires_in: Some(100),
            scope: Vec::new(),
        };
        let creds = OAuthCredentials::from_grant(
            grant.clone(),
            Some(RefreshToken::new("kept".to_string())),
            ts(1000),
        )
        .unwrap();
        assert_eq!(creds.refresh_token().secret(), "kept");
        assert_eq!(creds.expires_at(), ts(1100));

        assert!(OAuthCredentials::from_grant(grant, None, ts(1000)).is_err());
    }

    #[test]
    fn grant_without_lifetime_gets_default() {
        let grant = TokenGrant {
            access_token: AccessToken::new("new".to_string()),
            refresh_token: Some(RefreshToken::new("r".to_string())),
            expires_in: None,
            scope: Vec::new(),
        };
        let creds = OAuthCredentials::from_grant(grant, None, ts(0)).unwrap();
        assert_eq!(creds.expires_at(), ts(3600));
    }

    #[tokio::test]
    async fn no_refresh_before_window() {
        let auth = FakeAuth::default();
        let store = Arc::new(MemoryStore::default());
        let session = Session::new(credentials_expiring_at(ts(10_000)), store.clone());

        let refreshed = session
            .refresh_if_expiring(&auth, ts(10_000 - 601))
            .await
            .unwrap();

        assert!(!refreshed);
        assert_eq!(auth.refreshed.load(Ordering::SeqCst), 0);
        assert_eq!(session.access_token().await.secret(), "old-access");
        assert_eq!(store.get(ACCESS_TOKEN).unwrap(), None);
    }

    #[tokio::test]
    async fn refresh_inside_window_replaces_and_persists_tokens() {
        let auth = FakeAuth::default();
        let store = Arc::new(MemoryStore::default());
        let session = Session::new(credentials_expiring_at(ts(10_000)), store.clone());

        let refreshed = session
            .refresh_if_expiring(&auth, ts(10_000 - 599))
            .await
            .unwrap();

        assert!(refreshed);
        assert_eq!(auth.refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(session.access_token().await.secret(), "refreshed-access-1");
        assert_eq!(session.expires_at().await, ts(10_000 - 599 + 4 * 60 * 60));
        assert_eq!(
            store.get(ACCESS_TOKEN).unwrap().as_deref(),
            Some("refreshed-access-1")
        );
        assert_eq!(
            store.get(REFRESH_TOKEN).unwrap().as_deref(),
            Some("refreshed-refresh-1")
        );
    }

    #[tokio::test]
    async fn failed_refresh_is_an_error_and_keeps_old_token() {
        let auth = FakeAuth {
            reject_refresh: true,
            ..FakeAuth::default()
        };
        let session = Session::new(
            credentials_expiring_at(ts(10_000)),
            Arc::new(MemoryStore::default()),
        );

        assert!(session.refresh_if_expiring(&auth, ts(10_000)).await.is_err());
        assert_eq!(session.access_token().await.secret(), "old-access");
    }

    #[tokio::test]
    async fn establish_acquires_when_nothing_is_stored() {
        let auth = FakeAuth::default();
        let store = Arc::new(MemoryStore::default());

        let session = Session::establish(&auth, store.clone()).await.unwrap();

        assert_eq!(auth.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(auth.refreshed.load(Ordering::SeqCst), 0);
        assert_eq!(session.access_token().await.secret(), "acquired-access-1");
        assert_eq!(
            store.get(REFRESH_TOKEN).unwrap().as_deref(),
            Some("acquired-refresh-1")
        );
    }

    #[tokio::test]
    async fn establish_refreshes_stored_tokens() {
        let auth = FakeAuth::default();
        let store = Arc::new(MemoryStore::default());
        store.set(ACCESS_TOKEN, "stored-access").unwrap();
        store.set(REFRESH_TOKEN, "stored-refresh").unwrap();

        let session = Session::establish(&auth, store.clone()).await.unwrap();

        assert_eq!(auth.acquired.load(Ordering::SeqCst), 0);
        assert_eq!(auth.refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(session.access_token().await.secret(), "refreshed-access-1");
        assert_eq!(
            store.get(ACCESS_TOKEN).unwrap().as_deref(),
            Some("refreshed-access-1")
        );
    }

    #[tokio::test]
    async fn establish_fails_when_stored_tokens_are_rejected() {
        let auth = FakeAuth {
            reject_refresh: true,
            ..FakeAuth::default()
        };
        let store = Arc::new(MemoryStore::default());
        store.set(ACCESS_TOKEN, "stored-access").unwrap();
        store.set(REFRESH_TOKEN, "stored-refresh").unwrap();

        let err = Session::establish(&auth, store).await.unwrap_err();
        assert!(format!("{err:#}").contains("--logout"), "{err:#}");
        assert_eq!(auth.acquired.load(Ordering::SeqCst), 0);
    }
}
