use crate::oauth::Authenticator;
use crate::session::Session;
use eyre::Context;
use jiff::Timestamp;
use std::sync::Arc;
use std::time::Duration;

/// How often the token expiry is checked.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Keeps `session` fresh by refreshing it shortly before it expires.
///
/// Only returns on failure: a token that could not be renewed will stop working soon, so the
/// error is meant to end the process.
pub async fn run_refresh_monitor<A: Authenticator>(
    session: Session,
    auth: Arc<A>,
    check_interval: Duration,
) -> eyre::Result<()> {
    let mut interval = tokio::time::interval(check_interval);
    let expires_at = session.expires_at().await;
    tracing::debug!(%expires_at, "starting token refresh monitor");

    loop {
        interval.tick().await;
        session
            .refresh_if_expiring(&*auth, Timestamp::now())
            .await
            .context("keep access token fresh")?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryStore;
    use crate::session::tests::{FakeAuth, credentials_expiring_at};
    use jiff::SignedDuration;
    use std::sync::atomic::Ordering;

    fn session_expiring_in(secs: i64) -> Session {
        let expires_at = Timestamp::now() + SignedDuration::from_secs(secs);
        Session::new(
            credentials_expiring_at(expires_at),
            Arc::new(MemoryStore::default()),
        )
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn monitor_can_be_spawned_on_a_multi_threaded_runtime() {
        let monitor = run_refresh_monitor(
            session_expiring_in(60 * 60),
            Arc::new(FakeAuth::default()),
            CHECK_INTERVAL,
        );
        assert_send(&monitor);
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_once_when_inside_window() {
        let auth = Arc::new(FakeAuth::default());
        let session = session_expiring_in(5 * 60);
        let task = tokio::spawn(run_refresh_monitor(
            session.clone(),
            auth.clone(),
            CHECK_INTERVAL,
        ));

        tokio::time::sleep(Duration::from_millis(5500)).await;

        assert_eq!(auth.refreshed.load(Ordering::SeqCst), 1);
        assert_eq!(session.access_token().await.secret(), "refreshed-access-1");
        assert!(!task.is_finished());
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn leaves_token_alone_outside_window() {
        let auth = Arc::new(FakeAuth::default());
        let session = session_expiring_in(60 * 60);
        let task = tokio::spawn(run_refresh_monitor(
            session.clone(),
            auth.clone(),
            CHECK_INTERVAL,
        ));

        tokio::time::sleep(Duration::from_millis(5500)).await;

        assert_eq!(auth.refreshed.load(Ordering::SeqCst), 0);
        assert_eq!(session.access_token().await.secret(), "old-access");
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_failure_ends_the_monitor() {
        let auth = Arc::new(FakeAuth {
            reject_refresh: true,
            ..FakeAuth::default()
        });
        let session = session_expiring_in(60);

        let result = run_refresh_monitor(session, auth, CHECK_INTERVAL).await;

        assert!(result.is_err());
    }
}
