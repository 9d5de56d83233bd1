use crate::background::{CHECK_INTERVAL, Poller, run_refresh_monitor};
use crate::cli::Cli;
use crate::config::{Config, CredentialStoreKind};
use crate::credentials::{CredentialStore, KeyringStore, MemoryStore};
use crate::helix_api::{BroadcasterId, HelixClient};
use crate::labels::{HelixLabel, Label};
use crate::oauth::OAuthManager;
use crate::session::Session;
use eyre::Context;
use oauth2::{ClientId, ClientSecret};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

pub mod background;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod helix_api;
pub mod labels;
pub mod oauth;
pub mod session;

/// Forgets the stored token pair so the next run authorizes from scratch.
pub fn logout() -> eyre::Result<()> {
    credentials::clear(&KeyringStore::default()).context("remove stored credentials")?;
    tracing::info!("stored credentials removed");
    Ok(())
}

pub fn credential_store(kind: CredentialStoreKind) -> Arc<dyn CredentialStore> {
    match kind {
        CredentialStoreKind::Keyring => Arc::new(KeyringStore::default()),
        CredentialStoreKind::Memory => Arc::new(MemoryStore::default()),
    }
}

/// Authenticates, resolves the broadcaster and keeps the requested labels up to date.
///
/// Runs until a background task fails or the process is interrupted.
pub async fn run(cli: &Cli, config: Config) -> eyre::Result<()> {
    let labels = cli.labels();
    let login = cli
        .channel_name
        .clone()
        .or(config.login)
        .ok_or_else(|| eyre::eyre!("no channel name given and no login configured"))?;

    let client_id = ClientId::new(config.client_id);
    let auth = Arc::new(OAuthManager::new(
        client_id.clone(),
        config.client_secret.map(ClientSecret::new),
        config.auth,
    )?);
    let store = credential_store(config.credential_store);
    let session = Session::establish(&*auth, store).await?;

    let helix = HelixClient::new(client_id, session.clone())?;
    let user = helix
        .user_by_login(&login)
        .await
        .with_context(|| format!("look up broadcaster {login}"))?
        .ok_or_else(|| eyre::eyre!("no Twitch user named {login:?}"))?;
    let broadcaster = BroadcasterId::new(user.id);
    tracing::info!(%broadcaster, name = %user.display_name, "resolved broadcaster");

    let mut tasks = JoinSet::new();
    tasks.spawn(run_refresh_monitor(session, auth, CHECK_INTERVAL));
    spawn_pollers(
        &mut tasks,
        &labels,
        &helix,
        &broadcaster,
        &cli.output,
        cli.refresh_interval,
    );

    // dropping the JoinSet aborts whatever is still running
    tokio::select! {
        result = supervise(&mut tasks) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    }
}

fn spawn_pollers(
    tasks: &mut JoinSet<eyre::Result<()>>,
    labels: &[Label],
    helix: &HelixClient,
    broadcaster: &BroadcasterId,
    output: &Path,
    period: Duration,
) {
    for &label in labels {
        let source = HelixLabel::new(label, helix.clone(), broadcaster.clone());
        let poller = Poller::new(source, output);
        tasks.spawn(async move {
            poller.run(period).await;
            Ok(())
        });
    }
}

/// Waits for the first task to end; any task ending is an error since all of them loop forever.
async fn supervise(tasks: &mut JoinSet<eyre::Result<()>>) -> eyre::Result<()> {
    match tasks.join_next().await {
        Some(Ok(Ok(()))) => eyre::bail!("background task stopped unexpectedly"),
        Some(Ok(Err(e))) => Err(e),
        Some(Err(e)) => Err(e).context("background task panicked"),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_task_is_reported() {
        let mut tasks = JoinSet::new();
        tasks.spawn(std::future::pending::<eyre::Result<()>>());
        tasks.spawn(async { Err(eyre::eyre!("refresh rejected")) });

        let err = supervise(&mut tasks).await.unwrap_err();
        assert_eq!(err.to_string(), "refresh rejected");
    }

    #[tokio::test]
    async fn task_ending_is_an_error() {
        let mut tasks = JoinSet::new();
        tasks.spawn(async { Ok(()) });

        assert!(supervise(&mut tasks).await.is_err());
    }

    #[test]
    fn memory_store_starts_empty() {
        let store = credential_store(CredentialStoreKind::Memory);
        assert!(credentials::load(&*store).unwrap().is_none());
    }
}
