//! Persistence of the OAuth token pair between runs.
//!
//! Tokens live in the operating system's secret store (through [`keyring`]) as two separate
//! entries under a fixed service name. Both entries are written together and removed together;
//! a store holding only one of them is treated as empty.

use eyre::Context;
use oauth2::{AccessToken, RefreshToken};
use std::collections::HashMap;
use std::sync::Mutex;

/// Service name under which all secrets are filed.
pub const SERVICE: &str = "streamlabels";

/// Entry name of the user access token.
pub const ACCESS_TOKEN: &str = "access_token";

/// Entry name of the refresh token.
pub const REFRESH_TOKEN: &str = "refresh_token";

/// A named-secret store.
///
/// Implementations must treat deleting a missing secret as success.
pub trait CredentialStore: std::fmt::Debug + Send + Sync {
    /// Returns the secret stored under `name`, or `None` if there is no such entry.
    fn get(&self, name: &str) -> eyre::Result<Option<String>>;

    /// Stores `secret` under `name`, replacing any previous value.
    fn set(&self, name: &str, secret: &str) -> eyre::Result<()>;

    /// Removes the secret stored under `name`, if any.
    fn delete(&self, name: &str) -> eyre::Result<()>;
}

/// [`CredentialStore`] backed by the platform keychain.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> eyre::Result<keyring::Entry> {
        keyring::Entry::new(&self.service, name)
            .with_context(|| format!("open keyring entry {}/{}", self.service, name))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(SERVICE)
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, name: &str) -> eyre::Result<Option<String>> {
        match self.entry(name)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read keyring entry {name}")),
        }
    }

    fn set(&self, name: &str, secret: &str) -> eyre::Result<()> {
        self.entry(name)?
            .set_password(secret)
            .with_context(|| format!("write keyring entry {name}"))
    }

    fn delete(&self, name: &str) -> eyre::Result<()> {
        match self.entry(name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("delete keyring entry {name}")),
        }
    }
}

/// [`CredentialStore`] that forgets everything when the process exits.
///
/// Used when no secret store is available on the host, and by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    fn secrets(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // a panic while holding the lock cannot leave the map half-updated
        self.secrets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, name: &str) -> eyre::Result<Option<String>> {
        Ok(self.secrets().get(name).cloned())
    }

    fn set(&self, name: &str, secret: &str) -> eyre::Result<()> {
        self.secrets().insert(name.to_string(), secret.to_string());
        Ok(())
    }

    fn delete(&self, name: &str) -> eyre::Result<()> {
        self.secrets().remove(name);
        Ok(())
    }
}

/// The token pair as persisted. The expiry is not stored.
#[derive(Debug, Clone)]
pub struct StoredTokens {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
}

/// Loads the stored token pair, if both halves are present.
pub fn load(store: &dyn CredentialStore) -> eyre::Result<Option<StoredTokens>> {
    let access = store.get(ACCESS_TOKEN).context("load access token")?;
    let refresh = store.get(REFRESH_TOKEN).context("load refresh token")?;
    match (access, refresh) {
        (Some(access), Some(refresh)) => Ok(Some(StoredTokens {
            access_token: AccessToken::new(access),
            refresh_token: RefreshToken::new(refresh),
        })),
        (None, None) => Ok(None),
        (access, _) => {
            tracing::warn!(
                has_access_token = access.is_some(),
                "credential store holds only half of the token pair, ignoring it"
            );
            Ok(None)
        }
    }
}

/// Persists both tokens, overwriting whatever was stored before.
pub fn save(
    store: &dyn CredentialStore,
    access_token: &AccessToken,
    refresh_token: &RefreshToken,
) -> eyre::Result<()> {
    store
        .set(ACCESS_TOKEN, access_token.secret())
        .context("store access token")?;
    store
        .set(REFRESH_TOKEN, refresh_token.secret())
        .context("store refresh token")?;
    Ok(())
}

/// Removes both tokens. Succeeds even if nothing was stored.
pub fn clear(store: &dyn CredentialStore) -> eyre::Result<()> {
    store.delete(ACCESS_TOKEN).context("delete access token")?;
    store.delete(REFRESH_TOKEN).context("delete refresh token")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_returns_both_tokens() {
        let store = MemoryStore::default();
        save(
            &store,
            &AccessToken::new("access".into()),
            &RefreshToken::new("refresh".into()),
        )
        .unwrap();

        let tokens = load(&store).unwrap().expect("tokens were stored");
        assert_eq!(tokens.access_token.secret(), "access");
        assert_eq!(tokens.refresh_token.secret(), "refresh");
    }

    #[test]
    fn empty_store_loads_nothing() {
        assert!(load(&MemoryStore::default()).unwrap().is_none());
    }

    #[test]
    fn half_a_token_pair_is_ignored() {
        let store = MemoryStore::default();
        store.set(ACCESS_TOKEN, "access").unwrap();
        assert!(load(&store).unwrap().is_none());

        let store = MemoryStore::default();
        store.set(REFRESH_TOKEN, "refresh").unwrap();
        assert!(load(&store).unwrap().is_none());
    }

    #[test]
    fn clear_removes_both_secrets() {
        let store = MemoryStore::default();
        store.set(ACCESS_TOKEN, "access").unwrap();
        store.set(REFRESH_TOKEN, "refresh").unwrap();

        clear(&store).unwrap();

        assert_eq!(store.get(ACCESS_TOKEN).unwrap(), None);
        assert_eq!(store.get(REFRESH_TOKEN).unwrap(), None);
    }

    #[test]
    fn clear_succeeds_when_nothing_is_stored() {
        clear(&MemoryStore::default()).unwrap();
    }
}
