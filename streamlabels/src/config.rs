use crate::oauth::{AuthStrategy, DEFAULT_REDIRECT_PORT};
use eyre::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Prefix of the environment variables overriding config file keys.
const ENV_PREFIX: &str = "STREAMLABELS_";

// ---------------------------------------------------------------------------
// TOML-deserializable config (intermediate representation)
// ---------------------------------------------------------------------------

/// Raw config as parsed from the TOML file.
/// All fields are optional so that missing keys fall through to defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    client_id: Option<String>,
    client_secret: Option<String>,
    login: Option<String>,
    auth_flow: Option<String>,
    redirect_port: Option<u16>,
    credential_store: Option<String>,
}

// ---------------------------------------------------------------------------
// Effective (merged) config
// ---------------------------------------------------------------------------

/// Where OAuth tokens are kept between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStoreKind {
    /// The operating system keychain.
    Keyring,
    /// Nowhere; every run starts a new authorization.
    Memory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Login name of the broadcaster, unless given on the command line.
    pub login: Option<String>,
    pub auth: AuthStrategy,
    pub credential_store: CredentialStoreKind,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Directories searched for [`CONFIG_FILE_NAME`], in order of preference.
pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("/etc/streamlabels")];
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".config").join("streamlabels"));
    }
    dirs.push(PathBuf::from("."));
    dirs
}

/// Returns the first existing config file in `dirs`.
pub fn find_config_file(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .find(|path| path.is_file())
}

fn read_file_config(path: &Path) -> eyre::Result<FileConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("read config file {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse config file {}", path.display()))
}

/// Loads the effective configuration.
///
/// `explicit` must exist if given; otherwise the [`search_dirs`] are tried and a missing file is
/// fine as long as the environment supplies the required keys.
pub fn load(explicit: Option<&Path>) -> eyre::Result<Config> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(&search_dirs()),
    };
    let file = match &path {
        Some(path) => {
            let file = read_file_config(path)?;
            tracing::info!(path = %path.display(), "config file was read successfully");
            file
        }
        None => {
            tracing::debug!("no config file found, relying on environment");
            FileConfig::default()
        }
    };
    resolve(file, |key| std::env::var(key).ok())
}

/// Merges file values with environment overrides looked up through `env`.
fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> eyre::Result<Config> {
    let lookup = |key: &str, from_file: Option<String>| {
        env(&format!("{ENV_PREFIX}{}", key.to_uppercase()))
            .or(from_file)
            .filter(|v| !v.is_empty())
    };

    let client_id = lookup("client_id", file.client_id)
        .ok_or_else(|| eyre::eyre!("no client_id configured"))?;
    let client_secret = lookup("client_secret", file.client_secret);
    let login = lookup("login", file.login);

    let redirect_port = match lookup("redirect_port", None) {
        Some(port) => port
            .parse()
            .with_context(|| format!("invalid redirect_port {port:?}"))?,
        None => file.redirect_port.unwrap_or(DEFAULT_REDIRECT_PORT),
    };

    let auth = match lookup("auth_flow", file.auth_flow).as_deref() {
        Some("device") => AuthStrategy::DeviceCode,
        Some("authorization-code") => AuthStrategy::AuthorizationCode {
            port: redirect_port,
        },
        Some(other) => eyre::bail!(
            "unknown auth_flow {other:?}, expected \"device\" or \"authorization-code\""
        ),
        None if client_secret.is_some() => AuthStrategy::AuthorizationCode {
            port: redirect_port,
        },
        None => AuthStrategy::DeviceCode,
    };
    if matches!(auth, AuthStrategy::AuthorizationCode { .. }) && client_secret.is_none() {
        eyre::bail!("auth_flow \"authorization-code\" needs a client_secret");
    }

    let credential_store = match lookup("credential_store", file.credential_store).as_deref() {
        None | Some("keyring") => CredentialStoreKind::Keyring,
        Some("memory") => CredentialStoreKind::Memory,
        Some(other) => eyre::bail!(
            "unknown credential_store {other:?}, expected \"keyring\" or \"memory\""
        ),
    };

    Ok(Config {
        client_id,
        client_secret,
        login,
        auth,
        credential_store,
    })
}
