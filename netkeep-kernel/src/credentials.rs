//! Credential resolution for SSH sessions
//!
//! Resolves a host's `CredentialRef` into concrete authentication material:
//! - Private key files
//! - Passwords from environment variables
//! - Passwords from the OS keyring (never written to config)
//! - Default ~/.ssh keys as a last resort

use crate::error::Error;
use crate::models::{CredentialRef, Host};
use async_trait::async_trait;
use keyring::Entry;
use std::path::PathBuf;
use tracing::debug;

const KEYRING_SERVICE: &str = "netkeep";

/// Concrete authentication material for one SSH session
#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    PrivateKey(PathBuf),
    /// Try each key in order until one is accepted
    KeyCandidates(Vec<PathBuf>),
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SshAuth::Password(_) => f.write_str("Password(***)"),
            SshAuth::PrivateKey(p) => write!(f, "PrivateKey({})", p.display()),
            SshAuth::KeyCandidates(keys) => write!(f, "KeyCandidates({} keys)", keys.len()),
        }
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn resolve(&self, host: &Host) -> Result<SshAuth, Error>;
}

/// Resolves credentials from the host's own `CredentialRef`.
#[derive(Debug, Default, Clone)]
pub struct DefaultCredentialStore;

#[async_trait]
impl CredentialStore for DefaultCredentialStore {
    async fn resolve(&self, host: &Host) -> Result<SshAuth, Error> {
        debug!("Resolving credentials for host {}", host.id);
        match &host.credential {
            CredentialRef::KeyFile { path } => Ok(SshAuth::PrivateKey(expand_home(path))),
            CredentialRef::PasswordEnv { var } => std::env::var(var)
                .map(SshAuth::Password)
                .map_err(|_| Error::ServiceUnavailable(format!("environment variable {var} is not set"))),
            CredentialRef::Keyring { entry } => load_keyring_password(entry).map(SshAuth::Password),
            CredentialRef::DefaultKeys => default_key_paths().map(SshAuth::KeyCandidates),
        }
    }
}

fn load_keyring_password(entry: &str) -> Result<String, Error> {
    let entry = Entry::new(KEYRING_SERVICE, entry)
        .map_err(|e| Error::ServiceUnavailable(format!("keyring unavailable: {e}")))?;
    entry
        .get_password()
        .map_err(|e| Error::ServiceUnavailable(format!("keyring lookup failed: {e}")))
}

fn default_key_paths() -> Result<Vec<PathBuf>, Error> {
    let home = dirs::home_dir().ok_or_else(|| Error::Config("could not find home directory".into()))?;
    let keys: Vec<PathBuf> = ["id_ed25519", "id_ecdsa", "id_rsa"]
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .filter(|p| p.exists())
        .collect();
    if keys.is_empty() {
        return Err(Error::ServiceUnavailable("no default SSH keys in ~/.ssh".into()));
    }
    Ok(keys)
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
