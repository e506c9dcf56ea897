//! Credential store for the bearer token.
//!
//! One store instance is created per signed-in user and handed to the
//! components that need the token; nothing looks it up globally.
//!
//! # Storage
//!
//! Production: single OS keyring entry `hubnotify/credentials` containing JSON.
//! Test mode (`HUBNOTIFY_ENV=test`): file at `{config_dir}/credentials.json`.
//! An in-memory backend exists for embedding and tests.
//!
//! An absent entry means "signed out".
//!
//! # Graceful Degradation
//!
//! Keychain access may fail transiently (locked keychain, signature change
//! after a rebuild). Loads retry once and then degrade to "signed out"
//! instead of failing the caller.

use anyhow::Result;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Keyring service name.
const KEYRING_SERVICE: &str = "hubnotify";
/// Keyring entry name.
const KEYRING_CREDENTIALS: &str = "credentials";

/// Number of attempts for keyring access.
const KEYRING_RETRY_ATTEMPTS: u32 = 2;
/// Delay between retry attempts in milliseconds.
const KEYRING_RETRY_DELAY_MS: u64 = 500;

/// Resolves the current bearer token.
///
/// Called on every connection attempt, so implementations must not cache a
/// token that may have rotated.
pub trait CredentialProvider: Send + Sync {
    /// The current token, or `None` when signed out.
    fn token(&self) -> Option<String>;
}

impl<F> CredentialProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// Resolve the token on the blocking pool.
///
/// Keyring reads can stall (and retry with a sleep), so async callers go
/// through here instead of calling [`CredentialProvider::token`] on a
/// runtime worker. Empty tokens read as `None`.
pub async fn resolve_token(provider: &Arc<dyn CredentialProvider>) -> Option<String> {
    let provider = Arc::clone(provider);
    match tokio::task::spawn_blocking(move || provider.token()).await {
        Ok(token) => token.filter(|t| !t.is_empty()),
        Err(e) => {
            log::warn!("Token lookup did not complete: {}", e);
            None
        }
    }
}

/// Categorized keyring access errors for better user feedback.
#[derive(Debug)]
pub enum KeyringAccessError {
    /// Keyring is locked and requires user interaction to unlock.
    Locked(String),
    /// Entry does not exist (signed out).
    NotFound,
    /// Access denied, likely due to binary signature change.
    AccessDenied(String),
    /// Data exists but is corrupted or unparseable.
    Corrupted(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked(msg) => write!(f, "Keyring locked: {msg}"),
            Self::NotFound => write!(f, "Keyring entry not found"),
            Self::AccessDenied(msg) => write!(f, "Keyring access denied: {msg}"),
            Self::Corrupted(msg) => write!(f, "Keyring data corrupted: {msg}"),
            Self::Other(msg) => write!(f, "Keyring error: {msg}"),
        }
    }
}

impl std::error::Error for KeyringAccessError {}

fn categorize_keyring_error(err: &keyring::Error) -> KeyringAccessError {
    if matches!(err, keyring::Error::NoEntry) {
        return KeyringAccessError::NotFound;
    }

    let msg = format!("{err:?}");
    let msg_lower = msg.to_lowercase();

    if msg_lower.contains("user interaction") || msg_lower.contains("user canceled") {
        return KeyringAccessError::Locked(msg);
    }

    if msg_lower.contains("denied")
        || msg_lower.contains("codesign")
        || msg_lower.contains("not allowed")
    {
        return KeyringAccessError::AccessDenied(msg);
    }

    KeyringAccessError::Other(msg)
}

/// Persisted credential record.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Bearer token for the REST API and the hub.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Schema version for future migrations.
    #[serde(default = "default_version")]
    pub version: u8,
}

fn default_version() -> u8 {
    1
}

impl Credentials {
    /// Get the token if set.
    pub fn api_token(&self) -> Option<&str> {
        self.api_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Set the token.
    pub fn set_api_token(&mut self, token: String) {
        self.api_token = Some(token);
    }

    /// Clear the token.
    pub fn clear_api_token(&mut self) {
        self.api_token = None;
    }
}

#[derive(Debug, Clone)]
enum Backend {
    Keyring,
    File(PathBuf),
    Memory(Arc<Mutex<Credentials>>),
}

/// Durable home of the bearer token.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    backend: Backend,
    /// Token supplied out of band (`HUBNOTIFY_TOKEN`); wins over storage.
    override_token: Option<String>,
}

impl CredentialStore {
    /// Store for the current environment: the OS keyring, or a file in
    /// the config dir under `HUBNOTIFY_ENV=test`. Honors `HUBNOTIFY_TOKEN`.
    pub fn system() -> Result<Self> {
        let backend = if crate::env::should_skip_keyring() {
            Backend::File(crate::config::Config::config_dir()?.join("credentials.json"))
        } else {
            Backend::Keyring
        };
        Ok(Self {
            backend,
            override_token: std::env::var("HUBNOTIFY_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        })
    }

    /// File-backed store at `path`.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::File(path.into()),
            override_token: None,
        }
    }

    /// Process-local store; clones share the same slot.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::new(Mutex::new(Credentials::default()))),
            override_token: None,
        }
    }

    /// Returns `true` if the token comes from the environment.
    pub fn is_overridden(&self) -> bool {
        self.override_token.is_some()
    }

    /// Load the stored credentials.
    pub fn load(&self) -> Result<Credentials> {
        match &self.backend {
            Backend::Keyring => Ok(load_from_keyring_with_retry()),
            Backend::File(path) => load_from_file(path),
            Backend::Memory(slot) => Ok(slot
                .lock()
                .map_err(|e| anyhow::anyhow!("credential slot poisoned: {e}"))?
                .clone()),
        }
    }

    /// Persist credentials.
    pub fn save(&self, creds: &Credentials) -> Result<()> {
        match &self.backend {
            Backend::Keyring => {
                let entry = Entry::new(KEYRING_SERVICE, KEYRING_CREDENTIALS)
                    .map_err(|e| anyhow::anyhow!("Failed to create keyring entry: {e:?}"))?;
                let json = serde_json::to_string(creds)?;
                entry
                    .set_password(&json)
                    .map_err(|e| anyhow::anyhow!("Failed to store credentials in keyring: {e:?}"))?;
                log::info!("Saved credentials to OS keyring");
                Ok(())
            }
            Backend::File(path) => save_to_file(path, creds),
            Backend::Memory(slot) => {
                *slot
                    .lock()
                    .map_err(|e| anyhow::anyhow!("credential slot poisoned: {e}"))? = creds.clone();
                Ok(())
            }
        }
    }

    /// Store a freshly issued token.
    pub fn set_token(&self, token: &str) -> Result<()> {
        let mut creds = self.load().unwrap_or_default();
        creds.set_api_token(token.to_string());
        self.save(&creds)
    }

    /// Remove all stored credentials (sign-out).
    pub fn clear(&self) -> Result<()> {
        match &self.backend {
            Backend::Keyring => {
                let entry = Entry::new(KEYRING_SERVICE, KEYRING_CREDENTIALS)
                    .map_err(|e| anyhow::anyhow!("Failed to create keyring entry: {e:?}"))?;
                match entry.delete_credential() {
                    Ok(()) | Err(keyring::Error::NoEntry) => {}
                    Err(e) => anyhow::bail!("Failed to delete keyring entry: {e:?}"),
                }
                log::info!("Deleted credentials from OS keyring");
                Ok(())
            }
            Backend::File(path) => {
                if path.exists() {
                    fs::remove_file(path)?;
                }
                Ok(())
            }
            Backend::Memory(slot) => {
                *slot
                    .lock()
                    .map_err(|e| anyhow::anyhow!("credential slot poisoned: {e}"))? =
                    Credentials::default();
                Ok(())
            }
        }
    }

    /// Returns `true` if a token is available.
    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }
}

impl CredentialProvider for CredentialStore {
    fn token(&self) -> Option<String> {
        if let Some(token) = &self.override_token {
            return Some(token.clone());
        }
        match self.load() {
            Ok(creds) => creds.api_token().map(str::to_string),
            Err(e) => {
                log::warn!("Failed to read credentials: {}", e);
                None
            }
        }
    }
}

/// Load from keyring with retry logic for transient failures.
///
/// Never fails: an unreadable keyring reads as signed out.
fn load_from_keyring_with_retry() -> Credentials {
    let mut last_error: Option<KeyringAccessError> = None;

    for attempt in 0..KEYRING_RETRY_ATTEMPTS {
        if attempt > 0 {
            log::debug!(
                "Retrying keyring access (attempt {}/{})",
                attempt + 1,
                KEYRING_RETRY_ATTEMPTS
            );
            thread::sleep(Duration::from_millis(KEYRING_RETRY_DELAY_MS));
        }

        match try_load_from_keyring() {
            Ok(creds) => return creds,
            Err(KeyringAccessError::NotFound) => {
                log::debug!("No credentials found in keyring");
                return Credentials::default();
            }
            Err(err @ KeyringAccessError::Corrupted(_)) => {
                log::warn!("Keyring data corrupted, treating as signed out: {}", err);
                return Credentials::default();
            }
            Err(err) => {
                log::debug!("Keyring access attempt {} failed: {}", attempt + 1, err);
                last_error = Some(err);
            }
        }
    }

    if let Some(err) = &last_error {
        log::warn!(
            "Keyring access failed after {} attempts: {}. Sign in again if needed.",
            KEYRING_RETRY_ATTEMPTS,
            err
        );
    }

    Credentials::default()
}

fn try_load_from_keyring() -> std::result::Result<Credentials, KeyringAccessError> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_CREDENTIALS)
        .map_err(|e| KeyringAccessError::Other(format!("Failed to create entry: {e:?}")))?;

    match entry.get_password() {
        Ok(json) => {
            let creds: Credentials = serde_json::from_str(&json)
                .map_err(|e| KeyringAccessError::Corrupted(format!("JSON parse error: {e}")))?;
            log::debug!("Loaded credentials from keyring");
            Ok(creds)
        }
        Err(e) => Err(categorize_keyring_error(&e)),
    }
}

fn load_from_file(path: &PathBuf) -> Result<Credentials> {
    if path.exists() {
        let content = fs::read_to_string(path)?;
        let creds: Credentials = serde_json::from_str(&content)?;
        log::debug!("Loaded credentials from {}", path.display());
        Ok(creds)
    } else {
        log::debug!("No credentials file found");
        Ok(Credentials::default())
    }
}

fn save_to_file(path: &PathBuf, creds: &Credentials) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(creds)?)?;

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    log::debug!("Saved credentials to {}", path.display());
    Ok(())
}
