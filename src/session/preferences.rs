use anyhow::{bail, Context, Result};
use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use super::AuthState;

const KEY_LOGGED_IN: &str = "loggedIn";
const KEY_SESSION_ID: &str = "sid";
const KEY_SERVER: &str = "server";
const KEY_EMAIL: &str = "email";
const LOGGED_IN: &str = "true";
const LOGGED_OUT: &str = "false";

type Preferences = BTreeMap<String, String>;

/// Flat string key-value store persisted as a JSON object.
///
/// Holds the session marker, the session token and the login identity.
/// Every write is flushed to disk before returning.
pub struct PreferencesStore {
    path: Option<PathBuf>,
    data: RwLock<Preferences>,
}

impl PreferencesStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read preferences from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring unreadable preferences in {}: {err}",
                    path.display()
                );
                Preferences::default()
            })
        } else {
            Preferences::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(Preferences::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut guard = self.write();
        guard.insert(key.to_string(), value.to_string());
        self.persist(&guard)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let mut guard = self.write();
        guard.remove(key);
        self.persist(&guard)
    }

    /// Stores a fresh session after a successful credential exchange.
    pub fn login(&self, server: &str, email: &str, sid: &str) -> Result<()> {
        validation::validate_server(server)?;
        validation::validate_email(email)?;
        if sid.trim().is_empty() {
            bail!("Session id cannot be empty");
        }

        let mut guard = self.write();
        guard.insert(KEY_SERVER.into(), server.trim().into());
        guard.insert(KEY_EMAIL.into(), email.trim().into());
        guard.insert(KEY_SESSION_ID.into(), sid.into());
        guard.insert(KEY_LOGGED_IN.into(), LOGGED_IN.into());
        self.persist(&guard)
    }

    pub fn email(&self) -> Option<String> {
        self.non_empty(KEY_EMAIL)
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|value| !value.trim().is_empty())
    }

    fn read(&self) -> RwLockReadGuard<'_, Preferences> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Preferences> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn persist(&self, data: &Preferences) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write preferences to {}", path.display()))
    }
}

impl AuthState for PreferencesStore {
    fn is_logged_in(&self) -> bool {
        self.get(KEY_LOGGED_IN).as_deref() == Some(LOGGED_IN)
    }

    fn session_token(&self) -> Option<String> {
        self.non_empty(KEY_SESSION_ID)
    }

    fn server_url(&self) -> Option<String> {
        self.non_empty(KEY_SERVER)
    }

    fn invalidate_session(&self) -> Result<()> {
        let mut guard = self.write();
        guard.insert(KEY_LOGGED_IN.into(), LOGGED_OUT.into());
        guard.insert(KEY_SESSION_ID.into(), String::new());
        self.persist(&guard)
    }
}

/// Input checks applied before a session is stored.
pub mod validation {
    use anyhow::{bail, Result};

    pub fn validate_server(server: &str) -> Result<()> {
        let server = server.trim();
        if !(server.starts_with("https://") || server.starts_with("http://localhost")) {
            bail!("Server URL must start with \"https://\"");
        }
        Ok(())
    }

    pub fn validate_email(email: &str) -> Result<()> {
        let email = email.trim();
        let Some((local, domain)) = email.split_once('@') else {
            bail!("Invalid email");
        };
        let domain_ok = domain
            .split_once('.')
            .map(|(host, tld)| !host.is_empty() && !tld.is_empty())
            .unwrap_or(false);
        if local.is_empty() || !domain_ok || email.chars().any(char::is_whitespace) {
            bail!("Invalid email");
        }
        Ok(())
    }
}
