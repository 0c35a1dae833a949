//! Device identity: a stable id plus an optional server-issued token.
//!
//! Both live in a small persisted key-value store so a device keeps its
//! identity across sessions and can reconnect without re-presenting an
//! explicit token.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use {anyhow::Result, tracing::warn, uuid::Uuid};

const DEVICE_ID_KEY: &str = "device.id";
const DEVICE_TOKEN_KEY: &str = "device.token";

/// Minimal persisted key-value store the identity provider consumes.
///
/// Embedders with their own persistence implement this; the crate ships a
/// JSON-file store and an in-memory one for tests.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

// ── File store ───────────────────────────────────────────────────────────────

/// File-backed store: a JSON map at `~/.config/portal/identity.json`.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    path: PathBuf,
}

impl FileKvStore {
    pub fn new() -> Self {
        Self {
            path: default_config_dir().join("identity.json"),
        }
    }

    /// Create a store at a specific path (useful for testing).
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_map(&self) -> HashMap<String, String> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }
}

impl Default for FileKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.read_map().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut map = self.read_map();
        map.insert(key.to_string(), value.to_string());
        std::fs::write(&self.path, serde_json::to_string_pretty(&map)?)?;

        // Tokens live here; keep the file private to the user.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

fn default_config_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".config").join("portal"))
        .unwrap_or_else(|| PathBuf::from(".portal"))
}

// ── Memory store ─────────────────────────────────────────────────────────────

/// In-memory store for tests and throwaway clients.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.map.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map.lock().unwrap().insert(key.into(), value.into());
        Ok(())
    }
}

// ── Provider ─────────────────────────────────────────────────────────────────

/// Stable client identity presented during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_token: Option<String>,
}

/// Derives and persists the device identity.
pub struct IdentityProvider {
    store: Arc<dyn KvStore>,
}

impl IdentityProvider {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Load the persisted identity, deriving and persisting a fresh device
    /// id on first use. A store that cannot persist still yields a usable
    /// (session-scoped) identity.
    pub fn load_or_create(&self) -> DeviceIdentity {
        let device_id = match self.store.get(DEVICE_ID_KEY) {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                if let Err(error) = self.store.set(DEVICE_ID_KEY, &id) {
                    warn!(%error, "failed to persist device id");
                }
                id
            },
        };
        DeviceIdentity {
            device_id,
            device_token: self.store.get(DEVICE_TOKEN_KEY),
        }
    }

    /// Persist a server-issued device token for token-less reconnection.
    pub fn save_token(&self, token: &str) {
        if let Err(error) = self.store.set(DEVICE_TOKEN_KEY, token) {
            warn!(%error, "failed to persist device token");
        }
    }
}
