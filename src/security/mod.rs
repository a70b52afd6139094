use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

/// File-backed store for the bot token and Jellyfin API key.
///
/// Values are base64-encoded, not encrypted; the file is written with owner-only
/// permissions on unix. Good enough for a localhost-only daemon holding its own
/// credentials.
#[derive(Debug)]
pub struct Vault {
    path: PathBuf,
    store: VaultStore,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VaultStore {
    entries: HashMap<String, String>,
}

impl Vault {
    pub fn new(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = match path {
            Some(p) => PathBuf::from(p),
            None => default_vault_path(),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let store = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            VaultStore::default()
        };

        Ok(Self { path, store })
    }

    pub fn store(&mut self, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
        let encoded = general_purpose::STANDARD.encode(value.as_bytes());
        self.store.entries.insert(key.to_string(), encoded);
        self.persist()
    }

    pub fn retrieve(&self, key: &str) -> Result<String, Box<dyn std::error::Error>> {
        let encoded = self.store.entries.get(key).ok_or("missing vault key")?;
        let decoded = general_purpose::STANDARD.decode(encoded)?;
        Ok(String::from_utf8(decoded)?)
    }

    /// Removes a stored secret; removing an absent key is not an error.
    pub fn remove(&mut self, key: &str) -> Result<(), Box<dyn std::error::Error>> {
        if self.store.entries.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.entries.contains_key(key)
    }

    pub fn list_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.store.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn persist(&self) -> Result<(), Box<dyn std::error::Error>> {
        let data = serde_json::to_string_pretty(&self.store)?;
        fs::write(&self.path, data)?;
        restrict_permissions(&self.path);
        Ok(())
    }
}

fn default_vault_path() -> PathBuf {
    let base = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|h| Path::new(&h).join(".config")))
        .unwrap_or_else(|_| PathBuf::from("."));
    base.join("finbot").join("vault.json")
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    // Best effort; a failure here is not worth refusing to persist over.
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
