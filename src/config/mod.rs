use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "FINBOT_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub discord: DiscordConfig,
    pub jellyfin: JellyfinConfig,
    pub sync: SyncConfig,
    pub vault: VaultConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2929,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Vault key holding the bot token; `None` means no token is configured.
    pub token_key: Option<String>,
    /// How often the connectivity check re-validates an unchanged token.
    pub status_refresh_secs: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token_key: None,
            status_refresh_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct JellyfinConfig {
    /// Base URL of the Jellyfin server, e.g. `http://127.0.0.1:8096`.
    pub url: String,
    /// Vault key holding the Jellyfin API key; `None` means no key stored.
    pub api_key_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic Jellyfin catalog sync on/off.
    pub enabled: bool,
    pub interval_secs: u64,
    /// Where the synced catalog is persisted; defaults next to the vault.
    pub data_path: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 1800,
            data_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct VaultConfig {
    pub path: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            if let Ok(file_config) = toml::from_str::<Config>(&raw) {
                config = file_config;
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var(format!("{}SERVER_HOST", ENV_PREFIX)) {
            self.server.host = val;
        }
        if let Ok(val) = env::var(format!("{}SERVER_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = env::var(format!("{}JELLYFIN_URL", ENV_PREFIX)) {
            self.jellyfin.url = val;
        }
        if let Ok(val) = env::var(format!("{}STATUS_REFRESH_SECS", ENV_PREFIX)) {
            if let Ok(secs) = val.parse() {
                self.discord.status_refresh_secs = secs;
            }
        }
        if let Ok(val) = env::var(format!("{}SYNC_INTERVAL_SECS", ENV_PREFIX)) {
            if let Ok(secs) = val.parse() {
                self.sync.interval_secs = secs;
            }
        }
        if let Ok(val) = env::var(format!("{}SYNC_ENABLED", ENV_PREFIX)) {
            if let Ok(enabled) = val.parse() {
                self.sync.enabled = enabled;
            }
        }
        if let Ok(val) = env::var(format!("{}VAULT_PATH", ENV_PREFIX)) {
            self.vault.path = Some(val);
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.server.port == 0 {
            return Err("server.port must be non-zero".into());
        }
        if self.server.host.trim().is_empty() {
            return Err("server.host must be set".into());
        }
        if self.discord.status_refresh_secs < 5 {
            return Err("discord.status_refresh_secs must be >= 5".into());
        }
        if self.sync.interval_secs < 60 {
            return Err("sync.interval_secs must be >= 60".into());
        }
        let url = self.jellyfin.url.trim();
        if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
            return Err("jellyfin.url must start with http:// or https://".into());
        }
        Ok(())
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = active_config_path();
        self.validate()?;
        let data = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    let base = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|h| Path::new(&h).join(".config")))
        .unwrap_or_else(|_| PathBuf::from("."));
    base.join("finbot").join(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = Config::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        parsed.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_port() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_host() {
        let mut cfg = Config::default();
        cfg.server.host = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_schemeless_jellyfin_url() {
        let mut cfg = Config::default();
        cfg.jellyfin.url = "127.0.0.1:8096".to_string();
        assert!(cfg.validate().is_err());

        cfg.jellyfin.url = "http://127.0.0.1:8096".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_too_low_status_refresh() {
        let mut cfg = Config::default();
        cfg.discord.status_refresh_secs = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_too_low_sync_interval() {
        let mut cfg = Config::default();
        cfg.sync.interval_secs = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_jellyfin_url_is_allowed() {
        let cfg = Config::default();
        assert!(cfg.jellyfin.url.is_empty());
        assert!(cfg.validate().is_ok());
    }
}
