//! Runtime settings surfaced by the panel.
//!
//! Plain settings live in the TOML config, secrets in the vault. Reads hand
//! out redacted placeholders; writes run through the same submission contract
//! as the form, so a placeholder echoed back by a client never overwrites the
//! real secret it stands for.

use crate::config::Config;
use crate::form::{
    self, compute_submission, redacted_display, FormState, DISCORD_TOKEN, JELLYFIN_API_KEY,
    JELLYFIN_URL,
};
use crate::security::Vault;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const DISCORD_TOKEN_VAULT_KEY: &str = "discord_token";
const JELLYFIN_API_KEY_VAULT_KEY: &str = "jellyfin_api_key";

#[derive(Clone)]
pub struct SettingsStore {
    vault: Arc<Mutex<Vault>>,
}

impl SettingsStore {
    pub fn new(vault: Arc<Mutex<Vault>>) -> Self {
        Self { vault }
    }

    /// The settings map served to the panel: secrets replaced by their
    /// redacted display, never the stored value.
    pub fn snapshot(&self) -> Result<HashMap<String, String>, Box<dyn std::error::Error>> {
        let config = Config::load()?;
        let vault = self.vault.lock().unwrap();

        let mut out = HashMap::new();
        out.insert(
            DISCORD_TOKEN.to_string(),
            secret_display(&vault, config.discord.token_key.as_deref()),
        );
        out.insert(JELLYFIN_URL.to_string(), config.jellyfin.url.clone());
        out.insert(
            JELLYFIN_API_KEY.to_string(),
            secret_display(&vault, config.jellyfin.api_key_key.as_deref()),
        );
        Ok(out)
    }

    /// Applies a form submission and returns the keys that were written, in
    /// tracked-field order. Empty secret values erase the stored secret;
    /// values equal to the current placeholder are dropped by
    /// [`plan_update`] and reported as unchanged.
    ///
    /// The whole submission is staged and validated before anything is
    /// persisted: a submission that fails validation must not leave secrets
    /// in the vault that the config never references.
    pub fn apply(
        &self,
        incoming: &[(String, String)],
    ) -> Result<Vec<String>, Box<dyn std::error::Error>> {
        let current = self.snapshot()?;
        let plan = plan_update(&current, incoming);
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        let mut config = Config::load()?;
        let (updated, writes) = stage_plan(&mut config, &plan);
        config.validate()?;

        {
            let mut vault = self.vault.lock().unwrap();
            for write in writes {
                match write {
                    SecretWrite::Store { vault_key, value } => vault.store(vault_key, &value)?,
                    SecretWrite::Remove { vault_key } => vault.remove(vault_key)?,
                }
            }
        }

        if !updated.is_empty() {
            config.save()?;
            tracing::info!(keys = %updated.join(", "), "updated config");
        }
        Ok(updated)
    }

    /// Currently stored bot token, if any.
    pub fn discord_token(&self) -> Option<String> {
        let config = Config::load().ok()?;
        let key = config.discord.token_key?;
        let vault = self.vault.lock().unwrap();
        vault.retrieve(&key).ok()
    }

    /// Jellyfin base URL and stored API key.
    pub fn jellyfin_credentials(&self) -> (String, Option<String>) {
        let Ok(config) = Config::load() else {
            return (String::new(), None);
        };
        let api_key = config.jellyfin.api_key_key.and_then(|key| {
            let vault = self.vault.lock().unwrap();
            vault.retrieve(&key).ok()
        });
        (config.jellyfin.url, api_key)
    }
}

fn secret_display(vault: &Vault, vault_key: Option<&str>) -> String {
    match vault_key {
        Some(key) => match vault.retrieve(key) {
            Ok(secret) => redacted_display(&secret),
            Err(err) => {
                tracing::warn!(key, error = %err, "stored secret unreadable");
                String::new()
            }
        },
        None => String::new(),
    }
}

/// Vault mutation held back until the staged config validates.
#[derive(Debug, PartialEq, Eq)]
enum SecretWrite {
    Store { vault_key: &'static str, value: String },
    Remove { vault_key: &'static str },
}

fn secret_write(vault_key: &'static str, value: &str) -> SecretWrite {
    if value.is_empty() {
        SecretWrite::Remove { vault_key }
    } else {
        SecretWrite::Store {
            vault_key,
            value: value.to_string(),
        }
    }
}

fn staged_key(vault_key: &str, value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(vault_key.to_string())
    }
}

/// Lays the planned update onto `config` without persisting anything.
/// Returns the updated keys (tracked-field order) and the vault writes to
/// perform once the config validates.
fn stage_plan(config: &mut Config, plan: &[(String, String)]) -> (Vec<String>, Vec<SecretWrite>) {
    let mut updated = Vec::with_capacity(plan.len());
    let mut writes = Vec::new();

    for (key, value) in plan {
        match key.as_str() {
            JELLYFIN_URL => config.jellyfin.url = value.trim().to_string(),
            DISCORD_TOKEN => {
                config.discord.token_key = staged_key(DISCORD_TOKEN_VAULT_KEY, value);
                writes.push(secret_write(DISCORD_TOKEN_VAULT_KEY, value));
            }
            JELLYFIN_API_KEY => {
                config.jellyfin.api_key_key = staged_key(JELLYFIN_API_KEY_VAULT_KEY, value);
                writes.push(secret_write(JELLYFIN_API_KEY_VAULT_KEY, value));
            }
            _ => continue,
        }
        updated.push(key.clone());
    }

    (updated, writes)
}

/// Decides which of the submitted fields to actually write.
///
/// The submitted values are laid over the current redacted snapshot and run
/// through the form submission contract, then filtered back to the keys the
/// client actually sent: absent fields are never written, and a secret sent
/// back as its own untouched placeholder is dropped.
pub fn plan_update(
    current: &HashMap<String, String>,
    incoming: &[(String, String)],
) -> Vec<(String, String)> {
    let mut state = FormState::load(current);
    for (key, value) in incoming {
        if form::TRACKED_FIELDS.iter().any(|f| f.key == key.as_str()) {
            state.set_value(key, value.clone());
        }
    }

    compute_submission(&state)
        .into_iter()
        .filter(|(key, _)| incoming.iter().any(|(k, _)| k == key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current(token: &str, url: &str, api_key: &str) -> HashMap<String, String> {
        HashMap::from([
            (DISCORD_TOKEN.to_string(), token.to_string()),
            (JELLYFIN_URL.to_string(), url.to_string()),
            (JELLYFIN_API_KEY.to_string(), api_key.to_string()),
        ])
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn echoed_placeholder_is_not_written() {
        let plan = plan_update(
            &current("ab…****", "http://x", ""),
            &pairs(&[(DISCORD_TOKEN, "ab…****"), (JELLYFIN_URL, "http://x")]),
        );
        assert_eq!(plan, pairs(&[(JELLYFIN_URL, "http://x")]));
    }

    #[test]
    fn new_secret_value_is_written() {
        let plan = plan_update(
            &current("ab…****", "", ""),
            &pairs(&[(DISCORD_TOKEN, "fresh-token")]),
        );
        assert_eq!(plan, pairs(&[(DISCORD_TOKEN, "fresh-token")]));
    }

    #[test]
    fn empty_secret_value_is_a_clear() {
        let plan = plan_update(
            &current("ab…****", "", ""),
            &pairs(&[(DISCORD_TOKEN, "")]),
        );
        assert_eq!(plan, pairs(&[(DISCORD_TOKEN, "")]));
    }

    #[test]
    fn absent_fields_are_never_written() {
        let plan = plan_update(
            &current("ab…****", "http://x", "cd…****"),
            &pairs(&[(JELLYFIN_URL, "http://y")]),
        );
        assert_eq!(plan, pairs(&[(JELLYFIN_URL, "http://y")]));
    }

    #[test]
    fn untracked_keys_are_ignored() {
        let plan = plan_update(
            &current("", "", ""),
            &pairs(&[("EXTRA", "value"), (JELLYFIN_URL, "http://x")]),
        );
        assert_eq!(plan, pairs(&[(JELLYFIN_URL, "http://x")]));
    }

    #[test]
    fn staging_maps_clears_to_removals() {
        let mut config = Config::default();
        let (updated, writes) = stage_plan(
            &mut config,
            &pairs(&[(DISCORD_TOKEN, ""), (JELLYFIN_API_KEY, "new-key")]),
        );

        assert_eq!(updated, vec![DISCORD_TOKEN, JELLYFIN_API_KEY]);
        assert_eq!(
            writes,
            vec![
                SecretWrite::Remove {
                    vault_key: DISCORD_TOKEN_VAULT_KEY
                },
                SecretWrite::Store {
                    vault_key: JELLYFIN_API_KEY_VAULT_KEY,
                    value: "new-key".to_string()
                },
            ]
        );
        assert_eq!(config.discord.token_key, None);
        assert_eq!(
            config.jellyfin.api_key_key,
            Some(JELLYFIN_API_KEY_VAULT_KEY.to_string())
        );
    }

    #[test]
    fn staged_invalid_url_fails_validation() {
        let mut config = Config::default();
        let (_, writes) = stage_plan(
            &mut config,
            &pairs(&[(DISCORD_TOKEN, "real-token"), (JELLYFIN_URL, "not-a-url")]),
        );

        assert!(!writes.is_empty());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejected_submission_leaves_vault_untouched() {
        let dir = std::env::temp_dir();
        let config_path = dir.join(format!("finbot-settings-config-{}.toml", std::process::id()));
        let vault_path = dir.join(format!("finbot-settings-vault-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&config_path);
        let _ = std::fs::remove_file(&vault_path);
        std::env::set_var("FINBOT_CONFIG_PATH", &config_path);

        let vault = Arc::new(Mutex::new(
            Vault::new(vault_path.to_str()).expect("temp vault"),
        ));
        let store = SettingsStore::new(vault.clone());

        let result = store.apply(&pairs(&[
            (DISCORD_TOKEN, "real-token"),
            (JELLYFIN_URL, "not-a-url"),
        ]));

        assert!(result.is_err());
        assert!(!vault.lock().unwrap().contains(DISCORD_TOKEN_VAULT_KEY));
        assert!(store.discord_token().is_none());
        assert!(!config_path.exists());

        std::env::remove_var("FINBOT_CONFIG_PATH");
        let _ = std::fs::remove_file(&vault_path);
    }
}
