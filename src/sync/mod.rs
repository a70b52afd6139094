//! Periodic Jellyfin catalog sync and playback statistics.
//!
//! A background task pulls users, libraries, and active sessions from the
//! configured Jellyfin server, folds them into a file-backed catalog, and
//! refreshes per-user play counts. The panel reads the aggregates through
//! `/api/stats`.

use crate::jellyfin::JellyfinClient;
use crate::settings::SettingsStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const CATALOG_FILE: &str = "catalog.json";

/// Two sessions for the same user and item inside this window count as one
/// play, not two.
const PLAY_DEDUP_WINDOW_SECS: u64 = 1800;

pub type SharedCatalog = Arc<Mutex<Catalog>>;

/// Everything the sync task has learned from Jellyfin so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub users: Vec<UserRecord>,
    pub libraries: Vec<LibraryRecord>,
    pub playback: Vec<PlaybackEvent>,
    pub last_sync_unix: Option<u64>,
    pub last_report: Option<SyncReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub jellyfin_id: String,
    pub name: String,
    pub is_admin: bool,
    /// Set when the user disappears from Jellyfin; records are kept so play
    /// history stays attributable.
    pub archived: bool,
    pub total_plays: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryRecord {
    pub jellyfin_id: String,
    pub name: String,
    pub collection_type: Option<String>,
    pub archived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub user_id: String,
    pub item_id: String,
    pub item_name: String,
    pub device_name: Option<String>,
    pub client: Option<String>,
    pub activity_at: u64,
}

/// Outcome of one sync pass, kept alongside the data it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub success: bool,
    pub users_synced: usize,
    pub libraries_synced: usize,
    pub events_recorded: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopEntry {
    pub name: String,
    pub plays: u64,
}

impl Catalog {
    /// Loads the persisted catalog; a missing or unreadable file starts empty.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn persist(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Upserts the fetched user list by Jellyfin id and archives users no
    /// longer present. Returns how many users the server reported.
    pub fn merge_users(&mut self, fetched: &Value) -> usize {
        let entries = array_of(fetched);
        let mut seen = Vec::with_capacity(entries.len());

        for entry in &entries {
            let Some(id) = str_field(entry, "Id") else {
                continue;
            };
            let name = str_field(entry, "Name").unwrap_or_default();
            let is_admin = entry["Policy"]["IsAdministrator"].as_bool().unwrap_or(false);
            seen.push(id.to_string());

            match self.users.iter_mut().find(|u| u.jellyfin_id == id) {
                Some(user) => {
                    user.name = name.to_string();
                    user.is_admin = is_admin;
                    user.archived = false;
                }
                None => self.users.push(UserRecord {
                    jellyfin_id: id.to_string(),
                    name: name.to_string(),
                    is_admin,
                    archived: false,
                    total_plays: 0,
                }),
            }
        }

        for user in &mut self.users {
            if !seen.contains(&user.jellyfin_id) {
                user.archived = true;
            }
        }
        seen.len()
    }

    /// Same upsert-and-archive pass for libraries. Accepts both a bare array
    /// and Jellyfin's `{"Items": [...]}` envelope.
    pub fn merge_libraries(&mut self, fetched: &Value) -> usize {
        let entries = array_of(fetched);
        let mut seen = Vec::with_capacity(entries.len());

        for entry in &entries {
            let Some(id) = str_field(entry, "Id") else {
                continue;
            };
            let name = str_field(entry, "Name").unwrap_or_default();
            let collection_type = str_field(entry, "CollectionType").map(str::to_string);
            seen.push(id.to_string());

            match self.libraries.iter_mut().find(|l| l.jellyfin_id == id) {
                Some(library) => {
                    library.name = name.to_string();
                    library.collection_type = collection_type;
                    library.archived = false;
                }
                None => self.libraries.push(LibraryRecord {
                    jellyfin_id: id.to_string(),
                    name: name.to_string(),
                    collection_type,
                    archived: false,
                }),
            }
        }

        for library in &mut self.libraries {
            if !seen.contains(&library.jellyfin_id) {
                library.archived = true;
            }
        }
        seen.len()
    }

    /// Records now-playing activity from a `/Sessions` response. Sessions
    /// without a `NowPlayingItem` are idle and skipped; a user still playing
    /// the same item as a recent event is not double-counted.
    pub fn record_playback(&mut self, sessions: &Value, now: u64) -> usize {
        let mut recorded = 0;

        for session in &array_of(sessions) {
            let item = &session["NowPlayingItem"];
            let (Some(user_id), Some(item_id)) = (
                str_field(session, "UserId"),
                str_field(item, "Id"),
            ) else {
                continue;
            };

            let duplicate = self.playback.iter().rev().any(|event| {
                event.user_id == user_id
                    && event.item_id == item_id
                    && now.saturating_sub(event.activity_at) < PLAY_DEDUP_WINDOW_SECS
            });
            if duplicate {
                continue;
            }

            self.playback.push(PlaybackEvent {
                user_id: user_id.to_string(),
                item_id: item_id.to_string(),
                item_name: str_field(item, "Name").unwrap_or_default().to_string(),
                device_name: str_field(session, "DeviceName").map(str::to_string),
                client: str_field(session, "Client").map(str::to_string),
                activity_at: now,
            });
            recorded += 1;
        }
        recorded
    }

    /// Recomputes each user's play count from the recorded events.
    pub fn refresh_play_counts(&mut self) {
        for user in &mut self.users {
            user.total_plays = self
                .playback
                .iter()
                .filter(|event| event.user_id == user.jellyfin_id)
                .count() as u64;
        }
    }

    /// Most-played items, highest first. Ties keep first-seen order.
    pub fn top_items(&self, limit: usize) -> Vec<TopEntry> {
        let mut counts: Vec<TopEntry> = Vec::new();
        for event in &self.playback {
            match counts.iter_mut().find(|c| c.name == event.item_name) {
                Some(entry) => entry.plays += 1,
                None => counts.push(TopEntry {
                    name: event.item_name.clone(),
                    plays: 1,
                }),
            }
        }
        counts.sort_by(|a, b| b.plays.cmp(&a.plays));
        counts.truncate(limit);
        counts
    }

    /// Most active users, highest first; archived users are excluded.
    pub fn top_users(&self, limit: usize) -> Vec<TopEntry> {
        let mut entries: Vec<TopEntry> = self
            .users
            .iter()
            .filter(|u| !u.archived && u.total_plays > 0)
            .map(|u| TopEntry {
                name: u.name.clone(),
                plays: u.total_plays,
            })
            .collect();
        entries.sort_by(|a, b| b.plays.cmp(&a.plays));
        entries.truncate(limit);
        entries
    }
}

fn array_of(value: &Value) -> Vec<Value> {
    if let Some(items) = value.as_array() {
        return items.clone();
    }
    value["Items"].as_array().cloned().unwrap_or_default()
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value[key].as_str().filter(|s| !s.is_empty())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub fn default_data_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| Path::new(&h).join(".config")))
        .unwrap_or_else(|_| PathBuf::from("."));
    base.join("finbot").join(CATALOG_FILE)
}

/// Spawns the periodic sync loop. The first pass runs immediately so a fresh
/// install has data as soon as credentials are in place.
pub fn spawn_scheduler(
    settings: SettingsStore,
    catalog: SharedCatalog,
    data_path: PathBuf,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            run_sync_pass(&settings, &catalog, &data_path).await;
        }
    });
}

async fn run_sync_pass(settings: &SettingsStore, catalog: &SharedCatalog, data_path: &Path) {
    let settings_read = settings.clone();
    let creds = tokio::task::spawn_blocking(move || settings_read.jellyfin_credentials())
        .await
        .unwrap_or_default();
    let (url, api_key) = creds;
    let Some(api_key) = api_key else {
        tracing::debug!("catalog sync skipped: no Jellyfin credentials stored");
        return;
    };

    let client = match JellyfinClient::new(url, api_key) {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, "catalog sync skipped: unusable Jellyfin settings");
            return;
        }
    };

    let started = Instant::now();
    let users = client.users().await;
    let libraries = client.libraries().await;
    let sessions = client.sessions().await;
    let success = users.ok && libraries.ok && sessions.ok;

    let report = {
        let mut catalog = catalog.lock().unwrap();
        let users_synced = users
            .data
            .as_ref()
            .map(|data| catalog.merge_users(data))
            .unwrap_or(0);
        let libraries_synced = libraries
            .data
            .as_ref()
            .map(|data| catalog.merge_libraries(data))
            .unwrap_or(0);
        let events_recorded = sessions
            .data
            .as_ref()
            .map(|data| catalog.record_playback(data, unix_now()))
            .unwrap_or(0);
        catalog.refresh_play_counts();

        let report = SyncReport {
            success,
            users_synced,
            libraries_synced,
            events_recorded,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        catalog.last_sync_unix = Some(unix_now());
        catalog.last_report = Some(report.clone());

        if let Err(err) = catalog.persist(data_path) {
            tracing::warn!(error = %err, "failed to persist catalog");
        }
        report
    };

    if report.success {
        tracing::info!(
            users = report.users_synced,
            libraries = report.libraries_synced,
            events = report.events_recorded,
            duration_ms = report.duration_ms,
            "catalog sync complete"
        );
    } else {
        let reason = [&users, &libraries, &sessions]
            .iter()
            .find_map(|res| res.message.clone())
            .unwrap_or_else(|| "unknown".to_string());
        tracing::warn!(reason = %reason, "catalog sync failed");
    }
}
