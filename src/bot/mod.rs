//! Discord integration: a small REST client and the background task that
//! tracks whether the configured bot token is usable.

use crate::settings::SettingsStore;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client, Method, Request, StatusCode, Url,
};
use serde::Deserialize;
use std::{fmt, time::Duration};
use tokio::sync::watch;
use tokio::time::Instant;

const API_BASE: &str = "https://discord.com/api/v10/";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const TOKEN_POLL_INTERVAL_SECS: u64 = 2;

#[derive(Clone, Debug)]
pub struct DiscordClient {
    http: Client,
    base_url: Url,
    token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>) -> Result<Self, BotError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(BotError::Config("bot token must not be empty"));
        }
        let base_url = Url::parse(API_BASE).map_err(|err| BotError::Url(err.to_string()))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(BotError::Http)?;
        Ok(Self {
            http,
            base_url,
            token: token.trim().to_string(),
        })
    }

    /// Validates the token by resolving the bot's own user.
    pub async fn current_user(&self) -> Result<CurrentUser, BotError> {
        let req = self.build_current_user_request()?;
        let resp = self.http.execute(req).await.map_err(BotError::Http)?;
        let status = resp.status();
        let body = resp.text().await.map_err(BotError::Http)?;
        parse_current_user_response(status, &body)
    }

    /// Sends `content` to a channel. `channel_id` comes straight from the
    /// panel form and must parse as an integer id.
    pub async fn send_message(&self, channel_id: &str, content: &str) -> Result<(), BotError> {
        let req = self.build_create_message_request(channel_id, content)?;
        let resp = self.http.execute(req).await.map_err(BotError::Http)?;
        let status = resp.status();
        let body = resp.text().await.map_err(BotError::Http)?;
        parse_create_message_response(status, &body)
    }

    pub fn build_current_user_request(&self) -> Result<Request, BotError> {
        self.build_request_builder(Method::GET, "users/@me")?
            .build()
            .map_err(BotError::Http)
    }

    pub fn build_create_message_request(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<Request, BotError> {
        let id: u64 = channel_id
            .trim()
            .parse()
            .map_err(|_| BotError::Config("channel_id must be an integer"))?;
        let body = serde_json::to_vec(&serde_json::json!({ "content": content }))
            .map_err(BotError::Json)?;
        self.build_request_builder(Method::POST, &format!("channels/{id}/messages"))?
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .build()
            .map_err(BotError::Http)
    }

    fn build_request_builder(
        &self,
        method: Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, BotError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| BotError::Url(err.to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bot {}", self.token))
                .map_err(BotError::InvalidHeaderValue)?,
        );
        Ok(self.http.request(method, url).headers(headers))
    }
}

pub fn parse_current_user_response(
    status: StatusCode,
    body: &str,
) -> Result<CurrentUser, BotError> {
    if !status.is_success() {
        return Err(BotError::Api {
            status,
            body: body.to_string(),
        });
    }
    serde_json::from_str(body).map_err(BotError::Json)
}

pub fn parse_create_message_response(status: StatusCode, body: &str) -> Result<(), BotError> {
    if !status.is_success() {
        return Err(BotError::Api {
            status,
            body: body.to_string(),
        });
    }
    Ok(())
}

/// Spawns the connectivity manager and returns the `bot_connected` receiver.
///
/// The loop mirrors the lifecycle the panel expects: no token means
/// disconnected; a changed token is validated immediately; an unchanged token
/// is re-validated every `refresh_secs`.
pub fn spawn_manager(settings: SettingsStore, refresh_secs: u64) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(manager_loop(settings, refresh_secs, tx));
    rx
}

async fn manager_loop(settings: SettingsStore, refresh_secs: u64, tx: watch::Sender<bool>) {
    let refresh = Duration::from_secs(refresh_secs);
    let mut ticker = tokio::time::interval(Duration::from_secs(TOKEN_POLL_INTERVAL_SECS));
    let mut current_token = String::new();
    let mut last_check: Option<Instant> = None;

    loop {
        ticker.tick().await;

        // The settings read hits the config file and vault on disk; keep it
        // off the async workers.
        let settings_read = settings.clone();
        let desired = tokio::task::spawn_blocking(move || settings_read.discord_token())
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
            .trim()
            .to_string();
        if desired.is_empty() {
            if !current_token.is_empty() {
                tracing::info!("bot token cleared, marking disconnected");
            }
            current_token.clear();
            last_check = None;
            tx.send_replace(false);
            continue;
        }

        let token_changed = desired != current_token;
        let refresh_due = last_check.map(|t| t.elapsed() >= refresh).unwrap_or(true);
        if !token_changed && !refresh_due {
            continue;
        }

        let connected = match DiscordClient::new(&desired) {
            Ok(client) => match client.current_user().await {
                Ok(user) => {
                    if token_changed {
                        tracing::info!(username = %user.username, "bot token validated");
                    }
                    true
                }
                Err(err) => {
                    tracing::warn!(error = %err, "bot token validation failed");
                    false
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "bot client init failed");
                false
            }
        };

        current_token = desired;
        last_check = Some(Instant::now());
        tx.send_replace(connected);
    }
}

#[derive(Debug)]
pub enum BotError {
    Config(&'static str),
    Url(String),
    Http(reqwest::Error),
    Json(serde_json::Error),
    InvalidHeaderValue(reqwest::header::InvalidHeaderValue),
    Api { status: StatusCode, body: String },
}

impl fmt::Display for BotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "{msg}"),
            Self::Url(err) => write!(f, "url error: {err}"),
            Self::Http(err) => write!(f, "http error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::InvalidHeaderValue(err) => write!(f, "invalid header value: {err}"),
            Self::Api { status, body } => write!(f, "discord api error {}: {}", status.as_u16(), body),
        }
    }
}

impl std::error::Error for BotError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DiscordClient {
        DiscordClient::new("bot-token-123").unwrap()
    }

    #[test]
    fn new_rejects_empty_token() {
        assert!(DiscordClient::new("").is_err());
        assert!(DiscordClient::new("   ").is_err());
    }

    #[test]
    fn current_user_request_has_bot_auth() {
        let req = client().build_current_user_request().unwrap();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.url().as_str(), "https://discord.com/api/v10/users/@me");
        assert_eq!(
            req.headers().get(AUTHORIZATION).unwrap(),
            &HeaderValue::from_static("Bot bot-token-123")
        );
    }

    #[test]
    fn create_message_request_targets_channel_with_json_body() {
        let req = client()
            .build_create_message_request("123456789", "hello from the panel")
            .unwrap();
        assert_eq!(req.method(), Method::POST);
        assert_eq!(
            req.url().as_str(),
            "https://discord.com/api/v10/channels/123456789/messages"
        );
        let body = req.body().unwrap().as_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(json["content"], "hello from the panel");
    }

    #[test]
    fn create_message_rejects_non_integer_channel_id() {
        let err = client()
            .build_create_message_request("general", "hi")
            .unwrap_err();
        assert!(format!("{err}").contains("channel_id must be an integer"));
    }

    #[test]
    fn parse_current_user_reads_username() {
        let user = parse_current_user_response(
            StatusCode::OK,
            r#"{"id": "42", "username": "finbot"}"#,
        )
        .unwrap();
        assert_eq!(user.id, "42");
        assert_eq!(user.username, "finbot");
    }

    #[test]
    fn parse_current_user_propagates_api_error() {
        let err = parse_current_user_response(StatusCode::UNAUTHORIZED, "401: Unauthorized")
            .unwrap_err();
        assert!(format!("{err}").contains("401"));
    }

    #[test]
    fn parse_create_message_is_ok_on_success() {
        assert!(parse_create_message_response(StatusCode::OK, "{}").is_ok());
        assert!(parse_create_message_response(StatusCode::FORBIDDEN, "").is_err());
    }

    #[tokio::test]
    async fn manager_reports_disconnected_without_a_token() {
        use crate::security::Vault;
        use std::sync::{Arc, Mutex};

        let vault_path = std::env::temp_dir().join(format!(
            "finbot-bot-manager-vault-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&vault_path);
        let vault = Arc::new(Mutex::new(Vault::new(vault_path.to_str()).unwrap()));
        let settings = SettingsStore::new(vault);

        let mut rx = spawn_manager(settings, 30);
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("first poll publishes a status")
            .unwrap();
        assert!(!*rx.borrow());

        let _ = std::fs::remove_file(&vault_path);
    }
}
