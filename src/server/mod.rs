use crate::bot::DiscordClient;
use crate::jellyfin::{missing_settings_result, ApiResult, JellyfinClient};
use crate::settings::SettingsStore;
use crate::sync::SharedCatalog;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Clone)]
struct ServerState {
    settings: SettingsStore,
    bot_connected: watch::Receiver<bool>,
    catalog: SharedCatalog,
}

pub async fn start(
    addr: SocketAddr,
    settings: SettingsStore,
    bot_connected: watch::Receiver<bool>,
    catalog: SharedCatalog,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(ServerState {
        settings,
        bot_connected,
        catalog,
    });

    let app = Router::new()
        .route("/", get(panel_page))
        .route("/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/config", get(get_config))
        .route("/api/config", post(update_config))
        .route("/api/notify", post(send_notification))
        .route("/api/jellyfin/system-info", get(jellyfin_system_info))
        .route("/api/jellyfin/users", get(jellyfin_users))
        .route("/api/jellyfin/libraries", get(jellyfin_libraries))
        .route("/api/jellyfin/test", post(jellyfin_test))
        .route("/api/stats", get(get_stats))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

async fn panel_page() -> Html<&'static str> {
    Html(PANEL_HTML)
}

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "timestamp": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        })),
    )
}

#[derive(Serialize)]
struct StatusResponse {
    bot_connected: bool,
}

async fn get_status(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        bot_connected: *state.bot_connected.borrow(),
    })
}

async fn get_config(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    match state.settings.snapshot() {
        Ok(map) => Json(map).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to load config: {}", err),
        )
            .into_response(),
    }
}

#[derive(Serialize)]
struct UpdateResponse {
    updated: Vec<String>,
}

async fn update_config(
    State(state): State<Arc<ServerState>>,
    Form(fields): Form<Vec<(String, String)>>,
) -> impl IntoResponse {
    match state.settings.apply(&fields) {
        Ok(updated) => Json(UpdateResponse { updated }).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to save config: {}", err),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct NotifyRequest {
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct NotifyResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl NotifyResponse {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

async fn send_notification(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<NotifyRequest>,
) -> Json<NotifyResponse> {
    let Some(token) = state.settings.discord_token() else {
        return Json(NotifyResponse::failure("No bot token configured."));
    };
    let client = match DiscordClient::new(token) {
        Ok(client) => client,
        Err(err) => return Json(NotifyResponse::failure(err.to_string())),
    };
    match client.send_message(&req.channel_id, &req.message).await {
        Ok(()) => Json(NotifyResponse {
            ok: true,
            error: None,
        }),
        Err(err) => Json(NotifyResponse::failure(err.to_string())),
    }
}

fn stored_jellyfin_client(state: &ServerState) -> Option<JellyfinClient> {
    let (url, api_key) = state.settings.jellyfin_credentials();
    JellyfinClient::new(url, api_key?).ok()
}

async fn jellyfin_system_info(State(state): State<Arc<ServerState>>) -> Json<ApiResult> {
    match stored_jellyfin_client(&state) {
        Some(client) => Json(client.system_info().await),
        None => Json(missing_settings_result()),
    }
}

async fn jellyfin_users(State(state): State<Arc<ServerState>>) -> Json<ApiResult> {
    match stored_jellyfin_client(&state) {
        Some(client) => Json(client.users().await),
        None => Json(missing_settings_result()),
    }
}

async fn jellyfin_libraries(State(state): State<Arc<ServerState>>) -> Json<ApiResult> {
    match stored_jellyfin_client(&state) {
        Some(client) => Json(client.libraries().await),
        None => Json(missing_settings_result()),
    }
}

/// Aggregates from the background catalog sync.
async fn get_stats(State(state): State<Arc<ServerState>>) -> Json<serde_json::Value> {
    let catalog = state.catalog.lock().unwrap();
    Json(serde_json::json!({
        "last_sync": catalog.last_sync_unix,
        "last_report": catalog.last_report,
        "top_users": catalog.top_users(10),
        "top_items": catalog.top_items(10),
    }))
}

#[derive(Deserialize)]
struct TestRequest {
    #[serde(default)]
    url: String,
    /// Empty means "use the stored API key".
    #[serde(default)]
    api_key: String,
}

#[derive(Serialize)]
struct TestResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<TestUser>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct TestUser {
    name: String,
}

impl TestResponse {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            user: None,
            error: Some(error.into()),
        }
    }
}

async fn jellyfin_test(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<TestRequest>,
) -> Json<TestResponse> {
    let (stored_url, stored_key) = state.settings.jellyfin_credentials();
    let url = if req.url.trim().is_empty() {
        stored_url
    } else {
        req.url
    };
    let api_key = if req.api_key.is_empty() {
        stored_key.unwrap_or_default()
    } else {
        req.api_key
    };

    let client = match JellyfinClient::new(url, api_key) {
        Ok(client) => client,
        Err(err) => return Json(TestResponse::failure(err.to_string())),
    };

    let result = client.me().await;
    if result.ok {
        let name = result
            .data
            .as_ref()
            .and_then(|d| d.get("Name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unknown")
            .to_string();
        Json(TestResponse {
            ok: true,
            user: Some(TestUser { name }),
            error: None,
        })
    } else {
        Json(TestResponse::failure(
            result
                .message
                .unwrap_or_else(|| "Jellyfin test failed.".to_string()),
        ))
    }
}

const PANEL_HTML: &str = r##"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>FinBot Admin</title>
  <style>
    :root { --bg:#0b0e12; --panel:#111723; --muted:#8da3c1; --good:#33d17a;
            --warn:#f6d32d; --bad:#e01b24; --line:#1f2a3a; }
    body { margin:0; font-family:Arial, sans-serif; background:var(--bg); color:#e6f0ff; }
    .wrap { max-width:640px; margin:30px auto; padding:0 16px; }
    h1 { font-size:20px; display:flex; align-items:center; gap:12px; }
    .badge { padding:4px 8px; background:var(--panel); border-radius:4px; font-size:12px;
             border:1px solid var(--line); }
    .badge.ok { border-color:var(--good); color:var(--good); }
    .badge.bad { border-color:var(--bad); color:var(--bad); }
    .badge.warn { border-color:var(--warn); color:var(--warn); }
    [role="tablist"] { display:flex; gap:6px; margin:18px 0 0; border-bottom:1px solid var(--line); }
    [role="tab"] { background:none; border:1px solid var(--line); border-bottom:none;
                   border-radius:6px 6px 0 0; color:var(--muted); padding:8px 14px;
                   font-size:13px; cursor:pointer; }
    [role="tab"][aria-selected="true"] { background:var(--panel); color:#e6f0ff; }
    [role="tabpanel"] { background:var(--panel); border:1px solid var(--line); border-top:none;
                        border-radius:0 0 6px 6px; padding:16px; }
    label { display:block; font-size:13px; color:var(--muted); margin:14px 0 4px; }
    input, textarea { width:100%; box-sizing:border-box; padding:8px 10px; background:var(--bg);
            border:1px solid var(--line); border-radius:4px; color:#e6f0ff; font-size:14px; }
    input:focus, textarea:focus { outline:none; border-color:var(--good); }
    button { margin-top:14px; padding:8px 16px; background:var(--good); color:#0b0e12;
             border:none; border-radius:4px; font-size:13px; font-weight:bold; cursor:pointer; }
    button:hover { opacity:0.9; }
    button.ghost { background:var(--panel); color:var(--muted); border:1px solid var(--line);
                   margin-top:4px; padding:4px 10px; font-weight:normal; }
    .row { display:flex; gap:8px; align-items:flex-end; }
    .row > div { flex:1; }
    .msg { margin-top:12px; font-size:13px; min-height:16px; }
    .msg.ok { color:var(--good); }
    .msg.err { color:var(--bad); }
    pre { background:var(--bg); border:1px solid var(--line); border-radius:4px; padding:10px;
          font-size:12px; overflow:auto; max-height:260px; }
    .help { color:var(--muted); font-size:11px; margin-top:2px; }
  </style>
</head>
<body>
  <div class="wrap">
    <h1>FinBot <span class="badge warn" id="statusBadge">Checking&hellip;</span></h1>

    <div role="tablist" aria-label="Panel sections">
      <button role="tab" data-panel="general" aria-selected="true" tabindex="0">General</button>
      <button role="tab" data-panel="notify" aria-selected="false" tabindex="-1">Notifications</button>
      <button role="tab" data-panel="jellyfin" aria-selected="false" tabindex="-1">Jellyfin</button>
    </div>

    <section id="general" role="tabpanel">
      <form id="configForm">
        <label for="DISCORD_TOKEN">Discord Bot Token</label>
        <input id="DISCORD_TOKEN" name="DISCORD_TOKEN" type="text" autocomplete="off" />
        <button type="button" class="ghost" data-clear="DISCORD_TOKEN">Clear stored token</button>

        <label for="JELLYFIN_URL">Jellyfin URL</label>
        <input id="JELLYFIN_URL" name="JELLYFIN_URL" type="text"
               placeholder="http://127.0.0.1:8096" />

        <label for="JELLYFIN_API_KEY">Jellyfin API Key</label>
        <input id="JELLYFIN_API_KEY" name="JELLYFIN_API_KEY" type="text" autocomplete="off" />
        <button type="button" class="ghost" data-clear="JELLYFIN_API_KEY">Clear stored key</button>

        <div class="help">Stored secrets are shown redacted; leave them untouched to keep them.</div>
        <button type="submit">Save</button>
        <div class="msg" id="configMsg"></div>
      </form>
    </section>

    <section id="notify" role="tabpanel" hidden>
      <form id="notifyForm">
        <label for="notifyChannel">Channel ID</label>
        <input id="notifyChannel" type="text" />
        <label for="notifyMessage">Message</label>
        <textarea id="notifyMessage" rows="3"></textarea>
        <button type="submit">Send test notification</button>
        <div class="msg" id="notifyMsg"></div>
      </form>
    </section>

    <section id="jellyfin" role="tabpanel" hidden>
      <form id="testForm">
        <div class="row">
          <div>
            <label for="testUrl">Server URL</label>
            <input id="testUrl" type="text" placeholder="Leave blank for stored URL" />
          </div>
          <div>
            <label for="testApiKey">API Key</label>
            <input id="testApiKey" type="text" placeholder="Leave blank for stored key" />
          </div>
        </div>
        <button type="submit">Test connection</button>
        <div class="msg" id="testMsg"></div>
      </form>

      <button type="button" class="ghost" id="loadSystemInfo">System info</button>
      <button type="button" class="ghost" id="loadUsers">Users</button>
      <button type="button" class="ghost" id="loadLibraries">Libraries</button>
      <button type="button" class="ghost" id="loadStats">Playback stats</button>
      <pre id="jellyfinOut" hidden></pre>
    </section>
  </div>

  <script>
    const TRACKED_FIELDS = ["DISCORD_TOKEN", "JELLYFIN_URL", "JELLYFIN_API_KEY"];
    const SECRET_KEYS = ["DISCORD_TOKEN", "JELLYFIN_API_KEY"];
    // All-asterisks, or a 1-10 char prefix + ellipsis + asterisks.
    const REDACTED_RE = /^(?:\*+|.{1,10}…\*+)$/;

    // Snapshot of redacted placeholders as loaded; written once, read at save.
    const initialSecrets = {};
    const cleared = {};

    async function loadConfig() {
      try {
        const res = await fetch("/api/config");
        if (!res.ok) return;
        const cfg = await res.json();
        for (const key of TRACKED_FIELDS) {
          const input = document.getElementById(key);
          if (!input) continue;
          const value = cfg[key] || "";
          input.value = value;
          if (SECRET_KEYS.includes(key) && REDACTED_RE.test(value)) {
            initialSecrets[key] = value;
          }
        }
      } catch (err) {
        // Leave the form blank rather than surface a load error.
      }
    }

    function computeSubmission() {
      const pairs = [];
      for (const key of TRACKED_FIELDS) {
        const input = document.getElementById(key);
        if (!input) continue;
        const value = input.value;
        if (!SECRET_KEYS.includes(key)) { pairs.push([key, value]); continue; }
        if (cleared[key]) { pairs.push([key, ""]); continue; }
        const snap = initialSecrets[key];
        if (snap !== undefined && value !== "" && value === snap) continue;
        pairs.push([key, value]);
      }
      return pairs;
    }

    document.querySelectorAll("[data-clear]").forEach(btn => {
      const key = btn.dataset.clear;
      const input = document.getElementById(key);
      if (!input) return;
      btn.addEventListener("click", () => {
        cleared[key] = true;
        input.value = "";
      });
    });

    document.getElementById("configForm").addEventListener("submit", async (e) => {
      e.preventDefault();
      const msg = document.getElementById("configMsg");
      try {
        const res = await fetch("/api/config", {
          method: "POST",
          headers: { "Content-Type": "application/x-www-form-urlencoded" },
          body: new URLSearchParams(computeSubmission()),
        });
        const data = await res.json();
        const changed = Array.isArray(data.updated) && data.updated.length > 0;
        msg.textContent = changed ? "Saved." : "No changes.";
        msg.className = "msg ok";
      } catch (err) {
        msg.textContent = "Save failed: " + err.message;
        msg.className = "msg err";
      }
    });

    // Status badge: connected / not connected / error fetching.
    const statusBadge = document.getElementById("statusBadge");
    async function refreshStatus() {
      const res = await fetchJson("/api/status");
      if (res.ok === false && res.data === null) {
        statusBadge.textContent = "Status unavailable";
        statusBadge.className = "badge warn";
      } else if (res.bot_connected) {
        statusBadge.textContent = "Bot connected";
        statusBadge.className = "badge ok";
      } else {
        statusBadge.textContent = "Bot not connected";
        statusBadge.className = "badge bad";
      }
    }

    async function fetchJson(path) {
      try {
        const res = await fetch(path);
        if (!res.ok) {
          return { ok: false, status: res.status, message: "HTTP " + res.status, data: null };
        }
        return await res.json();
      } catch (err) {
        return { ok: false, status: 0, message: String(err), data: null };
      }
    }

    const fetchSystemInfo = () => fetchJson("/api/jellyfin/system-info");
    const fetchUsers = () => fetchJson("/api/jellyfin/users");
    const fetchLibraries = () => fetchJson("/api/jellyfin/libraries");

    const jellyfinOut = document.getElementById("jellyfinOut");
    function renderJellyfin(result) {
      jellyfinOut.hidden = false;
      jellyfinOut.textContent = result.ok
        ? JSON.stringify(result.data, null, 2)
        : (result.message || "Request failed.");
    }
    document.getElementById("loadSystemInfo").addEventListener("click",
      async () => renderJellyfin(await fetchSystemInfo()));
    document.getElementById("loadUsers").addEventListener("click",
      async () => renderJellyfin(await fetchUsers()));
    document.getElementById("loadLibraries").addEventListener("click",
      async () => renderJellyfin(await fetchLibraries()));
    document.getElementById("loadStats").addEventListener("click", async () => {
      const res = await fetchJson("/api/stats");
      jellyfinOut.hidden = false;
      jellyfinOut.textContent = res.ok === false
        ? (res.message || "Request failed.")
        : JSON.stringify(res, null, 2);
    });

    document.getElementById("notifyForm").addEventListener("submit", async (e) => {
      e.preventDefault();
      const msg = document.getElementById("notifyMsg");
      try {
        const res = await fetch("/api/notify", {
          method: "POST",
          headers: { "Content-Type": "application/json" },
          body: JSON.stringify({
            channel_id: document.getElementById("notifyChannel").value,
            message: document.getElementById("notifyMessage").value,
          }),
        });
        const data = await res.json();
        msg.textContent = data.ok ? "Notification sent." : "Failed: " + (data.error || "unknown error");
        msg.className = data.ok ? "msg ok" : "msg err";
      } catch (err) {
        msg.textContent = "Request failed: " + err.message;
        msg.className = "msg err";
      }
    });

    document.getElementById("testForm").addEventListener("submit", async (e) => {
      e.preventDefault();
      const msg = document.getElementById("testMsg");
      try {
        const res = await fetch("/api/jellyfin/test", {
          method: "POST",
          headers: { "Content-Type": "application/json" },
          body: JSON.stringify({
            url: document.getElementById("testUrl").value,
            api_key: document.getElementById("testApiKey").value,
          }),
        });
        const data = await res.json();
        if (data.ok) {
          const name = data.user && data.user.name ? data.user.name : "unknown user";
          msg.textContent = "Authenticated as " + name + ".";
          msg.className = "msg ok";
        } else {
          msg.textContent = "Failed: " + (data.error || "unknown error");
          msg.className = "msg err";
        }
      } catch (err) {
        msg.textContent = "Request failed: " + err.message;
        msg.className = "msg err";
      }
    });

    // Tab activation synchronized with the URL fragment.
    const tabs = Array.from(document.querySelectorAll('[role="tab"]'));
    const panels = Array.from(document.querySelectorAll('[role="tabpanel"]'));
    const DEFAULT_PANEL = "general";

    function activatePanel(fragment) {
      let id = (fragment || "").replace(/^#/, "");
      if (!panels.some(p => p.id === id)) id = DEFAULT_PANEL;
      for (const panel of panels) panel.hidden = panel.id !== id;
      for (const tab of tabs) {
        const active = tab.dataset.panel === id;
        tab.setAttribute("aria-selected", active ? "true" : "false");
        tab.tabIndex = active ? 0 : -1;
      }
    }

    tabs.forEach(tab => tab.addEventListener("click", () => {
      history.replaceState(null, "", "#" + tab.dataset.panel);
      activatePanel(tab.dataset.panel);
    }));
    window.addEventListener("hashchange", () => activatePanel(location.hash));

    activatePanel(location.hash);
    loadConfig();
    refreshStatus();
    setInterval(refreshStatus, 10000);
  </script>
</body>
</html>"##;
