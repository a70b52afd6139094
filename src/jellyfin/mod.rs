use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Client, Method, Request, StatusCode, Url,
};
use serde::Serialize;
use std::{fmt, time::Duration};

const REQUEST_TIMEOUT_SECS: u64 = 5;
const TOKEN_HEADER: &str = "X-Emby-Token";

pub const SYSTEM_INFO_PATH: &str = "System/Info";
pub const USERS_PATH: &str = "Users";
pub const LIBRARIES_PATH: &str = "Library/MediaFolders";
pub const ME_PATH: &str = "Users/Me";
pub const SESSIONS_PATH: &str = "Sessions";

/// Minimal client for the Jellyfin REST API.
#[derive(Clone, Debug)]
pub struct JellyfinClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

/// Normalized result for every Jellyfin call. `status` is the HTTP status,
/// `400` for unusable settings, or `0` for a transport-level failure.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResult {
    pub ok: bool,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResult {
    fn transport_failure(err: &reqwest::Error) -> Self {
        Self {
            ok: false,
            status: 0,
            message: Some(format!("Network error: {err}")),
            data: None,
        }
    }
}

/// Result served when the stored settings cannot produce a request at all.
pub fn missing_settings_result() -> ApiResult {
    ApiResult {
        ok: false,
        status: 400,
        message: Some("Missing or invalid Jellyfin URL or API key in settings.".to_string()),
        data: None,
    }
}

impl JellyfinClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, JellyfinError> {
        let base_url = base_url.into();
        let api_key = api_key.into();

        if base_url.trim().is_empty() {
            return Err(JellyfinError::Config("Jellyfin URL must not be empty"));
        }
        if api_key.trim().is_empty() {
            return Err(JellyfinError::Config("Jellyfin API key must not be empty"));
        }

        let mut parsed =
            Url::parse(base_url.trim()).map_err(|err| JellyfinError::Url(err.to_string()))?;
        if !parsed.path().ends_with('/') {
            let new_path = format!("{}/", parsed.path().trim_end_matches('/'));
            parsed.set_path(&new_path);
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(JellyfinError::Http)?;

        Ok(Self {
            http,
            base_url: parsed,
            api_key: api_key.trim().to_string(),
        })
    }

    pub async fn system_info(&self) -> ApiResult {
        self.get(SYSTEM_INFO_PATH).await
    }

    pub async fn users(&self) -> ApiResult {
        self.get(USERS_PATH).await
    }

    pub async fn libraries(&self) -> ApiResult {
        self.get(LIBRARIES_PATH).await
    }

    /// Resolves the user the API key authenticates as; the credential test
    /// reports this user's name.
    pub async fn me(&self) -> ApiResult {
        self.get(ME_PATH).await
    }

    /// Active sessions; the catalog sync records their now-playing items.
    pub async fn sessions(&self) -> ApiResult {
        self.get(SESSIONS_PATH).await
    }

    async fn get(&self, path: &str) -> ApiResult {
        let req = match self.build_get_request(path) {
            Ok(req) => req,
            Err(_) => return missing_settings_result(),
        };
        let resp = match self.http.execute(req).await {
            Ok(resp) => resp,
            Err(err) => return ApiResult::transport_failure(&err),
        };
        let status = resp.status();
        match resp.text().await {
            Ok(body) => parse_response(status, &body),
            Err(err) => ApiResult::transport_failure(&err),
        }
    }

    pub fn build_get_request(&self, path: &str) -> Result<Request, JellyfinError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| JellyfinError::Url(err.to_string()))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            TOKEN_HEADER,
            HeaderValue::from_str(&self.api_key).map_err(JellyfinError::InvalidHeaderValue)?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        self.http
            .request(Method::GET, url)
            .headers(headers)
            .build()
            .map_err(JellyfinError::Http)
    }
}

/// Maps an HTTP response to the normalized result shape. Success bodies that
/// fail to parse as JSON degrade to an empty object rather than an error.
pub fn parse_response(status: StatusCode, body: &str) -> ApiResult {
    if status.is_success() {
        let data = serde_json::from_str(body).unwrap_or_else(|_| serde_json::json!({}));
        return ApiResult {
            ok: true,
            status: status.as_u16(),
            message: None,
            data: Some(data),
        };
    }
    ApiResult {
        ok: false,
        status: status.as_u16(),
        message: Some(format!(
            "HTTP error from Jellyfin ({}): {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )),
        data: None,
    }
}

#[derive(Debug)]
pub enum JellyfinError {
    Config(&'static str),
    Url(String),
    Http(reqwest::Error),
    InvalidHeaderValue(reqwest::header::InvalidHeaderValue),
}

impl fmt::Display for JellyfinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Url(err) => write!(f, "url error: {err}"),
            Self::Http(err) => write!(f, "http error: {err}"),
            Self::InvalidHeaderValue(err) => write!(f, "invalid header value: {err}"),
        }
    }
}

impl std::error::Error for JellyfinError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> JellyfinClient {
        JellyfinClient::new("http://media.example.test:8096", "token123").unwrap()
    }

    #[test]
    fn new_rejects_empty_url_and_key() {
        assert!(JellyfinClient::new("", "token").is_err());
        assert!(JellyfinClient::new("http://x:8096", "  ").is_err());
        assert!(JellyfinClient::new("not a url", "token").is_err());
    }

    #[test]
    fn get_request_joins_path_and_sets_auth_header() {
        let req = client().build_get_request(SYSTEM_INFO_PATH).unwrap();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(
            req.url().as_str(),
            "http://media.example.test:8096/System/Info"
        );
        assert_eq!(
            req.headers().get(TOKEN_HEADER).unwrap(),
            &HeaderValue::from_static("token123")
        );
        assert_eq!(
            req.headers().get(ACCEPT).unwrap(),
            &HeaderValue::from_static("application/json")
        );
    }

    #[test]
    fn base_url_with_trailing_slash_joins_cleanly() {
        let client = JellyfinClient::new("http://media.example.test:8096/", "t").unwrap();
        let req = client.build_get_request(LIBRARIES_PATH).unwrap();
        assert_eq!(
            req.url().as_str(),
            "http://media.example.test:8096/Library/MediaFolders"
        );
    }

    #[test]
    fn parse_success_passes_body_through() {
        let res = parse_response(
            StatusCode::OK,
            r#"{"ServerName": "jellyfin", "Version": "10.8"}"#,
        );
        assert!(res.ok);
        assert_eq!(res.status, 200);
        assert_eq!(res.data.unwrap()["ServerName"], "jellyfin");
        assert!(res.message.is_none());
    }

    #[test]
    fn parse_success_with_bad_json_degrades_to_empty_object() {
        let res = parse_response(StatusCode::OK, "not json");
        assert!(res.ok);
        assert_eq!(res.data.unwrap(), serde_json::json!({}));
    }

    #[test]
    fn parse_http_error_reports_status_and_reason() {
        let res = parse_response(StatusCode::UNAUTHORIZED, "");
        assert!(!res.ok);
        assert_eq!(res.status, 401);
        assert!(res
            .message
            .as_deref()
            .unwrap()
            .contains("HTTP error from Jellyfin (401)"));
        assert!(res.data.is_none());
    }

    #[test]
    fn missing_settings_result_is_a_400() {
        let res = missing_settings_result();
        assert!(!res.ok);
        assert_eq!(res.status, 400);
        assert!(res
            .message
            .as_deref()
            .unwrap()
            .contains("Missing or invalid"));
    }
}
