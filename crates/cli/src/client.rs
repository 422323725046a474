//! API client for communicating with the optimizer daemon

use anyhow::{Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

/// Non-success answer from the daemon
#[derive(Debug, thiserror::Error)]
#[error("API error ({status}): {body}")]
pub struct ApiError {
    pub status: StatusCode,
    pub body: String,
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }
}

/// API client for the optimizer daemon
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        check(response)
            .await?
            .json()
            .await
            .context("Failed to parse response")
    }

    /// Make a GET request and return the body as text
    pub async fn get_text(&self, path: &str) -> Result<String> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        check(response)
            .await?
            .text()
            .await
            .context("Failed to read response")
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        check(response)
            .await?
            .json()
            .await
            .context("Failed to parse response")
    }
}

async fn check(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(ApiError { status, body }.into())
}

/// Parse a command-line value: JSON when it parses, a plain string otherwise
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub instance: String,
    pub container: String,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub swap_pct: f64,
    #[serde(default)]
    pub mem_bytes: u64,
    pub uptime_sec: u64,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub mem_used: u64,
    pub mem_total: u64,
    pub swap_used: u64,
    pub swap_total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    /// Global policy document, kept loose so new keys show up as-is
    pub config: serde_json::Map<String, Value>,
    #[serde(default)]
    pub live_stats: BTreeMap<String, Snapshot>,
    pub system: Option<SystemInfo>,
    #[serde(default)]
    pub last_global_restart_ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOnceResponse {
    pub ok: bool,
    #[serde(default)]
    pub events: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub ok: bool,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostponeRequest {
    pub seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostponeResponse {
    pub ok: bool,
    pub execute_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub info: Value,
}
