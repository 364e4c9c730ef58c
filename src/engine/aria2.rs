//! aria2 JSON-RPC engine

use super::{DownloadEngine, DownloadSession, SessionProgress};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::torrent::TorrentMetadata;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fields requested from `aria2.tellStatus`
const STATUS_KEYS: [&str; 5] = [
    "status",
    "totalLength",
    "completedLength",
    "errorCode",
    "errorMessage",
];

/// Download engine backed by an aria2 daemon (`aria2c --enable-rpc`)
///
/// Sessions are aria2 downloads identified by their GID. Torrents are added
/// with `seed-time=0` so aria2 reports `complete` as soon as the payload is
/// on disk instead of seeding indefinitely.
pub struct Aria2Engine {
    client: reqwest::Client,
    rpc_url: String,
    secret: Option<String>,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TellStatus {
    status: String,
    #[serde(default)]
    total_length: Option<String>,
    #[serde(default)]
    completed_length: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

impl Aria2Engine {
    /// Create a client for the daemon described by `config`
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.rpc_timeout)
            .build()?;

        Ok(Self {
            client,
            rpc_url: config.rpc_url.clone(),
            secret: config.rpc_secret.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue one JSON-RPC call and return its `result`
    ///
    /// The secret token, when configured, is prepended to `params` as aria2
    /// expects.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let mut full_params = Vec::with_capacity(params.len() + 1);
        if let Some(secret) = &self.secret {
            full_params.push(Value::String(format!("token:{}", secret)));
        }
        full_params.extend(params);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": format!("torrent-relay-{}", id),
            "method": method,
            "params": full_params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Engine(format!("aria2 {} timeout: {}", method, e))
                } else if e.is_connect() {
                    Error::Engine(format!("aria2 connection failed: {}", e))
                } else {
                    Error::Network(e)
                }
            })?;

        // aria2 answers RPC errors with 400 and a JSON error body, so parse first
        let status = response.status();
        let parsed: RpcResponse = response.json().await.map_err(|e| {
            Error::Engine(format!(
                "aria2 {} returned an unreadable response (HTTP {}): {}",
                method, status, e
            ))
        })?;

        if let Some(err) = parsed.error {
            return Err(Error::Engine(format!(
                "aria2 {} failed: {} (code {})",
                method, err.message, err.code
            )));
        }

        parsed
            .result
            .ok_or_else(|| Error::Engine(format!("aria2 {} returned no result", method)))
    }
}

#[async_trait]
impl DownloadEngine for Aria2Engine {
    async fn start_session(
        &self,
        metadata: &TorrentMetadata,
        save_path: &Path,
    ) -> Result<DownloadSession> {
        let encoded = BASE64.encode(&metadata.raw);
        let options = json!({
            "dir": save_path.to_string_lossy(),
            "seed-time": "0",
        });

        let result = self
            .call(
                "aria2.addTorrent",
                vec![Value::String(encoded), json!([]), options],
            )
            .await?;

        let gid = result
            .as_str()
            .ok_or_else(|| Error::Engine(format!("aria2 returned a non-string GID: {}", result)))?
            .to_string();

        tracing::debug!(
            gid = %gid,
            info_hash = %metadata.info_hash,
            save_path = %save_path.display(),
            "aria2 accepted torrent"
        );

        Ok(DownloadSession {
            handle: gid,
            save_path: save_path.to_path_buf(),
            name: metadata.name.clone(),
        })
    }

    async fn poll_progress(&self, session: &DownloadSession) -> Result<SessionProgress> {
        let result = self
            .call(
                "aria2.tellStatus",
                vec![Value::String(session.handle.clone()), json!(STATUS_KEYS)],
            )
            .await?;
        let status: TellStatus = serde_json::from_value(result)?;

        match status.status.as_str() {
            "error" => {
                return Err(Error::Engine(format!(
                    "aria2 download {} failed: {} (code {})",
                    session.handle,
                    status.error_message.as_deref().unwrap_or("unknown error"),
                    status.error_code.as_deref().unwrap_or("?")
                )));
            }
            "removed" => {
                return Err(Error::Engine(format!(
                    "aria2 download {} was removed outside the relay",
                    session.handle
                )));
            }
            _ => {}
        }

        let total = parse_length(status.total_length.as_deref());
        let completed = parse_length(status.completed_length.as_deref());
        Ok(SessionProgress::from_bytes(
            completed,
            total,
            status.status == "complete",
        ))
    }

    async fn stop_session(&self, session: &DownloadSession) -> Result<()> {
        let gid = Value::String(session.handle.clone());

        // Completed downloads cannot be force-removed, only their result can
        if let Err(e) = self.call("aria2.forceRemove", vec![gid.clone()]).await {
            match e {
                Error::Engine(ref msg) => {
                    tracing::debug!(gid = %session.handle, error = %msg, "aria2 forceRemove skipped")
                }
                other => return Err(other),
            }
        }

        if let Err(e) = self.call("aria2.removeDownloadResult", vec![gid]).await {
            match e {
                Error::Engine(ref msg) => {
                    tracing::debug!(gid = %session.handle, error = %msg, "aria2 result already gone")
                }
                other => return Err(other),
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "aria2"
    }
}

fn parse_length(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.parse().ok()).unwrap_or(0)
}
