//! Common test utilities for torrent-relay end-to-end tests
//!
//! The relay runs with its production components: SQLite ledger, aria2
//! JSON-RPC client and HTTP uploader. aria2 and the file host are played by
//! wiremock servers.

#![allow(dead_code)]

use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use torrent_relay::{Config, Replier, Result};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn bytes(value: &[u8]) -> Vec<u8> {
    let mut out = format!("{}:", value.len()).into_bytes();
    out.extend_from_slice(value);
    out
}

fn int(value: i64) -> Vec<u8> {
    format!("i{}e", value).into_bytes()
}

fn dict(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut out = b"d".to_vec();
    for (key, value) in entries {
        out.extend(bytes(key.as_bytes()));
        out.extend_from_slice(value);
    }
    out.push(b'e');
    out
}

fn list(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = b"l".to_vec();
    for item in items {
        out.extend_from_slice(item);
    }
    out.push(b'e');
    out
}

/// Multi-file `.torrent` descriptor; each file is `(path components, length)`
pub fn multi_file_descriptor(name: &str, files: &[(&[&str], i64)]) -> Vec<u8> {
    let entries: Vec<Vec<u8>> = files
        .iter()
        .map(|(path, length)| {
            let components: Vec<Vec<u8>> = path.iter().map(|c| bytes(c.as_bytes())).collect();
            dict(&[("length", int(*length)), ("path", list(&components))])
        })
        .collect();
    let info = dict(&[
        ("files", list(&entries)),
        ("name", bytes(name.as_bytes())),
        ("piece length", int(16384)),
        ("pieces", bytes(&[0x5a; 20])),
    ]);
    dict(&[
        ("announce", bytes(b"http://tracker.example/announce")),
        ("info", info),
    ])
}

/// Single-file `.torrent` descriptor
pub fn single_file_descriptor(name: &str, length: i64) -> Vec<u8> {
    let info = dict(&[
        ("length", int(length)),
        ("name", bytes(name.as_bytes())),
        ("piece length", int(16384)),
        ("pieces", bytes(&[0x5a; 20])),
    ]);
    dict(&[
        ("announce", bytes(b"http://tracker.example/announce")),
        ("info", info),
    ])
}

/// Stands in for `aria2.addTorrent`: writes the payload into the requested
/// `dir` and answers with a GID
struct AddTorrent {
    files: Vec<(PathBuf, usize)>,
}

impl Respond for AddTorrent {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let dir = body["params"]
            .as_array()
            .and_then(|params| params.iter().find_map(|p| p.get("dir")))
            .and_then(Value::as_str)
            .map(PathBuf::from);
        let Some(dir) = dir else {
            return ResponseTemplate::new(400);
        };

        for (relative, size) in &self.files {
            let target = dir.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(target, vec![b'x'; *size]).unwrap();
        }

        rpc_result(json!("2089b05ecca3d829"))
    }
}

fn rpc_result(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": "torrent-relay-1",
        "result": result,
    }))
}

/// Mount a fake aria2 daemon that finishes every download instantly
///
/// `files` are written relative to the save directory of each request.
pub async fn mount_fake_aria2(server: &MockServer, files: &[(&str, usize)]) {
    let total: usize = files.iter().map(|(_, size)| size).sum();

    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": "aria2.addTorrent" })))
        .respond_with(AddTorrent {
            files: files
                .iter()
                .map(|(p, size)| (PathBuf::from(p), *size))
                .collect(),
        })
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": "aria2.tellStatus" })))
        .respond_with(rpc_result(json!({
            "gid": "2089b05ecca3d829",
            "status": "complete",
            "totalLength": total.to_string(),
            "completedLength": total.to_string(),
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": "aria2.forceRemove" })))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "torrent-relay-3",
            "error": { "code": 1, "message": "Active Download not found for GID#2089b05ecca3d829" },
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/jsonrpc"))
        .and(body_partial_json(json!({ "method": "aria2.removeDownloadResult" })))
        .respond_with(rpc_result(json!("OK")))
        .mount(server)
        .await;
}

/// Relay configuration pointing at the mock servers
pub fn relay_config(root: &Path, aria2: &MockServer, upload_host: &MockServer) -> Config {
    let mut config = Config::default();
    config.download.work_dir = root.join("work");
    config.download.poll_interval = std::time::Duration::from_millis(10);
    config.download.download_timeout = std::time::Duration::from_secs(10);
    config.delivery.inline_threshold_bytes = 1024;
    config.delivery.upload_endpoint = upload_host.uri();
    config.engine.rpc_url = format!("{}/jsonrpc", aria2.uri());
    config.disk_space.enabled = false;
    config.persistence.database_path = root.join("relay.db");
    config
}

/// Something the relay sent back to the user
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(String),
    File(PathBuf),
}

/// Replier that records every message
#[derive(Default)]
pub struct RecordingReplier {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingReplier {
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::Text(text) => Some(text.clone()),
                Sent::File(_) => None,
            })
            .collect()
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Sent::File(path) => Some(path.clone()),
                Sent::Text(_) => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Replier for RecordingReplier {
    async fn send_text(&self, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_file(&self, path: &Path, _caption: &str) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::File(path.to_path_buf()));
        Ok(())
    }
}
