//! Torrent descriptor parsing
//!
//! Turns the raw bytes of a `.torrent` file into [`TorrentMetadata`]: name,
//! info hash, piece layout and the file manifest. Parsing does no I/O; the
//! relay calls it before any working directory exists so malformed uploads
//! are rejected without side effects.
//!
//! Paths inside the descriptor are untrusted. Any entry that is absolute,
//! contains `..`, or has an empty component is rejected, so every path in
//! [`TorrentMetadata::output_files`] stays inside the request's working
//! directory.

use crate::error::{Error, Result};
use crate::utils::is_contained_relative;
use serde::Deserialize;
use serde_bencode::value::Value;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

/// Length of one SHA-1 piece hash in the `pieces` string
const PIECE_HASH_LEN: usize = 20;

/// One file listed in a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFileEntry {
    /// Path relative to the torrent root (for multi-file torrents, below `name`)
    pub path: PathBuf,
    /// Declared size in bytes
    pub length: u64,
}

/// Parsed and validated torrent descriptor
#[derive(Debug, Clone)]
pub struct TorrentMetadata {
    /// Suggested name of the file or top-level directory
    pub name: String,
    /// Hex-encoded SHA-1 of the bencoded `info` dictionary
    pub info_hash: String,
    /// Bytes per piece
    pub piece_length: u64,
    /// Number of pieces
    pub piece_count: usize,
    /// Primary tracker, if any
    pub announce: Option<String>,
    /// Flattened tracker tiers from `announce-list`
    pub announce_list: Vec<String>,
    /// Whether the descriptor uses the multi-file layout
    pub multi_file: bool,
    /// Files in manifest order
    pub files: Vec<TorrentFileEntry>,
    /// Original descriptor bytes, handed to the engine unchanged
    pub raw: Vec<u8>,
}

impl TorrentMetadata {
    /// Sum of all declared file lengths
    ///
    /// Parsed descriptors never overflow; hand-built metadata saturates.
    pub fn total_size(&self) -> u64 {
        self.files
            .iter()
            .fold(0u64, |total, f| total.saturating_add(f.length))
    }

    /// Paths of the files the download will produce, relative to the save path
    ///
    /// Single-file torrents produce `[name]`; multi-file torrents produce
    /// `name/<path>` for every entry, in manifest order.
    pub fn output_files(&self) -> Vec<PathBuf> {
        if self.multi_file {
            self.files
                .iter()
                .map(|f| PathBuf::from(&self.name).join(&f.path))
                .collect()
        } else {
            vec![PathBuf::from(&self.name)]
        }
    }
}

#[derive(Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    announce: Option<String>,
    #[serde(default, rename = "announce-list")]
    announce_list: Option<Vec<Vec<String>>>,
}

#[derive(Deserialize)]
struct RawInfo {
    name: String,
    #[serde(rename = "piece length")]
    piece_length: i64,
    #[serde(with = "serde_bytes")]
    pieces: Vec<u8>,
    #[serde(default)]
    length: Option<i64>,
    #[serde(default)]
    files: Option<Vec<RawFile>>,
}

#[derive(Deserialize)]
struct RawFile {
    length: i64,
    path: Vec<String>,
}

/// Parse and validate a torrent descriptor
///
/// Fails with [`Error::InvalidDescriptor`] when the bytes are not bencode,
/// the `info` dictionary is missing or malformed, the piece layout is
/// inconsistent, or a file path would escape the download directory.
pub fn parse_descriptor(bytes: &[u8]) -> Result<TorrentMetadata> {
    if bytes.is_empty() {
        return Err(invalid("descriptor is empty"));
    }

    let root: Value = serde_bencode::from_bytes(bytes)
        .map_err(|e| invalid(format!("not a bencoded document: {}", e)))?;
    let Value::Dict(root_dict) = root else {
        return Err(invalid("top-level value is not a dictionary"));
    };
    let info_value = root_dict
        .get(b"info".as_slice())
        .ok_or_else(|| invalid("missing info dictionary"))?;
    if !matches!(info_value, Value::Dict(_)) {
        return Err(invalid("info is not a dictionary"));
    }

    // Re-encoding sorts keys, which matches the canonical form peers hash
    let info_bytes = serde_bencode::to_bytes(info_value)
        .map_err(|e| invalid(format!("cannot encode info dictionary: {}", e)))?;
    let info_hash = hex::encode(Sha1::digest(&info_bytes));

    let descriptor: RawDescriptor = serde_bencode::from_bytes(bytes)
        .map_err(|e| invalid(format!("malformed tracker fields: {}", e)))?;
    let info: RawInfo = serde_bencode::from_bytes(&info_bytes)
        .map_err(|e| invalid(format!("malformed info dictionary: {}", e)))?;

    validate_name(&info.name)?;

    if info.piece_length <= 0 {
        return Err(invalid("piece length must be positive"));
    }
    if info.pieces.is_empty() || info.pieces.len() % PIECE_HASH_LEN != 0 {
        return Err(invalid(format!(
            "pieces length {} is not a positive multiple of {}",
            info.pieces.len(),
            PIECE_HASH_LEN
        )));
    }

    let (multi_file, files) = match (info.length, info.files) {
        (Some(_), Some(_)) => {
            return Err(invalid("info declares both length and files"));
        }
        (Some(length), None) => (
            false,
            vec![TorrentFileEntry {
                path: PathBuf::from(&info.name),
                length: non_negative(length, &info.name)?,
            }],
        ),
        (None, Some(raw_files)) => {
            if raw_files.is_empty() {
                return Err(invalid("files list is empty"));
            }
            let files = raw_files
                .into_iter()
                .map(file_entry)
                .collect::<Result<Vec<_>>>()?;
            (true, files)
        }
        (None, None) => return Err(invalid("info declares neither length nor files")),
    };

    files
        .iter()
        .try_fold(0u64, |total, f| total.checked_add(f.length))
        .ok_or_else(|| invalid("total size of the files overflows"))?;

    let announce_list = descriptor
        .announce_list
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .collect();

    Ok(TorrentMetadata {
        name: info.name,
        info_hash,
        piece_length: info.piece_length as u64,
        piece_count: info.pieces.len() / PIECE_HASH_LEN,
        announce: descriptor.announce,
        announce_list,
        multi_file,
        files,
        raw: bytes.to_vec(),
    })
}

fn file_entry(raw: RawFile) -> Result<TorrentFileEntry> {
    if raw.path.is_empty() {
        return Err(invalid("file entry has an empty path"));
    }
    let mut path = PathBuf::new();
    for component in &raw.path {
        if component.is_empty() || component.contains(['/', '\\']) {
            return Err(invalid(format!(
                "file path component {:?} is not a plain name",
                component
            )));
        }
        path.push(component);
    }
    if !is_contained_relative(&path) {
        return Err(invalid(format!(
            "file path {} escapes the download directory",
            path.display()
        )));
    }
    let length = non_negative(raw.length, &path.display().to_string())?;
    Ok(TorrentFileEntry { path, length })
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['/', '\\']) || !is_contained_relative(Path::new(name)) {
        return Err(invalid(format!("torrent name {:?} is not a plain name", name)));
    }
    Ok(())
}

fn non_negative(length: i64, what: &str) -> Result<u64> {
    u64::try_from(length).map_err(|_| invalid(format!("negative length for {}", what)))
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidDescriptor(reason.into())
}

#[cfg(test)]
pub(crate) mod fixtures;
