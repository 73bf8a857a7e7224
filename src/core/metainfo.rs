//! Torrent metainfo structures.
//!
//! Parses the `.torrent` shape: `announce`/`announce-list`, the `info`
//! dictionary with `piece length`, `pieces`, and either a single-file
//! (`length`) or multi-file (`files`) layout. The info hash is the SHA-1 of
//! the canonically re-encoded `info` value.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use sha1::{Digest, Sha1};
use thiserror::Error;

use super::bencode::{self, DecodeError, Value};

pub const INFO_HASH_LEN: usize = 20;

/// 20-byte torrent identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InfoHash([u8; INFO_HASH_LEN]);

impl InfoHash {
    pub fn from_bytes(bytes: &[u8]) -> Option<InfoHash> {
        let array: [u8; INFO_HASH_LEN] = bytes.try_into().ok()?;
        Some(InfoHash(array))
    }

    pub fn as_bytes(&self) -> &[u8; INFO_HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({self})")
    }
}

impl FromStr for InfoHash {
    type Err = MetaInfoError;

    fn from_str(s: &str) -> Result<InfoHash, MetaInfoError> {
        let text = s.as_bytes();
        if text.len() != INFO_HASH_LEN * 2 {
            return Err(MetaInfoError::BadHexHash);
        }
        let mut out = [0u8; INFO_HASH_LEN];
        for (i, slot) in out.iter_mut().enumerate() {
            let hi = hex_nibble(text[2 * i]).ok_or(MetaInfoError::BadHexHash)?;
            let lo = hex_nibble(text[2 * i + 1]).ok_or(MetaInfoError::BadHexHash)?;
            *slot = (hi << 4) | lo;
        }
        Ok(InfoHash(out))
    }
}

fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFile {
    pub path: PathBuf,
    pub length: u64,
}

#[derive(Debug, Clone)]
pub struct MetaInfo {
    pub info_hash: InfoHash,
    /// Announce URL tiers; flattened single-tracker torrents get one tier.
    pub announce_tiers: Vec<Vec<String>>,
    pub piece_length: u64,
    pub piece_hashes: Vec<[u8; 20]>,
    pub files: Vec<TargetFile>,
    /// Directory name for multi-file torrents, file name otherwise.
    pub basename: String,
    pub total_length: u64,
    pub creation_ts: Option<i64>,
    pub creator: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetaInfoError {
    #[error("metainfo is not valid bencode: {0}")]
    Decode(#[from] DecodeError),
    #[error("metainfo is not a dictionary")]
    NotADict,
    #[error("metainfo is missing required field {0:?}")]
    MissingField(&'static str),
    #[error("metainfo field {0:?} has the wrong type")]
    WrongType(&'static str),
    #[error("info.pieces length {0} is not a multiple of 20")]
    BadPieces(usize),
    #[error("file entry has an empty or invalid path")]
    BadPath,
    #[error("field {0:?} holds a negative length")]
    NegativeLength(&'static str),
    #[error("info hash is not 40 hex digits")]
    BadHexHash,
}

impl MetaInfo {
    pub fn from_benc_bytes(data: &[u8]) -> Result<MetaInfo, MetaInfoError> {
        Self::from_value(&bencode::decode(data)?)
    }

    pub fn from_value(root: &Value) -> Result<MetaInfo, MetaInfoError> {
        if root.as_dict().is_none() {
            return Err(MetaInfoError::NotADict);
        }

        let info = root
            .get(b"info")
            .ok_or(MetaInfoError::MissingField("info"))?;
        if info.as_dict().is_none() {
            return Err(MetaInfoError::WrongType("info"));
        }

        let announce_tiers = parse_announce(root)?;
        let piece_length = required_length(info, "piece length", b"piece length")?;

        let pieces = info
            .get(b"pieces")
            .ok_or(MetaInfoError::MissingField("pieces"))?
            .as_bytes()
            .ok_or(MetaInfoError::WrongType("pieces"))?;
        if pieces.len() % 20 != 0 {
            return Err(MetaInfoError::BadPieces(pieces.len()));
        }
        let piece_hashes = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let name = info
            .get(b"name")
            .and_then(Value::as_bytes)
            .map(|b| String::from_utf8_lossy(b).into_owned());

        let (files, basename) = match info.get(b"length") {
            // Single-file layout: the name is the file name.
            Some(length) => {
                let length = non_negative(length, "length")?;
                let name = name.ok_or(MetaInfoError::MissingField("name"))?;
                let file = TargetFile {
                    path: PathBuf::from(&name),
                    length,
                };
                (vec![file], name)
            }
            None => {
                let entries = info
                    .get(b"files")
                    .ok_or(MetaInfoError::MissingField("files"))?
                    .as_list()
                    .ok_or(MetaInfoError::WrongType("files"))?;
                let mut files = Vec::with_capacity(entries.len());
                for entry in entries {
                    files.push(parse_file_entry(entry)?);
                }
                if files.is_empty() {
                    return Err(MetaInfoError::WrongType("files"));
                }
                (files, name.ok_or(MetaInfoError::MissingField("name"))?)
            }
        };

        let total_length = files.iter().map(|f| f.length).sum();

        let digest = Sha1::digest(info.encode());
        let info_hash = InfoHash(digest.into());

        Ok(MetaInfo {
            info_hash,
            announce_tiers,
            piece_length,
            piece_hashes,
            files,
            basename,
            total_length,
            creation_ts: root.get(b"creation date").and_then(Value::as_int),
            creator: optional_string(root, b"created by"),
            comment: optional_string(root, b"comment"),
        })
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }
}

fn parse_announce(root: &Value) -> Result<Vec<Vec<String>>, MetaInfoError> {
    if let Some(tiers) = root.get(b"announce-list") {
        let tiers = tiers
            .as_list()
            .ok_or(MetaInfoError::WrongType("announce-list"))?;
        let mut out = Vec::with_capacity(tiers.len());
        for tier in tiers {
            let urls = tier
                .as_list()
                .ok_or(MetaInfoError::WrongType("announce-list"))?;
            let mut tier_urls = Vec::with_capacity(urls.len());
            for url in urls {
                let url = url
                    .as_bytes()
                    .ok_or(MetaInfoError::WrongType("announce-list"))?;
                tier_urls.push(String::from_utf8_lossy(url).into_owned());
            }
            out.push(tier_urls);
        }
        return Ok(out);
    }
    let announce = root
        .get(b"announce")
        .ok_or(MetaInfoError::MissingField("announce"))?
        .as_bytes()
        .ok_or(MetaInfoError::WrongType("announce"))?;
    Ok(vec![vec![String::from_utf8_lossy(announce).into_owned()]])
}

fn parse_file_entry(entry: &Value) -> Result<TargetFile, MetaInfoError> {
    let length = required_length(entry, "files.length", b"length")?;
    let segments = entry
        .get(b"path")
        .ok_or(MetaInfoError::MissingField("path"))?
        .as_list()
        .ok_or(MetaInfoError::WrongType("path"))?;
    if segments.is_empty() {
        return Err(MetaInfoError::BadPath);
    }
    let mut path = PathBuf::new();
    for segment in segments {
        let segment = segment.as_bytes().ok_or(MetaInfoError::WrongType("path"))?;
        let text = String::from_utf8_lossy(segment);
        if text.is_empty() || text == "." || text == ".." || text.contains('/') {
            return Err(MetaInfoError::BadPath);
        }
        path.push(text.as_ref());
    }
    Ok(TargetFile { path, length })
}

fn required_length(
    dict: &Value,
    label: &'static str,
    key: &[u8],
) -> Result<u64, MetaInfoError> {
    let value = dict.get(key).ok_or(MetaInfoError::MissingField(label))?;
    non_negative(value, label)
}

fn non_negative(value: &Value, label: &'static str) -> Result<u64, MetaInfoError> {
    let n = value.as_int().ok_or(MetaInfoError::WrongType(label))?;
    u64::try_from(n).map_err(|_| MetaInfoError::NegativeLength(label))
}

fn optional_string(root: &Value, key: &[u8]) -> Option<String> {
    root.get(key)
        .and_then(Value::as_bytes)
        .map(|b| String::from_utf8_lossy(b).into_owned())
}
