//! Archiving of dropped torrent handlers.
//!
//! Before `DROPBTH` removes a handler its state dump is written as one
//! bencoded record, so a dropped torrent's lifetime counters survive the
//! daemon.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::core::bencode::Value;

use super::torrent::TorrentHandler;
use super::BtError;

#[derive(Debug, Clone)]
pub struct BthArchiver {
    dir: PathBuf,
}

impl BthArchiver {
    pub fn new(dir: impl Into<PathBuf>) -> BthArchiver {
        BthArchiver { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one archive record; the file is named after the info hash so
    /// repeated add/drop cycles of the same torrent accumulate history.
    pub fn archive(&self, handler: &TorrentHandler) -> Result<PathBuf, BtError> {
        fs::create_dir_all(&self.dir).map_err(|source| BtError::Archive {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(format!("{}.benc", handler.info_hash()));
        let record = Value::dict(vec![
            (b"format".to_vec(), Value::Int(1)),
            (b"state".to_vec(), handler.state_dump()),
        ]);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| BtError::Archive {
                path: path.clone(),
                source,
            })?;
        file.write_all(&record.encode())
            .map_err(|source| BtError::Archive {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bencode;
    use crate::core::metainfo::MetaInfo;
    use crate::core::testutil::single_file_torrent;

    #[test]
    fn archive_writes_decodable_record() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = BthArchiver::new(dir.path().join("archive"));
        let mi = MetaInfo::from_benc_bytes(&single_file_torrent("t", 1)).unwrap();
        let handler = TorrentHandler::new(mi, false, 4);

        let path = archiver.archive(&handler).unwrap();
        let raw = std::fs::read(&path).unwrap();
        let record = bencode::decode(&raw).unwrap();
        assert_eq!(record.get(b"format"), Some(&bencode::Value::Int(1)));
        assert!(record.get(b"state").is_some());
    }

    #[test]
    fn repeated_archives_append() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = BthArchiver::new(dir.path());
        let mi = MetaInfo::from_benc_bytes(&single_file_torrent("t", 1)).unwrap();
        let handler = TorrentHandler::new(mi, false, 4);

        let path = archiver.archive(&handler).unwrap();
        let first_len = std::fs::metadata(&path).unwrap().len();
        archiver.archive(&handler).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), first_len * 2);
    }
}
