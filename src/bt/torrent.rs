//! Per-torrent state machine (BTH).
//!
//! The peer wire protocol itself lives behind this type; the control plane
//! only needs the active flag, the throughput history, the byte counters,
//! and a serialisable state dump.

use crate::core::bencode::Value;
use crate::core::metainfo::{InfoHash, MetaInfo};
use crate::core::throughput::SampleRing;

use super::BtError;

#[derive(Debug, Clone)]
pub struct TorrentHandler {
    metainfo: MetaInfo,
    active: bool,
    download_log: SampleRing,
    upload_log: SampleRing,
    /// Bytes moved during the current cycle, folded into the rings on tick.
    cycle_bytes_in: u64,
    cycle_bytes_out: u64,
    /// Lifetime counters, survive ring wraparound.
    content_bytes_in: u64,
    content_bytes_out: u64,
    download_complete: bool,
    /// Set when a tracker announce should go out at the next opportunity.
    announce_pending: bool,
}

impl TorrentHandler {
    pub fn new(metainfo: MetaInfo, active: bool, history_len: usize) -> TorrentHandler {
        TorrentHandler {
            metainfo,
            active,
            download_log: SampleRing::new(history_len),
            upload_log: SampleRing::new(history_len),
            cycle_bytes_in: 0,
            cycle_bytes_out: 0,
            content_bytes_in: 0,
            content_bytes_out: 0,
            download_complete: false,
            // An initially-active torrent announces as soon as it can.
            announce_pending: active,
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.metainfo.info_hash
    }

    pub fn metainfo(&self) -> &MetaInfo {
        &self.metainfo
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_complete(&self) -> bool {
        self.download_complete
    }

    pub fn start(&mut self) -> Result<(), BtError> {
        if self.active {
            return Err(BtError::AlreadyActive(self.info_hash()));
        }
        self.active = true;
        self.announce_pending = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), BtError> {
        if !self.active {
            return Err(BtError::AlreadyStopped(self.info_hash()));
        }
        self.active = false;
        self.announce_pending = false;
        Ok(())
    }

    /// Order an announce regardless of cached tracker intervals.
    pub fn force_reannounce(&mut self) {
        self.announce_pending = true;
    }

    pub fn announce_pending(&self) -> bool {
        self.announce_pending
    }

    pub fn record_download(&mut self, bytes: u64) {
        self.cycle_bytes_in += bytes;
        self.content_bytes_in += bytes;
    }

    pub fn record_upload(&mut self, bytes: u64) {
        self.cycle_bytes_out += bytes;
        self.content_bytes_out += bytes;
    }

    pub fn mark_complete(&mut self) {
        self.download_complete = true;
    }

    /// Close a throughput cycle: the accumulated counters become one sample
    /// in each ring.
    pub fn cycle_tick(&mut self) {
        self.download_log.push(self.cycle_bytes_in);
        self.upload_log.push(self.cycle_bytes_out);
        self.cycle_bytes_in = 0;
        self.cycle_bytes_out = 0;
    }

    pub fn download_log(&self) -> &SampleRing {
        &self.download_log
    }

    pub fn upload_log(&self) -> &SampleRing {
        &self.upload_log
    }

    /// Opaque state summary published as the `BTHDATA` payload and written
    /// by the archiver.
    pub fn state_dump(&self) -> Value {
        Value::dict(vec![
            (b"active".to_vec(), Value::Int(i64::from(self.active))),
            (
                b"announce pending".to_vec(),
                Value::Int(i64::from(self.announce_pending)),
            ),
            (
                b"basename".to_vec(),
                Value::str(&self.metainfo.basename),
            ),
            (
                b"content bytes in".to_vec(),
                Value::Int(clamp_i64(self.content_bytes_in)),
            ),
            (
                b"content bytes out".to_vec(),
                Value::Int(clamp_i64(self.content_bytes_out)),
            ),
            (
                b"download complete".to_vec(),
                Value::Int(i64::from(self.download_complete)),
            ),
            (
                b"info hash".to_vec(),
                Value::bytes(self.metainfo.info_hash.as_bytes().to_vec()),
            ),
            (
                b"length total".to_vec(),
                Value::Int(clamp_i64(self.metainfo.total_length)),
            ),
            (
                b"piece count".to_vec(),
                Value::Int(self.metainfo.piece_count() as i64),
            ),
            (
                b"piece length".to_vec(),
                Value::Int(clamp_i64(self.metainfo.piece_length)),
            ),
        ])
    }
}

fn clamp_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
