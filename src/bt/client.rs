//! BT client (BTC): a set of torrent handlers sharing a peer identity and a
//! listening port.

use std::collections::BTreeMap;

use rand::Rng;

use crate::config::ClientConfig;
use crate::core::bencode::Value;
use crate::core::metainfo::{InfoHash, MetaInfo};

use super::torrent::TorrentHandler;
use super::BtError;

const PEER_ID_PREFIX: &[u8; 8] = b"-LI0300-";

/// Random peer id with the client's fixed prefix; the tail stays printable
/// so it survives logs and tracker query strings.
pub fn peer_id_generate() -> [u8; 20] {
    const TAIL_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let mut id = [0u8; 20];
    id[..PEER_ID_PREFIX.len()].copy_from_slice(PEER_ID_PREFIX);
    for slot in id[PEER_ID_PREFIX.len()..].iter_mut() {
        *slot = TAIL_CHARSET[rng.gen_range(0..TAIL_CHARSET.len())];
    }
    id
}

#[derive(Debug, Clone)]
pub struct BtClient {
    peer_id: [u8; 20],
    listen_port: u16,
    cycle_ms: u64,
    history_len: usize,
    torrents: BTreeMap<InfoHash, TorrentHandler>,
}

impl BtClient {
    pub fn from_config(config: &ClientConfig) -> BtClient {
        BtClient {
            peer_id: peer_id_generate(),
            listen_port: config.listen_port,
            cycle_ms: config.throughput_cycle_ms,
            history_len: config.throughput_history,
            torrents: BTreeMap::new(),
        }
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn cycle_ms(&self) -> u64 {
        self.cycle_ms
    }

    pub fn torrent_count(&self) -> usize {
        self.torrents.len()
    }

    pub fn torrent(&self, info_hash: &InfoHash) -> Option<&TorrentHandler> {
        self.torrents.get(info_hash)
    }

    pub fn torrent_mut(&mut self, info_hash: &InfoHash) -> Option<&mut TorrentHandler> {
        self.torrents.get_mut(info_hash)
    }

    /// Tracked info hashes in ascending order. Slice payloads and
    /// `CLIENTTORRENTS` both rely on this ordering.
    pub fn info_hashes(&self) -> Vec<InfoHash> {
        self.torrents.keys().copied().collect()
    }

    pub fn torrent_add(
        &mut self,
        metainfo: MetaInfo,
        active: bool,
    ) -> Result<&mut TorrentHandler, BtError> {
        let info_hash = metainfo.info_hash;
        if self.torrents.contains_key(&info_hash) {
            return Err(BtError::DuplicateTorrent(info_hash));
        }
        let handler = TorrentHandler::new(metainfo, active, self.history_len);
        Ok(self.torrents.entry(info_hash).or_insert(handler))
    }

    pub fn torrent_drop(&mut self, info_hash: &InfoHash) -> Result<TorrentHandler, BtError> {
        self.torrents
            .remove(info_hash)
            .ok_or(BtError::UnknownTorrent(*info_hash))
    }

    /// Queue an immediate tracker announce on every active handler,
    /// ignoring cached intervals. Returns how many were ordered.
    pub fn reannounce_all(&mut self) -> usize {
        let mut ordered = 0;
        for handler in self.torrents.values_mut() {
            if handler.is_active() {
                handler.force_reannounce();
                ordered += 1;
            }
        }
        ordered
    }

    /// Close one throughput cycle for every handler and return the newest
    /// sample per ring, in ascending info-hash order.
    pub fn cycle_tick(&mut self) -> (Vec<Option<u64>>, Vec<Option<u64>>) {
        let mut down = Vec::with_capacity(self.torrents.len());
        let mut up = Vec::with_capacity(self.torrents.len());
        for handler in self.torrents.values_mut() {
            handler.cycle_tick();
            down.push(handler.download_log().latest());
            up.push(handler.upload_log().latest());
        }
        (down, up)
    }

    /// Opaque state summary published as the `CLIENTDATA` payload.
    pub fn state_dump(&self) -> Value {
        Value::dict(vec![
            (
                b"cycle length ms".to_vec(),
                Value::Int(i64::try_from(self.cycle_ms).unwrap_or(i64::MAX)),
            ),
            (
                b"listen port".to_vec(),
                Value::Int(i64::from(self.listen_port)),
            ),
            (b"peer id".to_vec(), Value::bytes(self.peer_id.to_vec())),
            (
                b"torrent count".to_vec(),
                Value::Int(self.torrents.len() as i64),
            ),
            (
                b"torrents active".to_vec(),
                Value::Int(
                    self.torrents.values().filter(|t| t.is_active()).count() as i64
                ),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::single_file_torrent;

    fn client() -> BtClient {
        BtClient::from_config(&ClientConfig::default())
    }

    fn metainfo(name: &str) -> MetaInfo {
        MetaInfo::from_benc_bytes(&single_file_torrent(name, 1)).unwrap()
    }

    #[test]
    fn peer_id_has_prefix_and_printable_tail() {
        let id = peer_id_generate();
        assert_eq!(&id[..8], PEER_ID_PREFIX);
        assert!(id[8..].iter().all(u8::is_ascii_alphanumeric));
    }

    #[test]
    fn add_and_drop_torrents() {
        let mut btc = client();
        let mi = metainfo("a");
        let hash = mi.info_hash;
        btc.torrent_add(mi.clone(), false).unwrap();
        assert_eq!(btc.torrent_count(), 1);
        assert!(matches!(
            btc.torrent_add(mi, true),
            Err(BtError::DuplicateTorrent(_))
        ));
        btc.torrent_drop(&hash).unwrap();
        assert!(matches!(
            btc.torrent_drop(&hash),
            Err(BtError::UnknownTorrent(_))
        ));
    }

    #[test]
    fn reannounce_counts_only_active_handlers() {
        let mut btc = client();
        btc.torrent_add(metainfo("a"), true).unwrap();
        btc.torrent_add(metainfo("b"), false).unwrap();
        assert_eq!(btc.reannounce_all(), 1);
    }

    #[test]
    fn cycle_tick_orders_samples_by_info_hash() {
        let mut btc = client();
        let first = metainfo("a");
        let second = metainfo("b");
        let hashes = {
            let mut hashes = vec![first.info_hash, second.info_hash];
            hashes.sort();
            hashes
        };
        btc.torrent_add(first, true).unwrap();
        btc.torrent_add(second, true).unwrap();
        btc.torrent_mut(&hashes[0]).unwrap().record_download(11);
        btc.torrent_mut(&hashes[1]).unwrap().record_download(22);

        let (down, up) = btc.cycle_tick();
        assert_eq!(down, vec![Some(11), Some(22)]);
        assert_eq!(up, vec![Some(0), Some(0)]);
        assert_eq!(btc.info_hashes(), hashes);
    }
}
