//! Read-side projections of domain state into wire payloads.
//!
//! Pure lookups; every function runs on the state thread while the domain is
//! quiescent, so each reply is a consistent snapshot.

use crate::bt::{BtError, BtManager};
use crate::core::message::Reply;
use crate::core::metainfo::InfoHash;

pub fn client_count(manager: &BtManager) -> Reply {
    Reply::ClientCount {
        count: manager.client_count(),
    }
}

pub fn client_data(manager: &BtManager, client_idx: usize) -> Result<Reply, BtError> {
    let client = manager.client(client_idx)?;
    Ok(Reply::ClientData {
        client_idx,
        data: client.state_dump(),
    })
}

pub fn client_torrents(manager: &BtManager, client_idx: usize) -> Result<Reply, BtError> {
    let client = manager.client(client_idx)?;
    Ok(Reply::ClientTorrents {
        client_idx,
        info_hashes: client.info_hashes(),
    })
}

pub fn bth_data(
    manager: &BtManager,
    client_idx: usize,
    info_hash: &InfoHash,
) -> Result<Reply, BtError> {
    let client = manager.client(client_idx)?;
    let handler = client
        .torrent(info_hash)
        .ok_or(BtError::UnknownTorrent(*info_hash))?;
    Ok(Reply::BthData {
        client_idx,
        info_hash: *info_hash,
        data: handler.state_dump(),
    })
}

pub fn bth_throughput(
    manager: &BtManager,
    client_idx: usize,
    info_hash: &InfoHash,
    max_history: usize,
) -> Result<Reply, BtError> {
    let client = manager.client(client_idx)?;
    let handler = client
        .torrent(info_hash)
        .ok_or(BtError::UnknownTorrent(*info_hash))?;
    Ok(Reply::BthThroughput {
        client_idx,
        info_hash: *info_hash,
        down_cycle_ms: client.cycle_ms(),
        down: handler.download_log().recent(max_history),
        up_cycle_ms: client.cycle_ms(),
        up: handler.upload_log().recent(max_history),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bt::BtClient;
    use crate::config::ClientConfig;
    use crate::core::bencode::Value;
    use crate::core::metainfo::MetaInfo;
    use crate::core::testutil::single_file_torrent;

    fn manager() -> (BtManager, InfoHash) {
        let mut client = BtClient::from_config(&ClientConfig::default());
        let mi = MetaInfo::from_benc_bytes(&single_file_torrent("snap", 1)).unwrap();
        let hash = mi.info_hash;
        client.torrent_add(mi, true).unwrap();
        (BtManager::new(vec![client], None), hash)
    }

    #[test]
    fn count_projection() {
        let (manager, _) = manager();
        assert_eq!(client_count(&manager), Reply::ClientCount { count: 1 });
    }

    #[test]
    fn torrents_projection_lists_hashes() {
        let (manager, hash) = manager();
        let reply = client_torrents(&manager, 0).unwrap();
        assert_eq!(
            reply,
            Reply::ClientTorrents {
                client_idx: 0,
                info_hashes: vec![hash],
            }
        );
    }

    #[test]
    fn data_projections_reject_unknown_entities() {
        let (manager, hash) = manager();
        assert!(matches!(
            client_data(&manager, 9),
            Err(BtError::UnknownClient(9))
        ));
        let missing = InfoHash::from_bytes(&[0xee; 20]).unwrap();
        assert!(matches!(
            bth_data(&manager, 0, &missing),
            Err(BtError::UnknownTorrent(_))
        ));
        assert!(bth_data(&manager, 0, &hash).is_ok());
    }

    #[test]
    fn throughput_projection_truncates_history() {
        let (mut manager, hash) = manager();
        {
            let handler = manager.client_mut(0).unwrap().torrent_mut(&hash).unwrap();
            for i in 0..5 {
                handler.record_download(i * 10);
                handler.cycle_tick();
            }
        }
        let reply = bth_throughput(&manager, 0, &hash, 2).unwrap();
        match reply {
            Reply::BthThroughput {
                down,
                up,
                down_cycle_ms,
                ..
            } => {
                assert_eq!(down, vec![Some(30), Some(40)]);
                assert_eq!(up.len(), 2);
                assert_eq!(down_cycle_ms, 1000);
            }
            other => panic!("wrong reply {other:?}"),
        }
    }

    #[test]
    fn bth_data_payload_is_opaque_dict() {
        let (manager, hash) = manager();
        let reply = bth_data(&manager, 0, &hash).unwrap();
        match reply {
            Reply::BthData { data, .. } => {
                assert!(data.as_dict().is_some());
                assert_eq!(data.get(b"active"), Some(&Value::Int(1)));
            }
            other => panic!("wrong reply {other:?}"),
        }
    }
}
