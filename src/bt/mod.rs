//! BT domain: the clients and torrent handlers the control plane publishes.
//!
//! The control plane treats this subsystem as the owner of the state it
//! snapshots and of the change signals it re-publishes to frontends.

mod archive;
mod client;
mod torrent;

use std::path::PathBuf;

use thiserror::Error;

use crate::config::{ClientConfig, Config};
use crate::core::metainfo::{InfoHash, MetaInfoError};

pub use archive::BthArchiver;
pub use client::{peer_id_generate, BtClient};
pub use torrent::TorrentHandler;

/// A domain state change the subscription bus re-publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainSignal {
    ClientCountChanged,
    TorrentSetChanged { client_idx: usize },
    ThroughputTick {
        client_idx: usize,
        down: Vec<Option<u64>>,
        up: Vec<Option<u64>>,
    },
    DownloadFinished {
        client_idx: usize,
        info_hash: InfoHash,
    },
}

#[derive(Debug, Error)]
pub enum BtError {
    #[error("no client with index {0}")]
    UnknownClient(usize),
    #[error("not tracking a torrent with info hash {0}")]
    UnknownTorrent(InfoHash),
    #[error("already tracking a torrent with info hash {0}")]
    DuplicateTorrent(InfoHash),
    #[error("torrent {0} is already active")]
    AlreadyActive(InfoHash),
    #[error("torrent {0} is already stopped")]
    AlreadyStopped(InfoHash),
    #[error("invalid metainfo: {0}")]
    MetaInfo(#[from] MetaInfoError),
    #[error("archive write to {path:?} failed: {source}")]
    Archive {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Container of BT clients, addressed by stable 0-based index.
#[derive(Debug)]
pub struct BtManager {
    clients: Vec<BtClient>,
    archiver: Option<BthArchiver>,
    /// Torrents that completed and were dropped; fed by download-finish
    /// signals and the drop path.
    finished_torrents: u64,
}

impl BtManager {
    pub fn new(clients: Vec<BtClient>, archiver: Option<BthArchiver>) -> BtManager {
        BtManager {
            clients,
            archiver,
            finished_torrents: 0,
        }
    }

    pub fn from_config(config: &Config) -> BtManager {
        let clients = config
            .effective_clients()
            .iter()
            .map(BtClient::from_config)
            .collect();
        let archiver = config
            .archive
            .resolved_dir()
            .map(BthArchiver::new);
        BtManager::new(clients, archiver)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, idx: usize) -> Result<&BtClient, BtError> {
        self.clients.get(idx).ok_or(BtError::UnknownClient(idx))
    }

    pub fn client_mut(&mut self, idx: usize) -> Result<&mut BtClient, BtError> {
        self.clients.get_mut(idx).ok_or(BtError::UnknownClient(idx))
    }

    pub fn clients(&self) -> &[BtClient] {
        &self.clients
    }

    /// Drop and archive one torrent. The handler must exist and be inactive.
    pub fn torrent_drop(
        &mut self,
        client_idx: usize,
        info_hash: &InfoHash,
    ) -> Result<(), BtError> {
        {
            let client = self.client(client_idx)?;
            let handler = client
                .torrent(info_hash)
                .ok_or(BtError::UnknownTorrent(*info_hash))?;
            if handler.is_active() {
                return Err(BtError::AlreadyActive(*info_hash));
            }
            if let Some(archiver) = &self.archiver {
                archiver.archive(handler)?;
            }
        }
        let dropped = self.client_mut(client_idx)?.torrent_drop(info_hash)?;
        if dropped.is_complete() {
            self.finished_torrents += 1;
        }
        Ok(())
    }

    pub fn note_download_finished(&mut self, client_idx: usize, info_hash: &InfoHash) {
        self.finished_torrents += 1;
        tracing::info!(client_idx, info_hash = %info_hash, "download finished");
    }

    pub fn finished_torrents(&self) -> u64 {
        self.finished_torrents
    }

    /// Rebuild the client list from a reloaded config. Returns true when the
    /// client set changed, which obligates the caller to invalidate every
    /// frontend's view.
    pub fn reconcile_clients(&mut self, configs: &[ClientConfig]) -> bool {
        let unchanged = self.clients.len() == configs.len()
            && self
                .clients
                .iter()
                .zip(configs)
                .all(|(client, config)| client.listen_port() == config.listen_port);
        if unchanged {
            return false;
        }
        self.clients = configs.iter().map(BtClient::from_config).collect();
        true
    }

    /// Test/maintenance path: drop one client outright.
    pub fn remove_client(&mut self, idx: usize) -> Result<(), BtError> {
        if idx >= self.clients.len() {
            return Err(BtError::UnknownClient(idx));
        }
        self.clients.remove(idx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metainfo::MetaInfo;
    use crate::core::testutil::single_file_torrent;

    fn manager_with_clients(n: usize) -> BtManager {
        let clients = (0..n)
            .map(|i| {
                BtClient::from_config(&ClientConfig {
                    listen_port: 6881 + i as u16,
                    ..ClientConfig::default()
                })
            })
            .collect();
        BtManager::new(clients, None)
    }

    #[test]
    fn client_lookup_checks_range() {
        let manager = manager_with_clients(2);
        assert_eq!(manager.client_count(), 2);
        assert!(manager.client(1).is_ok());
        assert!(matches!(manager.client(2), Err(BtError::UnknownClient(2))));
    }

    #[test]
    fn drop_requires_inactive_handler() {
        let mut manager = manager_with_clients(1);
        let mi = MetaInfo::from_benc_bytes(&single_file_torrent("x", 1)).unwrap();
        let hash = mi.info_hash;
        manager.client_mut(0).unwrap().torrent_add(mi, true).unwrap();

        assert!(matches!(
            manager.torrent_drop(0, &hash),
            Err(BtError::AlreadyActive(_))
        ));
        manager
            .client_mut(0)
            .unwrap()
            .torrent_mut(&hash)
            .unwrap()
            .stop()
            .unwrap();
        manager.torrent_drop(0, &hash).unwrap();
        assert!(matches!(
            manager.torrent_drop(0, &hash),
            Err(BtError::UnknownTorrent(_))
        ));
    }

    #[test]
    fn reconcile_reports_changes() {
        let mut manager = manager_with_clients(2);
        let same = vec![
            ClientConfig {
                listen_port: 6881,
                ..ClientConfig::default()
            },
            ClientConfig {
                listen_port: 6882,
                ..ClientConfig::default()
            },
        ];
        assert!(!manager.reconcile_clients(&same));
        assert!(manager.reconcile_clients(&same[..1]));
        assert_eq!(manager.client_count(), 1);
    }
}
