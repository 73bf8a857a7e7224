use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::frame::DEFAULT_MAX_FRAME;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub control: ControlConfig,
    pub logging: LoggingConfig,
    pub archive: ArchiveConfig,
    pub clients: Vec<ClientConfig>,
}

impl Config {
    /// Client entries with the single-client fallback applied: a config with
    /// no `[[clients]]` section still yields a usable daemon.
    pub fn effective_clients(&self) -> Vec<ClientConfig> {
        if self.clients.is_empty() {
            vec![ClientConfig::default()]
        } else {
            self.clients.clone()
        }
    }
}

/// Control-plane endpoint and resource ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    /// Filesystem-scoped stream socket. Defaults to a per-user runtime dir.
    pub socket_path: Option<PathBuf>,
    /// Optional TCP endpoint instead of the unix socket. Carries no auth;
    /// only for trusted networks.
    pub tcp_listen: Option<String>,
    /// Per-frame payload cap; an oversize header is fatal for its connection.
    pub max_frame: u32,
    /// Outbound queue depth per connection, in frames. A frontend that lags
    /// this far behind is dropped.
    pub outbound_queue_frames: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        ControlConfig {
            socket_path: None,
            tcp_listen: None,
            max_frame: DEFAULT_MAX_FRAME,
            outbound_queue_frames: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub stderr: bool,
    /// Rolling daily log files under this directory, if set.
    pub file_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            stderr: true,
            file_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            enabled: true,
            dir: None,
        }
    }
}

impl ArchiveConfig {
    /// Archive directory to use, or None when archiving is off.
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        Some(
            self.dir
                .clone()
                .unwrap_or_else(|| super::load::data_dir().join("archive")),
        )
    }
}

/// One BT client hosted by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub listen_port: u16,
    /// Throughput slice length in milliseconds.
    pub throughput_cycle_ms: u64,
    /// Ring length, in slices, of the per-torrent throughput history.
    pub throughput_history: usize,
    pub download_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            listen_port: 6881,
            throughput_cycle_ms: 1000,
            throughput_history: 1000,
            download_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_one_effective_client() {
        let config = Config::default();
        let clients = config.effective_clients();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].listen_port, 6881);
        assert_eq!(clients[0].throughput_cycle_ms, 1000);
    }

    #[test]
    fn parses_full_config() {
        let text = r#"
            [control]
            socket_path = "/run/liasis/control.sock"
            max_frame = 65536
            outbound_queue_frames = 64

            [logging]
            stderr = false

            [archive]
            enabled = false

            [[clients]]
            listen_port = 6900
            throughput_cycle_ms = 500
            throughput_history = 120

            [[clients]]
            listen_port = 6901
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(
            config.control.socket_path,
            Some(PathBuf::from("/run/liasis/control.sock"))
        );
        assert_eq!(config.control.max_frame, 65536);
        assert!(!config.logging.stderr);
        assert_eq!(config.archive.resolved_dir(), None);
        assert_eq!(config.clients.len(), 2);
        assert_eq!(config.clients[0].throughput_history, 120);
        assert_eq!(config.clients[1].listen_port, 6901);
        assert_eq!(config.clients[1].throughput_cycle_ms, 1000);
    }

    #[test]
    fn rejects_unknown_fields() {
        let text = r#"
            [control]
            socket = "/tmp/x"
        "#;
        assert!(toml::from_str::<Config>(text).is_err());
    }
}
