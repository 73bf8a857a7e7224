//! Daemon runner: bind, spawn the thread set, supervise signals.

use std::fs;
use std::net::TcpListener;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::Sender;

use crate::bt::BtManager;
use crate::config::{self, ClientConfig, Config};
use crate::Result;

use super::server::{
    run_acceptor, run_state_loop, AcceptorConfig, ControlListener, ServerEvent,
};
use super::state::ControlState;
use super::IpcError;

/// A running control plane: state thread plus acceptor.
pub struct ControlPlane {
    events: Sender<ServerEvent>,
    shutdown: Arc<AtomicBool>,
    state_handle: JoinHandle<()>,
    acceptor_handle: JoinHandle<()>,
}

impl ControlPlane {
    pub fn spawn(config: &Config, listener: ControlListener) -> ControlPlane {
        let state = ControlState::new(BtManager::from_config(config));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (events_tx, events_rx) = crossbeam::channel::unbounded();

        let state_handle = std::thread::spawn(move || run_state_loop(state, events_rx));

        let acceptor_events = events_tx.clone();
        let acceptor_shutdown = Arc::clone(&shutdown);
        let acceptor_config = AcceptorConfig {
            max_frame: config.control.max_frame,
            outbound_queue_frames: config.control.outbound_queue_frames,
        };
        let acceptor_handle = std::thread::spawn(move || {
            run_acceptor(listener, acceptor_events, acceptor_config, acceptor_shutdown)
        });

        ControlPlane {
            events: events_tx,
            shutdown,
            state_handle,
            acceptor_handle,
        }
    }

    /// Push a reconfigured client list into the state thread.
    pub fn reload_clients(&self, clients: Vec<ClientConfig>) {
        let _ = self.events.send(ServerEvent::ReloadClients(clients));
    }

    /// Drain and stop: connections flush their queued frames, then every
    /// thread winds down.
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.events.send(ServerEvent::Shutdown);
        drop(self.events);
        let _ = self.acceptor_handle.join();
        let _ = self.state_handle.join();
    }
}

/// Bind the configured control endpoint. Returns the listener and, for unix
/// sockets, the path to unlink on exit.
pub fn bind_listener(config: &Config) -> std::result::Result<(ControlListener, Option<PathBuf>), IpcError> {
    if let Some(addr) = &config.control.tcp_listen {
        let listener = TcpListener::bind(addr).map_err(|source| IpcError::Bind {
            endpoint: addr.clone(),
            source,
        })?;
        tracing::info!(%addr, "control plane listening on tcp");
        return Ok((ControlListener::Tcp(listener), None));
    }

    let path = config
        .control
        .socket_path
        .clone()
        .unwrap_or_else(config::default_socket_path);
    let endpoint = path.display().to_string();

    // A live daemon on the socket is a bind conflict; a dead one left a
    // stale file behind.
    if UnixStream::connect(&path).is_ok() {
        return Err(IpcError::Bind {
            endpoint,
            source: std::io::Error::new(
                std::io::ErrorKind::AddrInUse,
                "another daemon is already listening",
            ),
        });
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| IpcError::Bind {
            endpoint: endpoint.clone(),
            source,
        })?;
    }
    let _ = fs::remove_file(&path);

    let listener = UnixListener::bind(&path).map_err(|source| IpcError::Bind {
        endpoint: endpoint.clone(),
        source,
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o600));
    }
    tracing::info!(path = %endpoint, "control plane listening");
    Ok((ControlListener::Unix(listener), Some(path)))
}

/// Run the daemon in the current process until SIGTERM/SIGINT.
///
/// SIGHUP re-reads the config file and reconciles the client set.
pub fn run_daemon(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let (listener, socket_to_unlink) = bind_listener(&config)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let reload = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
        .map_err(IpcError::Io)?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
        .map_err(IpcError::Io)?;
    signal_hook::flag::register(signal_hook::consts::SIGHUP, Arc::clone(&reload))
        .map_err(IpcError::Io)?;

    let plane = ControlPlane::spawn(&config, listener);

    while !shutdown.load(Ordering::Relaxed) {
        if reload.swap(false, Ordering::Relaxed) {
            match config::load(config_path.as_deref()) {
                Ok(new_config) => {
                    tracing::info!("config reloaded");
                    plane.reload_clients(new_config.effective_clients());
                }
                Err(err) => {
                    tracing::warn!(%err, "config reload failed, keeping previous config");
                }
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    tracing::info!("shutdown signal received");
    plane.stop();

    if let Some(path) = socket_to_unlink {
        let _ = fs::remove_file(path);
    }
    tracing::info!("daemon stopped");
    Ok(())
}
