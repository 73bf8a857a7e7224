//! Daemon control plane: the framed, sequence-numbered, bencoded protocol
//! between this daemon and its frontends.

pub mod client;
mod connection;
mod facets;
pub mod run;
pub mod server;
pub mod snapshot;
mod state;

use thiserror::Error;

use crate::core::bencode::DecodeError;
use crate::core::frame::FrameError;

pub use client::ControlClient;
pub use connection::{ConnId, ConnPhase, Connection};
pub use facets::FacetClock;
pub use run::{bind_listener, run_daemon, ControlPlane};
pub use server::{ControlListener, ServerEvent};
pub use state::ControlState;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("failed to bind control endpoint {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },
    #[error("i/o error on control connection: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    #[error("undecodable server message: {0}")]
    Decode(#[from] DecodeError),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("connection closed by daemon")]
    Disconnected,
}
