use thiserror::Error;

use crate::bt::BtError;
use crate::config::ConfigError;
use crate::core::bencode::DecodeError;
use crate::core::metainfo::MetaInfoError;
use crate::daemon::IpcError;

/// Crate-level convenience error: a thin wrapper over the subsystem errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    MetaInfo(#[from] MetaInfoError),

    #[error(transparent)]
    Bt(#[from] BtError),

    #[error(transparent)]
    Ipc(#[from] IpcError),

    /// Failures of the thin command-line tools (verification mismatches,
    /// unexpected daemon replies).
    #[error("{0}")]
    Tool(String),
}

impl Error {
    /// Process exit code for this failure: config problems exit 1, bind
    /// conflicts exit 2, everything else 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Ipc(IpcError::Bind { .. }) => 2,
            _ => 1,
        }
    }
}
