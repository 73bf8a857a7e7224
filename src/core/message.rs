//! Control-protocol messages.
//!
//! A message is a bencoded list whose head is a byte-string type tag; the
//! tail holds positional arguments. [`Command`] covers the client-to-server
//! vocabulary, [`Reply`] the server-to-client one. Replies that answer a
//! command embed the received list so clients can correlate without a
//! request id: `COMMANDOK`-family replies splice the original elements into
//! their tail, `ARGERROR`/`COMMANDFAIL` nest the original list as a single
//! element ahead of the diagnostics, and `BENCERROR` echoes the raw bytes
//! that failed to decode.

use thiserror::Error;

use super::bencode::Value;
use super::metainfo::{InfoHash, INFO_HASH_LEN};

/// One state facet a command's semantics may depend on. The guard combines
/// these with the command's own `client_idx`/`info_hash` arguments to find
/// the facet instances to test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskSet {
    pub client_count: bool,
    pub bth_set: bool,
    pub bth_active: bool,
}

impl RiskSet {
    pub const NONE: RiskSet = RiskSet {
        client_count: false,
        bth_set: false,
        bth_active: false,
    };
    pub const CLIENT_COUNT: RiskSet = RiskSet {
        client_count: true,
        bth_set: false,
        bth_active: false,
    };
    /// `DROPBTH` depends on everything: the client set, the target client's
    /// torrent set, and the target torrent's active flag.
    pub const DROP: RiskSet = RiskSet {
        client_count: true,
        bth_set: true,
        bth_active: true,
    };

    pub fn is_empty(&self) -> bool {
        !(self.client_count || self.bth_set || self.bth_active)
    }
}

/// A decoded client-to-server command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    BuildBthFromMetaInfo {
        client_idx: usize,
        metainfo: Vec<u8>,
        active: bool,
    },
    DropBth {
        client_idx: usize,
        info_hash: InfoHash,
    },
    ForceBtcReannounce {
        client_idx: usize,
    },
    GetBthData {
        client_idx: usize,
        info_hash: InfoHash,
    },
    GetBthThroughput {
        client_idx: usize,
        info_hash: InfoHash,
        max_history: usize,
    },
    GetClientCount,
    GetClientData {
        client_idx: usize,
    },
    GetClientTorrents {
        client_idx: usize,
    },
    StartBth {
        client_idx: usize,
        info_hash: InfoHash,
    },
    StopBth {
        client_idx: usize,
        info_hash: InfoHash,
    },
    SubscribeBthThroughput {
        client_idx: usize,
    },
    UnsubscribeBthThroughput {
        client_idx: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("unknown command tag")]
    UnknownTag,
    /// Wrong arity or argument type; the message becomes the `ARGERROR`
    /// diagnostic.
    #[error("{0}")]
    Args(String),
}

impl Command {
    /// Parse a decoded message list (tag plus arguments).
    ///
    /// The caller has already verified the outer shape: non-empty list with
    /// a byte-string head.
    pub fn parse(items: &[Value]) -> Result<Command, CommandParseError> {
        let tag = items
            .first()
            .and_then(Value::as_bytes)
            .ok_or(CommandParseError::UnknownTag)?;
        let args = &items[1..];
        match tag {
            b"BUILDBTHFROMMETAINFO" => {
                expect_arity(args, 3)?;
                Ok(Command::BuildBthFromMetaInfo {
                    client_idx: arg_client_idx(args, 0)?,
                    metainfo: arg_bytes(args, 1)?.to_vec(),
                    active: arg_bool(args, 2)?,
                })
            }
            b"DROPBTH" => {
                expect_arity(args, 2)?;
                Ok(Command::DropBth {
                    client_idx: arg_client_idx(args, 0)?,
                    info_hash: arg_info_hash(args, 1)?,
                })
            }
            b"FORCEBTCREANNOUNCE" => {
                expect_arity(args, 1)?;
                Ok(Command::ForceBtcReannounce {
                    client_idx: arg_client_idx(args, 0)?,
                })
            }
            b"GETBTHDATA" => {
                expect_arity(args, 2)?;
                Ok(Command::GetBthData {
                    client_idx: arg_client_idx(args, 0)?,
                    info_hash: arg_info_hash(args, 1)?,
                })
            }
            b"GETBTHTHROUGHPUT" => {
                expect_arity(args, 3)?;
                Ok(Command::GetBthThroughput {
                    client_idx: arg_client_idx(args, 0)?,
                    info_hash: arg_info_hash(args, 1)?,
                    max_history: arg_nn_int(args, 2)?,
                })
            }
            b"GETCLIENTCOUNT" => {
                expect_arity(args, 0)?;
                Ok(Command::GetClientCount)
            }
            b"GETCLIENTDATA" => {
                expect_arity(args, 1)?;
                Ok(Command::GetClientData {
                    client_idx: arg_client_idx(args, 0)?,
                })
            }
            b"GETCLIENTTORRENTS" => {
                expect_arity(args, 1)?;
                Ok(Command::GetClientTorrents {
                    client_idx: arg_client_idx(args, 0)?,
                })
            }
            b"STARTBTH" => {
                expect_arity(args, 2)?;
                Ok(Command::StartBth {
                    client_idx: arg_client_idx(args, 0)?,
                    info_hash: arg_info_hash(args, 1)?,
                })
            }
            b"STOPBTH" => {
                expect_arity(args, 2)?;
                Ok(Command::StopBth {
                    client_idx: arg_client_idx(args, 0)?,
                    info_hash: arg_info_hash(args, 1)?,
                })
            }
            b"SUBSCRIBEBTHTHROUGHPUT" => {
                expect_arity(args, 1)?;
                Ok(Command::SubscribeBthThroughput {
                    client_idx: arg_client_idx(args, 0)?,
                })
            }
            b"UNSUBSCRIBEBTHTHROUGHPUT" => {
                expect_arity(args, 1)?;
                Ok(Command::UnsubscribeBthThroughput {
                    client_idx: arg_client_idx(args, 0)?,
                })
            }
            _ => Err(CommandParseError::UnknownTag),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Command::BuildBthFromMetaInfo { .. } => "BUILDBTHFROMMETAINFO",
            Command::DropBth { .. } => "DROPBTH",
            Command::ForceBtcReannounce { .. } => "FORCEBTCREANNOUNCE",
            Command::GetBthData { .. } => "GETBTHDATA",
            Command::GetBthThroughput { .. } => "GETBTHTHROUGHPUT",
            Command::GetClientCount => "GETCLIENTCOUNT",
            Command::GetClientData { .. } => "GETCLIENTDATA",
            Command::GetClientTorrents { .. } => "GETCLIENTTORRENTS",
            Command::StartBth { .. } => "STARTBTH",
            Command::StopBth { .. } => "STOPBTH",
            Command::SubscribeBthThroughput { .. } => "SUBSCRIBEBTHTHROUGHPUT",
            Command::UnsubscribeBthThroughput { .. } => "UNSUBSCRIBEBTHTHROUGHPUT",
        }
    }

    /// State facets this command's semantics depend on.
    pub fn risks(&self) -> RiskSet {
        match self {
            Command::GetClientCount => RiskSet::NONE,
            Command::DropBth { .. } => RiskSet::DROP,
            _ => RiskSet::CLIENT_COUNT,
        }
    }

    /// The client index the command addresses, if any.
    pub fn client_idx(&self) -> Option<usize> {
        match self {
            Command::GetClientCount => None,
            Command::BuildBthFromMetaInfo { client_idx, .. }
            | Command::DropBth { client_idx, .. }
            | Command::ForceBtcReannounce { client_idx }
            | Command::GetBthData { client_idx, .. }
            | Command::GetBthThroughput { client_idx, .. }
            | Command::GetClientData { client_idx }
            | Command::GetClientTorrents { client_idx }
            | Command::StartBth { client_idx, .. }
            | Command::StopBth { client_idx, .. }
            | Command::SubscribeBthThroughput { client_idx }
            | Command::UnsubscribeBthThroughput { client_idx } => Some(*client_idx),
        }
    }

    /// The info hash the command addresses, if any.
    pub fn info_hash(&self) -> Option<&InfoHash> {
        match self {
            Command::DropBth { info_hash, .. }
            | Command::GetBthData { info_hash, .. }
            | Command::GetBthThroughput { info_hash, .. }
            | Command::StartBth { info_hash, .. }
            | Command::StopBth { info_hash, .. } => Some(info_hash),
            _ => None,
        }
    }
}

fn expect_arity(args: &[Value], want: usize) -> Result<(), CommandParseError> {
    if args.len() != want {
        return Err(CommandParseError::Args(format!(
            "expected {want} arguments, got {}",
            args.len()
        )));
    }
    Ok(())
}

fn arg_nn_int(args: &[Value], idx: usize) -> Result<usize, CommandParseError> {
    let n = args[idx]
        .as_int()
        .ok_or_else(|| CommandParseError::Args(format!("argument {idx}: expected an integer")))?;
    usize::try_from(n).map_err(|_| {
        CommandParseError::Args(format!("argument {idx}: expected an integer >= 0, got {n}"))
    })
}

fn arg_client_idx(args: &[Value], idx: usize) -> Result<usize, CommandParseError> {
    arg_nn_int(args, idx)
}

fn arg_bytes<'a>(args: &'a [Value], idx: usize) -> Result<&'a [u8], CommandParseError> {
    args[idx]
        .as_bytes()
        .ok_or_else(|| CommandParseError::Args(format!("argument {idx}: expected a byte string")))
}

fn arg_bool(args: &[Value], idx: usize) -> Result<bool, CommandParseError> {
    match args[idx].as_int() {
        Some(0) => Ok(false),
        Some(1) => Ok(true),
        Some(n) => Err(CommandParseError::Args(format!(
            "argument {idx}: expected 0 or 1, got {n}"
        ))),
        None => Err(CommandParseError::Args(format!(
            "argument {idx}: expected 0 or 1"
        ))),
    }
}

fn arg_info_hash(args: &[Value], idx: usize) -> Result<InfoHash, CommandParseError> {
    let bytes = arg_bytes(args, idx)?;
    InfoHash::from_bytes(bytes).ok_or_else(|| {
        CommandParseError::Args(format!(
            "argument {idx}: expected a {INFO_HASH_LEN}-byte info hash, got {} bytes",
            bytes.len()
        ))
    })
}

/// A server-to-client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    ArgError {
        original: Vec<Value>,
        message: String,
    },
    BencError {
        original: Vec<u8>,
    },
    UnknownCmd {
        original: Vec<Value>,
    },
    RcRej {
        original: Vec<Value>,
    },
    CommandOk {
        original: Vec<Value>,
    },
    CommandNoop {
        original: Vec<Value>,
    },
    CommandFail {
        original: Vec<Value>,
        message: String,
        extra: Option<Value>,
    },
    ClientCount {
        count: usize,
    },
    ClientData {
        client_idx: usize,
        data: Value,
    },
    ClientTorrents {
        client_idx: usize,
        info_hashes: Vec<InfoHash>,
    },
    BthData {
        client_idx: usize,
        info_hash: InfoHash,
        data: Value,
    },
    BthThroughput {
        client_idx: usize,
        info_hash: InfoHash,
        down_cycle_ms: u64,
        down: Vec<Option<u64>>,
        up_cycle_ms: u64,
        up: Vec<Option<u64>>,
    },
    BthThroughputSlice {
        client_idx: usize,
        down: Vec<Option<u64>>,
        up: Vec<Option<u64>>,
    },
    InvalidClientCount,
    InvalidClientTorrents {
        client_idx: usize,
    },
    Unsubscribe {
        client_idx: usize,
    },
}

impl Reply {
    pub fn tag(&self) -> &'static str {
        match self {
            Reply::ArgError { .. } => "ARGERROR",
            Reply::BencError { .. } => "BENCERROR",
            Reply::UnknownCmd { .. } => "UNKNOWNCMD",
            Reply::RcRej { .. } => "RCREJ",
            Reply::CommandOk { .. } => "COMMANDOK",
            Reply::CommandNoop { .. } => "COMMANDNOOP",
            Reply::CommandFail { .. } => "COMMANDFAIL",
            Reply::ClientCount { .. } => "CLIENTCOUNT",
            Reply::ClientData { .. } => "CLIENTDATA",
            Reply::ClientTorrents { .. } => "CLIENTTORRENTS",
            Reply::BthData { .. } => "BTHDATA",
            Reply::BthThroughput { .. } => "BTHTHROUGHPUT",
            Reply::BthThroughputSlice { .. } => "BTHTHROUGHPUTSLICE",
            Reply::InvalidClientCount => "INVALIDCLIENTCOUNT",
            Reply::InvalidClientTorrents { .. } => "INVALIDCLIENTTORRENTS",
            Reply::Unsubscribe { .. } => "UNSUBSCRIBE",
        }
    }

    pub fn to_value(&self) -> Value {
        let mut items = vec![Value::str(self.tag())];
        match self {
            Reply::ArgError { original, message } => {
                items.push(Value::List(original.clone()));
                items.push(Value::str(message));
            }
            Reply::BencError { original } => {
                items.push(Value::Bytes(original.clone()));
            }
            Reply::UnknownCmd { original }
            | Reply::RcRej { original }
            | Reply::CommandOk { original }
            | Reply::CommandNoop { original } => {
                items.extend(original.iter().cloned());
            }
            Reply::CommandFail {
                original,
                message,
                extra,
            } => {
                items.push(Value::List(original.clone()));
                items.push(Value::str(message));
                if let Some(extra) = extra {
                    items.push(extra.clone());
                }
            }
            Reply::ClientCount { count } => {
                items.push(int(*count));
            }
            Reply::ClientData { client_idx, data } => {
                items.push(int(*client_idx));
                items.push(data.clone());
            }
            Reply::ClientTorrents {
                client_idx,
                info_hashes,
            } => {
                items.push(int(*client_idx));
                items.push(Value::List(
                    info_hashes
                        .iter()
                        .map(|h| Value::bytes(h.as_bytes().to_vec()))
                        .collect(),
                ));
            }
            Reply::BthData {
                client_idx,
                info_hash,
                data,
            } => {
                items.push(int(*client_idx));
                items.push(Value::bytes(info_hash.as_bytes().to_vec()));
                items.push(data.clone());
            }
            Reply::BthThroughput {
                client_idx,
                info_hash,
                down_cycle_ms,
                down,
                up_cycle_ms,
                up,
            } => {
                items.push(int(*client_idx));
                items.push(Value::bytes(info_hash.as_bytes().to_vec()));
                items.push(int_u64(*down_cycle_ms));
                items.push(samples(down));
                items.push(int_u64(*up_cycle_ms));
                items.push(samples(up));
            }
            Reply::BthThroughputSlice {
                client_idx,
                down,
                up,
            } => {
                items.push(int(*client_idx));
                items.push(samples(down));
                items.push(samples(up));
            }
            Reply::InvalidClientCount => {}
            Reply::InvalidClientTorrents { client_idx } | Reply::Unsubscribe { client_idx } => {
                items.push(int(*client_idx));
            }
        }
        Value::List(items)
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_value().encode()
    }
}

fn int(n: usize) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

fn int_u64(n: u64) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

/// History samples on the wire: unfilled slots become `-1`.
fn samples(history: &[Option<u64>]) -> Value {
    Value::List(
        history
            .iter()
            .map(|sample| match sample {
                Some(v) => int_u64(*v),
                None => Value::Int(-1),
            })
            .collect(),
    )
}
