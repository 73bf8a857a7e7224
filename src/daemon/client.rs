//! Frontend-side control connection.
//!
//! Thin helper used by the CLI and the integration tests: frames outbound
//! commands with the last observed server seq, reassembles inbound frames,
//! and skips unsolicited traffic when correlating a reply.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::core::bencode::{self, Value};
use crate::core::frame::{encode_frame, FrameDecoder, DEFAULT_MAX_FRAME};
use crate::core::seq::SeqNum;

use super::IpcError;

/// Tags the server may send without being asked.
const UNSOLICITED: &[&str] = &[
    "INVALIDCLIENTCOUNT",
    "INVALIDCLIENTTORRENTS",
    "BTHTHROUGHPUTSLICE",
    "UNSUBSCRIBE",
];

pub struct ControlClient<S> {
    stream: S,
    decoder: FrameDecoder,
    last_server_seq: SeqNum,
}

impl ControlClient<UnixStream> {
    pub fn connect_unix(path: &Path) -> Result<ControlClient<UnixStream>, IpcError> {
        let stream = UnixStream::connect(path)?;
        Ok(ControlClient::new(stream))
    }
}

impl<S: Read + Write> ControlClient<S> {
    pub fn new(stream: S) -> ControlClient<S> {
        ControlClient {
            stream,
            decoder: FrameDecoder::new(DEFAULT_MAX_FRAME),
            last_server_seq: SeqNum::ZERO,
        }
    }

    /// Last `server_seq` observed on this connection; echoed on every
    /// outbound frame.
    pub fn last_server_seq(&self) -> SeqNum {
        self.last_server_seq
    }

    /// Send one command list.
    pub fn send(&mut self, items: Vec<Value>) -> Result<(), IpcError> {
        let payload = Value::List(items).encode();
        let frame = encode_frame(self.last_server_seq, &payload);
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Send a liveness NOOP (empty frame).
    pub fn send_noop(&mut self) -> Result<(), IpcError> {
        let frame = encode_frame(self.last_server_seq, b"");
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Blocking read of the next server message, unsolicited or not.
    pub fn read_message(&mut self) -> Result<Vec<Value>, IpcError> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                self.last_server_seq = frame.seq;
                if frame.payload.is_empty() {
                    continue;
                }
                let value = bencode::decode(&frame.payload)?;
                let Value::List(items) = value else {
                    return Err(IpcError::Protocol(
                        "server message is not a list".to_string(),
                    ));
                };
                if items.first().and_then(Value::as_bytes).is_none() {
                    return Err(IpcError::Protocol(
                        "server message has no type tag".to_string(),
                    ));
                }
                return Ok(items);
            }
            let mut buf = [0u8; 8192];
            let n = self.stream.read(&mut buf)?;
            if n == 0 {
                return Err(IpcError::Disconnected);
            }
            self.decoder.extend(&buf[..n]);
        }
    }

    /// Send a command and return its reply, skipping unsolicited messages.
    pub fn request(&mut self, tag: &str, args: Vec<Value>) -> Result<Vec<Value>, IpcError> {
        let mut items = vec![Value::str(tag)];
        items.extend(args);
        self.send(items)?;
        loop {
            let reply = self.read_message()?;
            let reply_tag = reply
                .first()
                .and_then(Value::as_bytes)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            if UNSOLICITED.contains(&reply_tag.as_str()) {
                tracing::debug!(tag = %reply_tag, "unsolicited message while awaiting reply");
                continue;
            }
            return Ok(reply);
        }
    }
}

pub fn message_tag(items: &[Value]) -> String {
    items
        .first()
        .and_then(Value::as_bytes)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default()
}
