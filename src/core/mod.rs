//! Pure protocol core: codecs and value types with no I/O.

pub mod bencode;
pub mod frame;
pub mod message;
pub mod metainfo;
pub mod seq;
pub mod throughput;

pub use bencode::{DecodeError, DecodeErrorKind, Value};
pub use frame::{encode_frame, Frame, FrameDecoder, FrameError, DEFAULT_MAX_FRAME};
pub use message::{Command, CommandParseError, Reply, RiskSet};
pub use metainfo::{InfoHash, MetaInfo, MetaInfoError};
pub use seq::SeqNum;
pub use throughput::SampleRing;

/// Lowercase hex of arbitrary bytes, for logs and display.
pub fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::bencode::Value;

    /// Minimal valid single-file torrent; the name determines the info hash.
    pub fn single_file_torrent(name: &str, piece_count: usize) -> Vec<u8> {
        let pieces: Vec<u8> = (0..piece_count).flat_map(|i| [i as u8; 20]).collect();
        Value::dict(vec![
            (
                b"announce".to_vec(),
                Value::str("http://tracker.example/announce"),
            ),
            (
                b"info".to_vec(),
                Value::dict(vec![
                    (b"length".to_vec(), Value::Int(65536)),
                    (b"name".to_vec(), Value::str(name)),
                    (b"piece length".to_vec(), Value::Int(32768)),
                    (b"pieces".to_vec(), Value::Bytes(pieces)),
                ]),
            ),
        ])
        .encode()
    }
}
