//! Control-protocol framing.
//!
//! Wire layout: `|data_len: u32 BE|seq_num: u32 BE|data: byte[data_len]|`.
//! A frame with `data_len == 0` is a liveness NOOP and carries no payload.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use super::seq::SeqNum;

pub const HEADER_LEN: usize = 8;

/// Default cap on a single frame's payload. Control traffic is small; a
/// metainfo upload is the largest legitimate payload.
pub const DEFAULT_MAX_FRAME: u32 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: SeqNum,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Advertised payload length exceeds the configured cap. Fatal for the
    /// connection: the stream position past the header is unknowable without
    /// buffering the oversize payload.
    #[error("frame of {len} bytes exceeds cap of {max} bytes")]
    Oversize { len: u32, max: u32 },
}

/// Incremental frame reader. Feed raw stream bytes in, pull frames out.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame: u32,
}

impl FrameDecoder {
    pub fn new(max_frame: u32) -> FrameDecoder {
        FrameDecoder {
            buf: BytesMut::with_capacity(4096),
            max_frame,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, `Ok(None)` when more bytes are needed.
    ///
    /// An `Err` poisons the stream; the caller must drop the connection.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let data_len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        let seq_num = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]);
        if data_len > self.max_frame {
            return Err(FrameError::Oversize {
                len: data_len,
                max: self.max_frame,
            });
        }
        let total = HEADER_LEN + data_len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(data_len as usize).freeze();
        Ok(Some(Frame {
            seq: SeqNum::new(seq_num),
            payload,
        }))
    }

    /// Header bytes of the frame currently at the front of the buffer, if a
    /// full header is present. Used to echo something correlatable back when
    /// an oversize frame kills the connection.
    pub fn pending_header(&self) -> Option<[u8; HEADER_LEN]> {
        if self.buf.len() < HEADER_LEN {
            return None;
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buf[..HEADER_LEN]);
        Some(header)
    }
}

/// Encode one frame. The payload length is validated against `u32`.
pub fn encode_frame(seq: SeqNum, payload: &[u8]) -> Bytes {
    debug_assert!(payload.len() <= u32::MAX as usize);
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&seq.get().to_be_bytes());
    out.extend_from_slice(payload);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(seq: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&seq.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn decodes_whole_frame() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME);
        decoder.extend(&frame_bytes(7, b"l4:pinge"));
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.seq, SeqNum::new(7));
        assert_eq!(&frame.payload[..], b"l4:pinge");
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn reassembles_from_single_byte_feeds() {
        let bytes = frame_bytes(3, b"payload");
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME);
        for (i, b) in bytes.iter().enumerate() {
            decoder.extend(std::slice::from_ref(b));
            let frame = decoder.next_frame().unwrap();
            if i + 1 < bytes.len() {
                assert!(frame.is_none(), "frame complete early at byte {i}");
            } else {
                assert_eq!(&frame.unwrap().payload[..], b"payload");
            }
        }
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let mut bytes = frame_bytes(1, b"a");
        bytes.extend(frame_bytes(2, b""));
        bytes.extend(frame_bytes(3, b"ccc"));
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME);
        decoder.extend(&bytes);

        let first = decoder.next_frame().unwrap().unwrap();
        assert_eq!((first.seq.get(), &first.payload[..]), (1, &b"a"[..]));
        let second = decoder.next_frame().unwrap().unwrap();
        assert_eq!((second.seq.get(), second.payload.len()), (2, 0));
        let third = decoder.next_frame().unwrap().unwrap();
        assert_eq!((third.seq.get(), &third.payload[..]), (3, &b"ccc"[..]));
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn zero_length_frame_is_a_valid_noop() {
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME);
        decoder.extend(&[0, 0, 0, 0, 0, 0, 0, 0]);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.seq, SeqNum::ZERO);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn oversize_header_is_fatal() {
        let mut decoder = FrameDecoder::new(16);
        decoder.extend(&frame_bytes(1, &[0u8; 17]));
        assert_eq!(
            decoder.next_frame().unwrap_err(),
            FrameError::Oversize { len: 17, max: 16 }
        );
    }

    #[test]
    fn roundtrip() {
        let encoded = encode_frame(SeqNum::new(99), b"l14:GETCLIENTCOUNTe");
        let mut decoder = FrameDecoder::new(DEFAULT_MAX_FRAME);
        decoder.extend(&encoded);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.seq, SeqNum::new(99));
        assert_eq!(&frame.payload[..], b"l14:GETCLIENTCOUNTe");
        assert_eq!(encode_frame(frame.seq, &frame.payload), encoded);
    }
}
