//! Bencode codec.
//!
//! Decoding is strict: integers are canonical (no leading zeros, no `-0`),
//! byte-string lengths are canonical, dictionary keys must be byte strings in
//! strictly ascending raw-byte order. Encoding always emits the canonical
//! form, so `encode(decode(b)) == b` for any accepted input.

use std::fmt;

use thiserror::Error;

/// Maximum nesting depth accepted by the decoder. Control-protocol payloads
/// and metainfo files are shallow; anything deeper is hostile input.
const MAX_DEPTH: usize = 64;

/// One bencoded value.
#[derive(Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Key/value pairs in ascending raw-byte key order. The decoder enforces
    /// the order; constructors going through [`Value::dict`] sort.
    Dict(Vec<(Vec<u8>, Value)>),
}

impl Value {
    /// Byte-string value from anything byte-like.
    pub fn bytes(b: impl Into<Vec<u8>>) -> Value {
        Value::Bytes(b.into())
    }

    /// Byte-string value from a str.
    pub fn str(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }

    /// Dictionary from unordered pairs; keys are sorted here.
    pub fn dict(mut pairs: Vec<(Vec<u8>, Value)>) -> Value {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Value::Dict(pairs)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(Vec<u8>, Value)]> {
        match self {
            Value::Dict(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Dictionary lookup by raw key.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        match self {
            Value::Dict(pairs) => pairs
                .binary_search_by(|(k, _)| k.as_slice().cmp(key))
                .ok()
                .map(|i| &pairs[i].1),
            _ => None,
        }
    }

    /// Canonical encoding appended to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(n) => {
                out.push(b'i');
                out.extend_from_slice(n.to_string().as_bytes());
                out.push(b'e');
            }
            Value::Bytes(bytes) => {
                out.extend_from_slice(bytes.len().to_string().as_bytes());
                out.push(b':');
                out.extend_from_slice(bytes);
            }
            Value::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode_into(out);
                }
                out.push(b'e');
            }
            Value::Dict(pairs) => {
                out.push(b'd');
                let mut sorted: Vec<&(Vec<u8>, Value)> = pairs.iter().collect();
                sorted.sort_by(|a, b| a.0.cmp(&b.0));
                for (key, value) in sorted {
                    out.extend_from_slice(key.len().to_string().as_bytes());
                    out.push(b':');
                    out.extend_from_slice(key);
                    value.encode_into(out);
                }
                out.push(b'e');
            }
        }
    }

    /// Canonical encoding as a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) if s.chars().all(|c| !c.is_control()) => write!(f, "{s:?}"),
                _ => write!(f, "0x{}", crate::core::hex(b)),
            },
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Dict(pairs) => {
                let mut map = f.debug_map();
                for (k, v) in pairs {
                    match std::str::from_utf8(k) {
                        Ok(s) => map.entry(&s, v),
                        Err(_) => map.entry(&crate::core::hex(k), v),
                    };
                }
                map.finish()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Input ended inside a value.
    UnexpectedEof,
    /// Byte cannot start a value.
    UnexpectedByte(u8),
    /// Malformed integer body (empty, bare `-`, non-digits).
    InvalidInt,
    /// Non-canonical integer (`-0`, leading zero).
    NonCanonicalInt,
    /// Malformed or non-canonical byte-string length.
    InvalidLength,
    /// Dictionary key is not a byte string.
    KeyNotString,
    /// Dictionary keys not strictly ascending.
    KeyOrder,
    /// Value nesting exceeds [`MAX_DEPTH`].
    TooDeep,
    /// Bytes remain after the first complete value.
    TrailingData,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErrorKind::UnexpectedEof => write!(f, "unexpected end of input"),
            DecodeErrorKind::UnexpectedByte(b) => write!(f, "unexpected byte 0x{b:02x}"),
            DecodeErrorKind::InvalidInt => write!(f, "malformed integer"),
            DecodeErrorKind::NonCanonicalInt => write!(f, "non-canonical integer"),
            DecodeErrorKind::InvalidLength => write!(f, "malformed string length"),
            DecodeErrorKind::KeyNotString => write!(f, "dictionary key is not a string"),
            DecodeErrorKind::KeyOrder => write!(f, "dictionary keys out of order"),
            DecodeErrorKind::TooDeep => write!(f, "nesting too deep"),
            DecodeErrorKind::TrailingData => write!(f, "trailing data after value"),
        }
    }
}

/// Decode failure; `offset` points at the first offending byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind} at offset {offset}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub offset: usize,
}

impl DecodeError {
    fn new(kind: DecodeErrorKind, offset: usize) -> Self {
        DecodeError { kind, offset }
    }
}

/// Decode exactly one value spanning the whole input.
pub fn decode(data: &[u8]) -> Result<Value, DecodeError> {
    let (value, end) = decode_prefix(data)?;
    if end != data.len() {
        return Err(DecodeError::new(DecodeErrorKind::TrailingData, end));
    }
    Ok(value)
}

/// Decode one value from the front of the input, returning it together with
/// the offset of the first byte after it.
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), DecodeError> {
    parse_value(data, 0, 0)
}

fn parse_value(data: &[u8], pos: usize, depth: usize) -> Result<(Value, usize), DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::new(DecodeErrorKind::TooDeep, pos));
    }
    let Some(&first) = data.get(pos) else {
        return Err(DecodeError::new(DecodeErrorKind::UnexpectedEof, pos));
    };
    match first {
        b'i' => parse_int(data, pos),
        b'l' => {
            let mut items = Vec::new();
            let mut i = pos + 1;
            loop {
                match data.get(i) {
                    None => return Err(DecodeError::new(DecodeErrorKind::UnexpectedEof, i)),
                    Some(b'e') => return Ok((Value::List(items), i + 1)),
                    Some(_) => {
                        let (value, next) = parse_value(data, i, depth + 1)?;
                        items.push(value);
                        i = next;
                    }
                }
            }
        }
        b'd' => {
            let mut pairs: Vec<(Vec<u8>, Value)> = Vec::new();
            let mut i = pos + 1;
            loop {
                match data.get(i) {
                    None => return Err(DecodeError::new(DecodeErrorKind::UnexpectedEof, i)),
                    Some(b'e') => return Ok((Value::Dict(pairs), i + 1)),
                    Some(b'0'..=b'9') => {
                        let key_offset = i;
                        let (key_value, next) = parse_bytes(data, i)?;
                        let Value::Bytes(key) = key_value else {
                            unreachable!("parse_bytes yields Bytes");
                        };
                        if let Some((prev, _)) = pairs.last() {
                            if *prev >= key {
                                return Err(DecodeError::new(
                                    DecodeErrorKind::KeyOrder,
                                    key_offset,
                                ));
                            }
                        }
                        let (value, next) = parse_value(data, next, depth + 1)?;
                        pairs.push((key, value));
                        i = next;
                    }
                    Some(_) => return Err(DecodeError::new(DecodeErrorKind::KeyNotString, i)),
                }
            }
        }
        b'0'..=b'9' => parse_bytes(data, pos),
        other => Err(DecodeError::new(
            DecodeErrorKind::UnexpectedByte(other),
            pos,
        )),
    }
}

fn parse_int(data: &[u8], pos: usize) -> Result<(Value, usize), DecodeError> {
    let body_start = pos + 1;
    let mut i = body_start;
    while i < data.len() && data[i] != b'e' {
        i += 1;
    }
    if i >= data.len() {
        return Err(DecodeError::new(DecodeErrorKind::UnexpectedEof, i));
    }
    let body = &data[body_start..i];
    let digits = match body.first() {
        None => return Err(DecodeError::new(DecodeErrorKind::InvalidInt, body_start)),
        Some(b'-') => &body[1..],
        Some(_) => body,
    };
    if digits.is_empty() || !digits.iter().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::new(DecodeErrorKind::InvalidInt, body_start));
    }
    if digits[0] == b'0' && (digits.len() > 1 || body[0] == b'-') {
        // i-0e and leading zeros are rejected; i0e alone is canonical.
        return Err(DecodeError::new(
            DecodeErrorKind::NonCanonicalInt,
            body_start,
        ));
    }
    let text = std::str::from_utf8(body).expect("ascii digits");
    let value: i64 = text
        .parse()
        .map_err(|_| DecodeError::new(DecodeErrorKind::InvalidInt, body_start))?;
    Ok((Value::Int(value), i + 1))
}

fn parse_bytes(data: &[u8], pos: usize) -> Result<(Value, usize), DecodeError> {
    let mut i = pos;
    while i < data.len() && data[i].is_ascii_digit() {
        i += 1;
    }
    if i == pos {
        return Err(DecodeError::new(DecodeErrorKind::InvalidLength, pos));
    }
    match data.get(i) {
        Some(b':') => {}
        Some(_) => return Err(DecodeError::new(DecodeErrorKind::InvalidLength, i)),
        None => return Err(DecodeError::new(DecodeErrorKind::UnexpectedEof, i)),
    }
    let digits = &data[pos..i];
    if digits.len() > 1 && digits[0] == b'0' {
        return Err(DecodeError::new(DecodeErrorKind::InvalidLength, pos));
    }
    let text = std::str::from_utf8(digits).expect("ascii digits");
    let len: usize = text
        .parse()
        .map_err(|_| DecodeError::new(DecodeErrorKind::InvalidLength, pos))?;
    let start = i + 1;
    let end = start
        .checked_add(len)
        .ok_or(DecodeError::new(DecodeErrorKind::InvalidLength, pos))?;
    if end > data.len() {
        return Err(DecodeError::new(DecodeErrorKind::UnexpectedEof, data.len()));
    }
    Ok((Value::Bytes(data[start..end].to_vec()), end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_scalars() {
        assert_eq!(decode(b"i42e").unwrap(), Value::Int(42));
        assert_eq!(decode(b"i-7e").unwrap(), Value::Int(-7));
        assert_eq!(decode(b"i0e").unwrap(), Value::Int(0));
        assert_eq!(decode(b"4:spam").unwrap(), Value::bytes(*b"spam"));
        assert_eq!(decode(b"0:").unwrap(), Value::bytes(*b""));
    }

    #[test]
    fn decodes_containers() {
        assert_eq!(
            decode(b"l4:spami1ee").unwrap(),
            Value::List(vec![Value::bytes(*b"spam"), Value::Int(1)])
        );
        assert_eq!(
            decode(b"d3:cow3:moo4:spami3ee").unwrap(),
            Value::Dict(vec![
                (b"cow".to_vec(), Value::bytes(*b"moo")),
                (b"spam".to_vec(), Value::Int(3)),
            ])
        );
    }

    #[test]
    fn roundtrip_is_exact() {
        let inputs: &[&[u8]] = &[
            &b"i0e"[..],
            b"i-123e",
            b"0:",
            b"3:foo",
            b"le",
            b"de",
            b"l4:spaml4:eggsei9ee",
            b"d1:ai1e1:bl1:cee",
        ];
        for input in inputs {
            let value = decode(input).unwrap();
            assert_eq!(value.encode(), *input, "input {:?}", input);
        }
    }

    #[test]
    fn encode_sorts_dict_keys() {
        let value = Value::dict(vec![
            (b"zeta".to_vec(), Value::Int(1)),
            (b"alpha".to_vec(), Value::Int(2)),
        ]);
        assert_eq!(value.encode(), b"d5:alphai2e4:zetai1ee");
    }

    #[test]
    fn rejects_non_canonical_integers() {
        for input in [&b"i-0e"[..], b"i01e", b"i00e"] {
            let err = decode(input).unwrap_err();
            assert_eq!(err.kind, DecodeErrorKind::NonCanonicalInt, "{input:?}");
            assert_eq!(err.offset, 1);
        }
        assert_eq!(decode(b"ie").unwrap_err().kind, DecodeErrorKind::InvalidInt);
        assert_eq!(decode(b"i-e").unwrap_err().kind, DecodeErrorKind::InvalidInt);
        assert_eq!(
            decode(b"i1x2e").unwrap_err().kind,
            DecodeErrorKind::InvalidInt
        );
    }

    #[test]
    fn rejects_non_canonical_lengths() {
        let err = decode(b"03:abc").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::InvalidLength);
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn rejects_unsorted_and_duplicate_keys() {
        let err = decode(b"d4:zetai1e5:alphai2ee").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::KeyOrder);
        assert_eq!(err.offset, 10);

        let err = decode(b"d1:ai1e1:ai2ee").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::KeyOrder);
    }

    #[test]
    fn rejects_non_string_keys() {
        let err = decode(b"di1e1:ae").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::KeyNotString);
        assert_eq!(err.offset, 1);
    }

    #[test]
    fn rejects_trailing_data() {
        let err = decode(b"i1ei2e").unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::TrailingData);
        assert_eq!(err.offset, 3);
    }

    #[test]
    fn truncated_input_reports_eof_at_end() {
        for input in [&b"i42"[..], b"4:sp", b"l4:spam", b"d3:cow"] {
            let err = decode(input).unwrap_err();
            assert_eq!(err.kind, DecodeErrorKind::UnexpectedEof, "{input:?}");
        }
    }

    #[test]
    fn depth_limit_holds() {
        let mut input = Vec::new();
        input.extend(std::iter::repeat(b'l').take(200));
        input.extend(std::iter::repeat(b'e').take(200));
        assert_eq!(decode(&input).unwrap_err().kind, DecodeErrorKind::TooDeep);
    }

    #[test]
    fn decode_prefix_reports_end_offset() {
        let (value, end) = decode_prefix(b"4:spami42e").unwrap();
        assert_eq!(value, Value::bytes(*b"spam"));
        assert_eq!(end, 6);
    }

    #[test]
    fn dict_get_finds_keys() {
        let value = decode(b"d3:cow3:moo4:spami3ee").unwrap();
        assert_eq!(value.get(b"cow"), Some(&Value::bytes(*b"moo")));
        assert_eq!(value.get(b"spam"), Some(&Value::Int(3)));
        assert_eq!(value.get(b"none"), None);
    }
}
