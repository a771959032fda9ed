//! Data-channel encodings.
//!
//! Binary layout (little-endian, 20 bytes):
//!
//! ```text
//! [0..4)   u32  key index into EventKey::ALL
//! [4..12)  f64  value (IEEE-754)
//! [12..20) i64  timestamp, Unix ms
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::WireFormat;
use crate::error::DecodeError;
use crate::event::{Event, EventKey};

pub const BINARY_LEN: usize = 20;

/// An encoded event ready for the data channel.
///
/// Cloning is cheap: the bytes are reference counted, so one encoding can be
/// handed to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 JSON, sent as a text frame.
    Text(Bytes),
    /// Fixed binary record, sent as a binary frame.
    Binary(Bytes),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(b) | Payload::Binary(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn format(&self) -> WireFormat {
        match self {
            Payload::Text(_) => WireFormat::Text,
            Payload::Binary(_) => WireFormat::Binary,
        }
    }
}

pub fn encode(event: &Event, format: WireFormat) -> Payload {
    match format {
        WireFormat::Text => Payload::Text(encode_text(event)),
        WireFormat::Binary => Payload::Binary(encode_binary(event)),
    }
}

/// `{"key":"AAPL","value":185.2,"timestamp":1700000000000}`
pub fn encode_text(event: &Event) -> Bytes {
    // Event has no map keys or non-string keys, serialization cannot fail;
    // non-finite values come out as `null`.
    serde_json::to_vec(event).map(Bytes::from).unwrap_or_default()
}

pub fn encode_binary(event: &Event) -> Bytes {
    let mut buf = BytesMut::with_capacity(BINARY_LEN);
    buf.put_u32_le(event.key.index());
    buf.put_f64_le(event.value);
    buf.put_i64_le(event.timestamp);
    buf.freeze()
}

pub fn decode_binary(frame: &[u8]) -> Result<Event, DecodeError> {
    let Ok(raw) = <&[u8; BINARY_LEN]>::try_from(frame) else {
        return Err(DecodeError::Length {
            expected: BINARY_LEN,
            actual: frame.len(),
        });
    };

    let mut index = [0u8; 4];
    let mut value = [0u8; 8];
    let mut timestamp = [0u8; 8];
    index.copy_from_slice(&raw[0..4]);
    value.copy_from_slice(&raw[4..12]);
    timestamp.copy_from_slice(&raw[12..20]);

    let index = u32::from_le_bytes(index);
    let key = EventKey::from_index(index).ok_or(DecodeError::UnknownKey(index))?;
    Ok(Event {
        key,
        value: f64::from_le_bytes(value),
        timestamp: i64::from_le_bytes(timestamp),
    })
}

pub fn decode_text(frame: &[u8]) -> Result<Event, DecodeError> {
    Ok(serde_json::from_slice(frame)?)
}

pub fn decode(payload: &Payload) -> Result<Event, DecodeError> {
    match payload {
        Payload::Text(b) => decode_text(b),
        Payload::Binary(b) => decode_binary(b),
    }
}
