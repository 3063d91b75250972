//! RPC protocol encoding and decoding.
//!
//! Message format:
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: MessagePack payload
//!
//! The payload is one MessagePack map: requests carry `id`, `type`,
//! `action` and an optional `payload`; responses always carry `id`, `type`,
//! `payload`, `error` in that order.

use bytes::{Buf, Bytes, BytesMut};
use rmpv::Value;
use thiserror::Error;

/// Maximum allowed frame size (16 MiB). Anything larger is a protocol error
/// and the connection is dropped.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    TooLarge(usize),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid MessagePack: {0}")]
    Malformed(String),
    #[error("request is not a map")]
    NotAMap,
}

/// A decoded RPC request envelope.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: String,
    pub action: String,
    pub payload: Option<Value>,
}

impl Request {
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }
}

/// Extract one complete frame from `buf`.
///
/// Returns:
/// - `Ok(Some(body))` - complete frame extracted, buffer advanced
/// - `Ok(None)` - need more data (buffer unchanged)
/// - `Err(_)` - protocol violation, the connection should be closed
pub fn extract_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let length = (&buf[..4]).get_u32() as usize;
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(length));
    }
    if buf.len() < 4 + length {
        return Ok(None);
    }

    buf.advance(4);
    Ok(Some(buf.split_to(length).freeze()))
}

/// Prepend the length prefix to an encoded message body.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(body);
    framed
}

/// Decode a request envelope. Missing or non-string `id`/`action` default to
/// the empty string; `payload` is kept verbatim when present.
pub fn decode_request(bytes: &[u8]) -> Result<Request, DecodeError> {
    let root = rmpv::decode::read_value(&mut &bytes[..])
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if !root.is_map() {
        return Err(DecodeError::NotAMap);
    }

    let id = find_key(&root, "id")
        .map(|v| as_str(v, "").to_string())
        .unwrap_or_default();
    let action = find_key(&root, "action")
        .map(|v| as_str(v, "").to_string())
        .unwrap_or_default();
    let payload = find_key(&root, "payload").cloned();

    Ok(Request {
        id,
        action,
        payload,
    })
}

/// Pack a response envelope with the four keys in canonical order.
/// `error = None` packs nil; `error = Some(msg)` packs `{"message": msg}`.
pub fn encode_response(id: &str, payload: Value, error: Option<&str>) -> Vec<u8> {
    let error_value = match error {
        None => Value::Nil,
        Some(message) => Value::Map(vec![(Value::from("message"), Value::from(message))]),
    };
    let envelope = Value::Map(vec![
        (Value::from("id"), Value::from(id)),
        (Value::from("type"), Value::from("response")),
        (Value::from("payload"), payload),
        (Value::from("error"), error_value),
    ]);

    let mut bytes = Vec::new();
    rmpv::encode::write_value(&mut bytes, &envelope)
        .expect("MessagePack encoding into a Vec cannot fail");
    bytes
}

/// Linear key lookup in a MessagePack map.
pub fn find_key<'a>(map: &'a Value, key: &str) -> Option<&'a Value> {
    map.as_map()?
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

pub fn as_str<'a>(value: &'a Value, fallback: &'a str) -> &'a str {
    value.as_str().unwrap_or(fallback)
}

pub fn as_i64(value: &Value, fallback: i64) -> i64 {
    value.as_i64().unwrap_or(fallback)
}

pub fn as_bool(value: &Value, fallback: bool) -> bool {
    value.as_bool().unwrap_or(fallback)
}

/// Floats pass through; integers are widened.
pub fn as_f64(value: &Value, fallback: f64) -> f64 {
    value.as_f64().unwrap_or(fallback)
}
