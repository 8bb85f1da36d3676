//! vigil wire format: the length-prefixed JSON + binary envelope.
//!
//! Every message on a camera connection has the same shape:
//!
//!   u32 little-endian L | L bytes of UTF-8 JSON object | optional payload
//!
//! When the JSON object carries an `"image": N` key, exactly N raw bytes
//! follow it. Frame messages are `{"data": {...}, "image": N}` followed by
//! the encoded picture; acks are `{"ack": true}` with no payload. Exactly
//! one frame may be outstanding un-acked per connection; that rule lives
//! in the sender and the hub, not here.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;
use crate::frame::FrameInfo;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Size of the little-endian length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Metadata key declaring the payload length.
pub const IMAGE_KEY: &str = "image";

/// Metadata key holding a frame's `FrameInfo`.
pub const DATA_KEY: &str = "data";

/// Metadata key of an ack message.
pub const ACK_KEY: &str = "ack";

/// Largest JSON block a receiver will buffer.
pub const MAX_METADATA_LEN: usize = 1 << 20;

/// Largest payload a receiver will buffer.
pub const MAX_PAYLOAD_LEN: usize = 64 << 20;

type Result<T> = std::result::Result<T, TransportError>;

// ── Envelope ──────────────────────────────────────────────────────────────────

/// One unit exchanged over a connection. Lives for a single send or receive.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub metadata: Map<String, Value>,
    pub payload: Option<Bytes>,
}

impl Envelope {
    pub fn new(metadata: Map<String, Value>, payload: Option<Bytes>) -> Self {
        Self { metadata, payload }
    }

    pub fn encode(&self) -> Result<Bytes> {
        encode_envelope(&self.metadata, self.payload.as_deref())
    }
}

/// Serialize metadata (plus `"image": len` when a payload is present),
/// prefix it with its length and append the payload.
///
/// A stray `"image"` key without a payload is dropped so the receiver
/// never waits for bytes that will not come.
pub fn encode_envelope(metadata: &Map<String, Value>, payload: Option<&[u8]>) -> Result<Bytes> {
    let mut metadata = metadata.clone();
    match payload {
        Some(p) => {
            metadata.insert(IMAGE_KEY.to_string(), Value::from(p.len() as u64));
        }
        None => {
            metadata.remove(IMAGE_KEY);
        }
    }

    let json = serde_json::to_vec(&metadata)?;
    if json.len() > MAX_METADATA_LEN {
        return Err(TransportError::protocol(format!(
            "metadata length {} exceeds maximum {}",
            json.len(),
            MAX_METADATA_LEN
        )));
    }
    let payload_len = payload.map_or(0, <[u8]>::len);
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(TransportError::protocol(format!(
            "payload length {payload_len} exceeds maximum {MAX_PAYLOAD_LEN}"
        )));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + json.len() + payload_len);
    buf.put_u32_le(json.len() as u32);
    buf.put_slice(&json);
    if let Some(p) = payload {
        buf.put_slice(p);
    }
    Ok(buf.freeze())
}

/// Read one envelope. A clean EOF before the first prefix byte yields
/// `Ok(None)`; EOF anywhere else is `ConnectionClosed`.
pub async fn next_envelope<R>(reader: &mut R) -> Result<Option<Envelope>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX];
    let mut filled = 0;
    while filled < LENGTH_PREFIX {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(TransportError::ConnectionClosed);
        }
        filled += n;
    }

    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_METADATA_LEN {
        return Err(TransportError::protocol(format!(
            "metadata length {len} exceeds maximum {MAX_METADATA_LEN}"
        )));
    }
    let mut json = vec![0u8; len];
    reader.read_exact(&mut json).await?;

    let mut metadata = match serde_json::from_slice::<Value>(&json)? {
        Value::Object(map) => map,
        other => {
            return Err(TransportError::protocol(format!(
                "metadata is not a json object: {other}"
            )))
        }
    };

    let payload = match metadata.remove(IMAGE_KEY) {
        None => None,
        Some(value) => {
            let n = value.as_u64().ok_or_else(|| {
                TransportError::protocol(format!("image length is not an unsigned integer: {value}"))
            })? as usize;
            if n > MAX_PAYLOAD_LEN {
                return Err(TransportError::protocol(format!(
                    "payload length {n} exceeds maximum {MAX_PAYLOAD_LEN}"
                )));
            }
            let mut buf = BytesMut::zeroed(n);
            reader.read_exact(&mut buf).await?;
            Some(buf.freeze())
        }
    };

    Ok(Some(Envelope { metadata, payload }))
}

/// Read exactly one envelope; any EOF is `ConnectionClosed`.
pub async fn read_envelope<R>(reader: &mut R) -> Result<Envelope>
where
    R: AsyncRead + Unpin,
{
    next_envelope(reader)
        .await?
        .ok_or(TransportError::ConnectionClosed)
}

pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = envelope.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

// ── Frame messages ────────────────────────────────────────────────────────────

/// A decoded frame message: the camera's `data` object and the encoded image.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMessage {
    pub info: FrameInfo,
    pub image: Bytes,
}

pub fn encode_frame_message(info: &FrameInfo, image: &[u8]) -> Result<Bytes> {
    let mut metadata = Map::new();
    metadata.insert(DATA_KEY.to_string(), serde_json::to_value(info)?);
    encode_envelope(&metadata, Some(image))
}

/// Read the next frame message. `Ok(None)` means the peer closed the
/// connection cleanly between messages.
pub async fn read_frame_message<R>(reader: &mut R) -> Result<Option<FrameMessage>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut envelope) = next_envelope(reader).await? else {
        return Ok(None);
    };
    let data = envelope
        .metadata
        .remove(DATA_KEY)
        .ok_or_else(|| TransportError::protocol("frame message has no data field"))?;
    let info: FrameInfo = serde_json::from_value(data)?;
    let image = envelope
        .payload
        .ok_or_else(|| TransportError::protocol("frame message has no image payload"))?;
    Ok(Some(FrameMessage { info, image }))
}

// ── Acks ──────────────────────────────────────────────────────────────────────

pub fn encode_ack() -> Bytes {
    let mut metadata = Map::new();
    metadata.insert(ACK_KEY.to_string(), Value::Bool(true));
    // A one-key object of a bool always serializes and never hits the limits.
    encode_envelope(&metadata, None).unwrap_or_default()
}

pub async fn write_ack<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_ack()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one envelope and report whether it was a positive ack.
pub async fn read_ack<R>(reader: &mut R) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    let envelope = read_envelope(reader).await?;
    Ok(envelope
        .metadata
        .get(ACK_KEY)
        .and_then(Value::as_bool)
        .unwrap_or(false))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
