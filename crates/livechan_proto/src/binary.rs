//! Binary frame codec for the keystroke hot path.
//!
//! Layouts:
//!
//! ```text
//! server -> client:
//!   Append    [postID: f64 LE][char: utf8][0x02]
//!   Backspace [postID: f64 LE][0x03]
//!   Splice    [postID: f64 LE][start: u16 LE][deleteCount: u16 LE][text: utf8][0x04]
//!
//! client -> server: identical, minus the leading post id.
//! ```

use crate::error::ProtocolError;

/// Size of an encoded post id.
pub const POST_ID_BYTES: usize = 8;

/// IEEE 754 double-precision safe integer limit (2^53).
///
/// Post ids above this lose precision when carried as a float64. At 1,000
/// posts per second this takes roughly 285,000 years to reach.
pub const SAFE_INTEGER_MAX: u64 = 1 << 53;

/// Binary message type, carried as the last byte of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinaryType {
    /// Append one character to the open post.
    Append = 0x02,
    /// Remove the last character of the open post.
    Backspace = 0x03,
    /// Replace a span of the open post body.
    Splice = 0x04,
}

impl BinaryType {
    /// Map a raw type byte back to a known message type.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x02 => Some(Self::Append),
            0x03 => Some(Self::Backspace),
            0x04 => Some(Self::Splice),
            _ => None,
        }
    }
}

/// Encode a post id as float64 little-endian.
///
/// Fails for ids above [`SAFE_INTEGER_MAX`] instead of silently losing
/// precision.
pub fn encode_post_id(post_id: u64) -> Result<[u8; POST_ID_BYTES], ProtocolError> {
    if post_id > SAFE_INTEGER_MAX {
        return Err(ProtocolError::PostIdOutOfRange(post_id));
    }
    Ok((post_id as f64).to_le_bytes())
}

/// Decode a post id from the first 8 bytes of a frame.
///
/// The recovered integer must round-trip to the same float within 0.5,
/// otherwise the id is ambiguous between two adjacent integers and the frame
/// is rejected. Clients assume this exact tolerance and the 2^53 ceiling.
pub fn decode_post_id(data: &[u8]) -> Result<u64, ProtocolError> {
    if data.len() < POST_ID_BYTES {
        return Err(ProtocolError::Truncated { need: POST_ID_BYTES, got: data.len() });
    }
    let mut raw = [0u8; POST_ID_BYTES];
    raw.copy_from_slice(&data[..POST_ID_BYTES]);
    let float = f64::from_le_bytes(raw);

    if !float.is_finite() || float < 0.0 || float > SAFE_INTEGER_MAX as f64 {
        return Err(ProtocolError::PostIdPrecision(float));
    }

    let int = float.trunc();
    if (float - int).abs() >= 0.5 {
        return Err(ProtocolError::PostIdPrecision(float));
    }

    Ok(int as u64)
}

/// Encode an Append broadcast frame: `[postID][char][0x02]`.
pub fn encode_append(post_id: u64, ch: char) -> Result<Vec<u8>, ProtocolError> {
    let id = encode_post_id(post_id)?;
    let mut buf = [0u8; 4];
    let encoded = ch.encode_utf8(&mut buf);

    let mut frame = Vec::with_capacity(POST_ID_BYTES + encoded.len() + 1);
    frame.extend_from_slice(&id);
    frame.extend_from_slice(encoded.as_bytes());
    frame.push(BinaryType::Append as u8);
    Ok(frame)
}

/// Encode a Backspace broadcast frame: `[postID][0x03]`.
pub fn encode_backspace(post_id: u64) -> Result<Vec<u8>, ProtocolError> {
    let id = encode_post_id(post_id)?;
    let mut frame = Vec::with_capacity(POST_ID_BYTES + 1);
    frame.extend_from_slice(&id);
    frame.push(BinaryType::Backspace as u8);
    Ok(frame)
}

/// Encode a Splice broadcast frame:
/// `[postID][start: u16 LE][deleteCount: u16 LE][text][0x04]`.
pub fn encode_splice(
    post_id: u64,
    start: u16,
    delete_count: u16,
    text: &str,
) -> Result<Vec<u8>, ProtocolError> {
    let id = encode_post_id(post_id)?;
    let mut frame = Vec::with_capacity(POST_ID_BYTES + 4 + text.len() + 1);
    frame.extend_from_slice(&id);
    frame.extend_from_slice(&start.to_le_bytes());
    frame.extend_from_slice(&delete_count.to_le_bytes());
    frame.extend_from_slice(text.as_bytes());
    frame.push(BinaryType::Splice as u8);
    Ok(frame)
}

/// A client-sent binary frame, split into its type byte and payload.
///
/// The type byte is kept raw so routers can log-and-ignore unknown codes
/// instead of failing the decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientFrame<'a> {
    /// Raw type byte (the last byte of the frame).
    pub type_byte: u8,
    /// Everything before the type byte.
    pub payload: &'a [u8],
}

/// Split a client frame into `(payload, type byte)`.
pub fn decode_client_frame(data: &[u8]) -> Result<ClientFrame<'_>, ProtocolError> {
    let Some((&type_byte, payload)) = data.split_last() else {
        return Err(ProtocolError::Truncated { need: 1, got: 0 });
    };
    Ok(ClientFrame { type_byte, payload })
}

/// Decoded Splice payload (type byte already stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplicePayload {
    /// Code-point offset where the splice starts.
    pub start: u16,
    /// Number of code points to delete at `start`.
    pub delete_count: u16,
    /// Replacement text inserted at `start`.
    pub text: String,
}

/// Decode a Splice payload: `[start: u16 LE][deleteCount: u16 LE][text]`.
pub fn decode_splice_payload(payload: &[u8]) -> Result<SplicePayload, ProtocolError> {
    if payload.len() < 4 {
        return Err(ProtocolError::Truncated { need: 4, got: payload.len() });
    }
    let start = u16::from_le_bytes([payload[0], payload[1]]);
    let delete_count = u16::from_le_bytes([payload[2], payload[3]]);
    let text = std::str::from_utf8(&payload[4..])
        .map_err(|_| ProtocolError::InvalidUtf8)?
        .to_owned();
    Ok(SplicePayload { start, delete_count, text })
}
