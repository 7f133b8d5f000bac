//! Text frame codec: two-digit type prefix + optional JSON payload.

use serde::Serialize;

use crate::error::ProtocolError;

/// Text message type codes.
///
/// The wire carries these as two zero-padded ASCII digits, so codes are
/// limited to 0..=99.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TextType {
    /// Generic error envelope `{error: string}`.
    Error = 0,
    /// Allocate an open post (C->S) / announce one (S->C).
    InsertPost = 1,
    /// Finalize an open post (C->S) / announce closure (S->C).
    ClosePost = 5,
    /// Attach an image to an open post. Not implemented; always rejected.
    InsertImage = 6,
    /// Subscribe to a thread feed (C->S) / sync snapshot (S->C).
    Synchronise = 30,
    /// Resume an open post after a disconnect.
    Reclaim = 31,
    /// Assigned post id reply.
    PostId = 32,
    /// Batched frame: JSON array of raw message strings.
    Concat = 33,
    /// Keepalive; no payload, no reply.
    Noop = 34,
    /// Subscriber / unique-address counts for a feed.
    SyncCount = 35,
    /// Server wall-clock time for client drift calculation.
    ServerTime = 36,
    /// Ask the client to navigate elsewhere.
    Redirect = 37,
    /// Captcha required before further post creation.
    Captcha = 38,
    /// Server-side posting limits pushed to the client.
    Configs = 39,
}

impl TextType {
    /// Numeric code for this type.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Map a numeric code back to a known type.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Error),
            1 => Some(Self::InsertPost),
            5 => Some(Self::ClosePost),
            6 => Some(Self::InsertImage),
            30 => Some(Self::Synchronise),
            31 => Some(Self::Reclaim),
            32 => Some(Self::PostId),
            33 => Some(Self::Concat),
            34 => Some(Self::Noop),
            35 => Some(Self::SyncCount),
            36 => Some(Self::ServerTime),
            37 => Some(Self::Redirect),
            38 => Some(Self::Captcha),
            39 => Some(Self::Configs),
            _ => None,
        }
    }
}

/// Encode a text message with a JSON payload.
pub fn encode_text<T: Serialize>(kind: TextType, payload: &T) -> Result<String, ProtocolError> {
    let json = serde_json::to_string(payload)?;
    Ok(format!("{:02}{}", kind.code(), json))
}

/// Encode a payload-less text message (just the two-digit prefix).
pub fn encode_text_empty(kind: TextType) -> String {
    format!("{:02}", kind.code())
}

/// Encode a Concat frame (type 33): a JSON array of the raw batched messages,
/// in enqueue order.
pub fn encode_concat(messages: &[String]) -> Result<String, ProtocolError> {
    let json = serde_json::to_string(messages)?;
    Ok(format!("{:02}{}", TextType::Concat.code(), json))
}

/// A decoded text frame: raw type code plus the untouched payload slice.
///
/// The code stays raw so routers can log-and-ignore unknown values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextFrame<'a> {
    /// Numeric type code parsed from the two-digit prefix.
    pub code: u8,
    /// JSON payload text; empty for payload-less messages.
    pub payload: &'a str,
}

/// Split a text frame into its type code and payload.
pub fn decode_text(data: &str) -> Result<TextFrame<'_>, ProtocolError> {
    let prefix = data.get(..2).ok_or(ProtocolError::BadTextPrefix)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::BadTextPrefix);
    }
    // Two ASCII digits always parse.
    let code: u8 = prefix.parse().map_err(|_| ProtocolError::BadTextPrefix)?;
    Ok(TextFrame { code, payload: &data[2..] })
}
