use thiserror::Error;

/// Errors produced by the frame codecs.
///
/// Decode errors mean the frame must be dropped; they are never grounds for
/// terminating the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Post id exceeds the float64 safe integer ceiling (2^53).
    #[error("post id {0} exceeds float64 safe integer range [0, 2^53]")]
    PostIdOutOfRange(u64),

    /// The decoded float does not round-trip to an unambiguous integer.
    #[error("post id lost precision in float64 decode (float={0})")]
    PostIdPrecision(f64),

    /// Frame or payload shorter than the fixed fields require.
    #[error("frame too short: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    /// Text frame missing the two-digit type prefix.
    #[error("text frame missing two-digit type prefix")]
    BadTextPrefix,

    /// Splice replacement text was not valid UTF-8.
    #[error("splice replacement text is not valid UTF-8")]
    InvalidUtf8,

    /// JSON payload failed to serialize or deserialize.
    #[error("json payload error: {0}")]
    Json(#[from] serde_json::Error),
}
