//! # Livechan Wire Protocol
//!
//! Stateless encode/decode for the livepost WebSocket protocol, shared by the
//! gateway server and any client implementation.
//!
//! Two frame families travel over one WebSocket connection:
//!
//! - **Text frames**: a two-ASCII-digit zero-padded type code immediately
//!   followed by an optional JSON payload, no delimiter (`30{"board":"g",...}`).
//!   Used for session control: synchronise, post allocation, close, reclaim.
//! - **Binary frames**: the latency-critical keystroke stream. The message
//!   type is the *last* byte so payloads can be variable-length. Server
//!   broadcasts carry a leading post id encoded as a float64 little-endian
//!   (8 bytes) for cheap `DataView.getFloat64()` on the browser side; client
//!   frames omit it because the server knows which post a client owns.
//!
//! All decoders validate lengths and reject truncated or ambiguous input with
//! a typed error; nothing is ever guessed.

mod binary;
mod error;
mod payload;
mod text;

pub use binary::{
    BinaryType, ClientFrame, SplicePayload, decode_client_frame, decode_post_id,
    decode_splice_payload, encode_append, encode_backspace, encode_post_id, encode_splice,
    POST_ID_BYTES, SAFE_INTEGER_MAX,
};
pub use error::ProtocolError;
pub use payload::{
    CaptchaPayload, ClosePostAnnounce, ConfigsPayload, ErrorPayload, InsertPostAnnounce,
    InsertPostRequest, OpenPostSnapshot, PostIdReply, ReclaimReply, ReclaimRequest,
    RedirectPayload, ServerTimePayload, SyncCountPayload, SyncReply, SynchroniseRequest,
};
pub use text::{TextFrame, TextType, decode_text, encode_concat, encode_text, encode_text_empty};
