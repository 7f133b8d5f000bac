//! JSON payload types carried by the text frames.
//!
//! Wire field names are part of the protocol; clients read them verbatim.

use serde::{Deserialize, Serialize};

/// Generic error envelope, always sent with type 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// Synchronise request (type 30, C->S).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynchroniseRequest {
    /// Board slug, e.g. `"g"`.
    pub board: String,
    /// Thread id to subscribe to.
    pub thread: u64,
}

/// One open post inside a sync snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPostSnapshot {
    pub id: u64,
    pub body: String,
}

/// Synchronise reply (type 30, S->C): the feed snapshot a fresh subscriber
/// needs to reconcile its view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReply {
    pub board: String,
    pub thread: u64,
    pub open_posts: Vec<OpenPostSnapshot>,
    pub active_ips: usize,
    pub client_count: usize,
}

/// InsertPost request (type 01, C->S).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertPostRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Assigned post id reply (type 32, S->C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostIdReply {
    pub id: u64,
    pub board_post_no: Option<u64>,
}

/// Feed-wide open post announcement (type 01, S->C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertPostAnnounce {
    pub id: u64,
    pub board_post_no: Option<u64>,
    pub name: String,
    pub is_editing: bool,
    pub body: String,
    pub created_at: u64,
}

/// Feed-wide close announcement (type 05, S->C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePostAnnounce {
    pub id: u64,
    pub content_html: String,
}

/// Reclaim request (type 31, C->S).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimRequest {
    pub id: u64,
    pub password: String,
}

/// Reclaim success reply (type 31, S->C): the body the client resumes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimReply {
    pub id: u64,
    pub body: String,
}

/// Subscriber counts (type 35, S->C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCountPayload {
    /// Unique source addresses on the feed.
    pub active: usize,
    /// Total subscribed connections.
    pub total: usize,
}

/// Server wall-clock time (type 36, S->C), unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTimePayload {
    pub time: u64,
}

/// Redirect (type 37, S->C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectPayload {
    pub location: String,
}

/// Captcha gate (type 38, S->C): posting is blocked until solved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaPayload {
    pub required: bool,
}

/// Posting limits pushed to clients on connect (type 39, S->C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigsPayload {
    pub max_body_chars: usize,
    pub max_lines: usize,
    pub post_lifetime_secs: u64,
}
