//! Per-socket connection state.

use std::net::IpAddr;

use axum::extract::ws::Message;
use tokio::sync::{Mutex, mpsc};

use crate::open_post::OpenPost;

/// Connection id, unique per gateway process.
pub type ConnId = u64;

/// One WebSocket connection.
///
/// The immutable identity is shared freely; the mutable session lives behind
/// a mutex so the socket task and the sweeper can both reach it. Outbound
/// frames go through the mpsc sender: the socket task owns the receiving
/// half and pumps it into the sink, which keeps per-client ordering without
/// any cross-connection locking.
pub struct ClientConnection {
    pub id: ConnId,
    /// Source address resolved from forwarding headers at handshake time.
    pub addr: IpAddr,
    /// Unix timestamp of connection establishment.
    pub connected_at: u64,
    sender: mpsc::UnboundedSender<Message>,
    pub session: Mutex<Session>,
}

/// Mutable per-connection session state.
#[derive(Debug, Default)]
pub struct Session {
    /// Currently synced thread (None = not yet synced).
    pub thread_id: Option<u64>,
    /// Currently synced board slug.
    pub board: Option<String>,
    /// Has completed the synchronise handshake.
    pub synced: bool,
    /// Last message timestamp, for idle detection.
    pub last_activity: u64,
    /// Currently editing post. At most one per connection.
    pub open_post: Option<OpenPost>,
}

impl Session {
    /// Whether this client is synced to a specific thread.
    pub fn is_synced(&self) -> bool {
        self.synced && self.thread_id.is_some()
    }

    /// Reset sync state when switching threads or disconnecting.
    pub fn reset_sync(&mut self) {
        self.thread_id = None;
        self.board = None;
        self.synced = false;
    }

    /// Update the last activity timestamp.
    pub fn touch(&mut self, now: u64) {
        self.last_activity = now;
    }
}

impl ClientConnection {
    pub fn new(
        id: ConnId,
        addr: IpAddr,
        connected_at: u64,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            id,
            addr,
            connected_at,
            sender,
            session: Mutex::new(Session {
                last_activity: connected_at,
                ..Session::default()
            }),
        }
    }

    /// Queue a text frame for this client. Returns `false` when the socket
    /// task has gone away, which callers treat as "prune me".
    pub fn send_text(&self, frame: String) -> bool {
        self.sender.send(Message::Text(frame.into())).is_ok()
    }

    /// Queue a binary frame for this client.
    pub fn send_binary(&self, frame: Vec<u8>) -> bool {
        self.sender.send(Message::Binary(frame.into())).is_ok()
    }
}
