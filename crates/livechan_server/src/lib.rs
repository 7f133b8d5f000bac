//! # Livechan Gateway
//!
//! WebSocket gateway that lets browsers watch a discussion thread update
//! character-by-character while posts are still being written.
//!
//! The gateway multiplexes connections into per-thread [`feed::ThreadFeed`]s:
//! keystrokes stream through a compact binary protocol and broadcast
//! immediately, while non-critical text messages are batched on a 100ms
//! flush tick. Posts are bounded in size and lifetime, abusive clients are
//! throttled by a decaying [`spam::SpamScorer`], and a periodic
//! [`sweeper`] reclaims idle feeds and abandoned open posts.
//!
//! Persistent storage lives in an external post store service behind the
//! [`post_store::PostStore`] trait; the gateway only holds volatile state.

pub mod client;
pub mod config;
pub mod feed;
pub mod handlers;
pub mod open_post;
pub mod post_store;
pub mod spam;
pub mod sweeper;

/// Current unix time in whole seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
