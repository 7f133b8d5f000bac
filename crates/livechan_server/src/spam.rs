//! Per-address decaying spam score tracker.
//!
//! Each liveposting action carries a cost in points. Scores decay linearly
//! at one point per second, computed lazily on read or write rather than via
//! timers, and never go negative. Once an address crosses the captcha
//! threshold, post creation is gated until the score is reset.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use dashmap::DashMap;

use crate::unix_now;

/// Cost of allocating a new post.
pub const COST_POST_CREATION: u64 = 50;
/// Cost of a single character append.
pub const COST_CHAR_APPEND: u64 = 1;
/// Cost per character of spliced replacement text.
pub const COST_SPLICE_PER_CHAR: u64 = 2;
/// Cost of attaching an image.
pub const COST_IMAGE_ATTACH: u64 = 30;

/// Decay rate: points per second.
const DECAY_PER_SEC: u64 = 1;

/// Entries inactive this long are dropped by [`SpamScorer::cleanup_at`].
const STALE_SECS: u64 = 600;

#[derive(Debug, Clone, Copy)]
struct ScoreEntry {
    score: u64,
    last_update: u64,
}

/// Lazily-decaying per-address abuse score registry.
pub struct SpamScorer {
    scores: DashMap<u64, ScoreEntry>,
    captcha_threshold: u64,
}

impl SpamScorer {
    pub fn new(captcha_threshold: u64) -> Self {
        Self { scores: DashMap::new(), captcha_threshold }
    }

    /// Record a cost for an address and return the new (decayed) score.
    pub fn record(&self, addr: IpAddr, cost: u64) -> u64 {
        self.record_at(addr, cost, unix_now())
    }

    /// Record a cost at an explicit timestamp.
    pub fn record_at(&self, addr: IpAddr, cost: u64, now: u64) -> u64 {
        let key = hash_addr(addr);
        let mut entry = self
            .scores
            .entry(key)
            .or_insert(ScoreEntry { score: 0, last_update: now });
        let decayed = decay(entry.score, entry.last_update, now);
        let new_score = decayed + cost;
        *entry = ScoreEntry { score: new_score, last_update: now };
        new_score
    }

    /// Current decayed score for an address.
    pub fn score(&self, addr: IpAddr) -> u64 {
        self.score_at(addr, unix_now())
    }

    /// Current decayed score at an explicit timestamp.
    pub fn score_at(&self, addr: IpAddr, now: u64) -> u64 {
        match self.scores.get(&hash_addr(addr)) {
            Some(entry) => decay(entry.score, entry.last_update, now),
            None => 0,
        }
    }

    /// Whether the address has crossed the captcha threshold.
    pub fn requires_captcha(&self, addr: IpAddr) -> bool {
        self.score(addr) >= self.captcha_threshold
    }

    /// Clear the score for an address (after a solved captcha).
    pub fn reset(&self, addr: IpAddr) {
        self.scores.remove(&hash_addr(addr));
    }

    /// Number of tracked addresses, for the metrics endpoint.
    pub fn tracked_count(&self) -> usize {
        self.scores.len()
    }

    /// Drop entries inactive longer than the stale threshold.
    pub fn cleanup(&self) {
        self.cleanup_at(unix_now());
    }

    /// Cleanup at an explicit timestamp.
    pub fn cleanup_at(&self, now: u64) {
        self.scores
            .retain(|_, entry| now.saturating_sub(entry.last_update) < STALE_SECS);
    }
}

fn decay(score: u64, last_update: u64, now: u64) -> u64 {
    let elapsed = now.saturating_sub(last_update);
    score.saturating_sub(elapsed * DECAY_PER_SEC)
}

fn hash_addr(addr: IpAddr) -> u64 {
    let mut hasher = DefaultHasher::new();
    addr.hash(&mut hasher);
    hasher.finish()
}
