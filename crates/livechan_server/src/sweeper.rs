//! Periodic janitor: force-closes expired open posts and evicts idle feeds.
//!
//! Runs on a fixed period independent of any connection's activity. Both
//! duties are best-effort; a post store failure during a force-close is
//! logged and local state is still cleared so no post is ever left dangling
//! in the editing state past its deadline.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::handlers::livepost;
use crate::handlers::ws::GatewayState;
use crate::unix_now;

/// Spawn the sweep loop.
pub fn spawn(state: GatewayState, period: Duration, idle_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(period_secs = period.as_secs(), idle_secs, "sweeper started");
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately; skip it so sweeps start one
        // full period after boot.
        interval.tick().await;
        loop {
            interval.tick().await;
            sweep(&state, idle_secs, unix_now()).await;
        }
    })
}

/// One sweep pass at an explicit timestamp.
pub async fn sweep(state: &GatewayState, idle_secs: u64, now: u64) {
    // 1. Force-close expired open posts, identical in effect to a
    //    client-initiated ClosePost.
    let mut expired_posts = 0usize;
    for conn in state.registry.connections().await {
        let expired = {
            let mut session = conn.session.lock().await;
            match &session.open_post {
                Some(open) if open.is_expired_at(now) => session.open_post.take(),
                _ => None,
            }
        };
        if let Some(open) = expired {
            warn!(
                post_id = open.post_id,
                conn_id = conn.id,
                "force-closing expired open post"
            );
            livepost::finalize_post(state, &open, true).await;
            expired_posts += 1;
        }
    }

    // 2. Evict feeds idle past the threshold.
    let mut evicted_feeds = 0usize;
    for (thread_id, feed) in state.registry.all_feeds().await {
        let idle_since = feed.idle_since();
        if idle_since > 0 && now.saturating_sub(idle_since) >= idle_secs {
            state.registry.remove(thread_id).await;
            evicted_feeds += 1;
        }
    }

    if expired_posts > 0 || evicted_feeds > 0 {
        info!(expired_posts, evicted_feeds, "sweep completed");
    }
}
