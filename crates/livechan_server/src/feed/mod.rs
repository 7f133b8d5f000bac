//! Per-thread broadcast feeds.

mod buffer;
mod registry;

pub use buffer::MessageBuffer;
pub use registry::{FeedRegistry, RegistryStats};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use livechan_proto::{OpenPostSnapshot, encode_concat};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::client::{ClientConnection, ConnId};

/// Buffer plus its flush task handle, guarded together so a tick deciding to
/// stop can never race a concurrent enqueue.
struct FlushState {
    buffer: MessageBuffer,
    task: Option<JoinHandle<()>>,
}

/// Per-thread subscriber set and message broadcaster.
///
/// Each active thread with at least one subscriber gets a feed. The feed
/// owns the subscriber map, an in-memory cache of open post bodies (serving
/// instant sync to new subscribers without touching the post store), and a
/// text message buffer flushed on a fixed tick. Binary keystroke frames
/// bypass the buffer entirely and fan out immediately.
pub struct ThreadFeed {
    thread_id: u64,
    clients: RwLock<HashMap<ConnId, Arc<ClientConnection>>>,
    open_bodies: RwLock<HashMap<u64, String>>,
    flush_state: Mutex<FlushState>,
    /// Guard against a slow flush overlapping the next tick.
    flushing: AtomicBool,
    /// Unix timestamp when the last subscriber left; 0 while any remain.
    idle_since: AtomicU64,
    flush_interval: Duration,
}

impl ThreadFeed {
    pub fn new(thread_id: u64, flush_interval: Duration) -> Self {
        Self {
            thread_id,
            clients: RwLock::new(HashMap::new()),
            open_bodies: RwLock::new(HashMap::new()),
            flush_state: Mutex::new(FlushState { buffer: MessageBuffer::new(), task: None }),
            flushing: AtomicBool::new(false),
            idle_since: AtomicU64::new(0),
            flush_interval,
        }
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    /// Add a subscriber. Resets the idle clock.
    pub async fn add_client(&self, conn: Arc<ClientConnection>) {
        let mut clients = self.clients.write().await;
        clients.insert(conn.id, conn);
        self.idle_since.store(0, Ordering::Release);
    }

    /// Remove a subscriber. Returns true if the feed is now empty, in which
    /// case the idle clock starts and the sweeper may evict it later.
    pub async fn remove_client(&self, id: ConnId, now: u64) -> bool {
        let mut clients = self.clients.write().await;
        clients.remove(&id);
        if clients.is_empty() {
            self.idle_since.store(now, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Count unique source addresses across subscribers.
    pub async fn active_addr_count(&self) -> usize {
        let clients = self.clients.read().await;
        clients.values().map(|c| c.addr).collect::<HashSet<_>>().len()
    }

    /// Unix timestamp when the feed became idle, 0 if it has subscribers.
    pub fn idle_since(&self) -> u64 {
        self.idle_since.load(Ordering::Acquire)
    }

    /// Broadcast a binary frame to every subscriber immediately.
    ///
    /// The keystroke hot path: no buffering, no batching. Subscribers whose
    /// socket task has gone away are pruned silently.
    pub async fn broadcast_binary(&self, frame: Vec<u8>) {
        let dead: Vec<ConnId> = {
            let clients = self.clients.read().await;
            clients
                .iter()
                .filter(|(_, conn)| !conn.send_binary(frame.clone()))
                .map(|(id, _)| *id)
                .collect()
        };
        self.prune(dead).await;
    }

    /// Broadcast a text frame to every subscriber immediately.
    pub async fn broadcast_text(&self, frame: String) {
        let dead: Vec<ConnId> = {
            let clients = self.clients.read().await;
            clients
                .iter()
                .filter(|(_, conn)| !conn.send_text(frame.clone()))
                .map(|(id, _)| *id)
                .collect()
        };
        self.prune(dead).await;
    }

    async fn prune(&self, dead: Vec<ConnId>) {
        if dead.is_empty() {
            return;
        }
        let mut clients = self.clients.write().await;
        for id in dead {
            clients.remove(&id);
            debug!(thread_id = self.thread_id, conn_id = id, "pruned dead subscriber");
        }
    }

    /// Queue a text frame for batched flushing, starting the flush task if it
    /// is not already running.
    pub async fn queue_text_message(self: &Arc<Self>, message: String) {
        let mut state = self.flush_state.lock().await;
        state.buffer.push(message);

        let running = state.task.as_ref().is_some_and(|task| !task.is_finished());
        if !running {
            let feed = Arc::clone(self);
            state.task = Some(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(feed.flush_interval).await;
                    if !feed.flush_tick().await {
                        break;
                    }
                }
            }));
        }
    }

    /// One timer tick: stop the task on an empty buffer, otherwise flush.
    /// Returns false when the task should exit.
    async fn flush_tick(&self) -> bool {
        {
            let mut state = self.flush_state.lock().await;
            if state.buffer.is_empty() {
                // Nothing to flush, so stop ticking. The next enqueue
                // restarts the task.
                state.task = None;
                return false;
            }
        }
        self.flush().await;
        true
    }

    /// Flush the message buffer to all subscribers.
    ///
    /// A single queued message is broadcast as-is; two or more are wrapped
    /// into one Concat frame (type 33) in enqueue order. If a previous flush
    /// is still executing the call is skipped entirely, never queued.
    pub async fn flush(&self) {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let mut drained = {
            let mut state = self.flush_state.lock().await;
            state.buffer.drain()
        };

        if drained.len() == 1 {
            self.broadcast_text(drained.remove(0)).await;
        } else if drained.len() > 1 {
            match encode_concat(&drained) {
                Ok(frame) => self.broadcast_text(frame).await,
                Err(e) => {
                    error!(thread_id = self.thread_id, "concat encode failed: {e}");
                }
            }
        }

        self.flushing.store(false, Ordering::Release);
    }

    /// Update the cached body of an open post.
    pub async fn update_open_body(&self, post_id: u64, body: String) {
        self.open_bodies.write().await.insert(post_id, body);
    }

    /// Drop an open post body from the cache (closed or expired).
    pub async fn remove_open_body(&self, post_id: u64) {
        self.open_bodies.write().await.remove(&post_id);
    }

    /// Snapshot of all open post bodies for a newly-connecting subscriber.
    pub async fn open_post_snapshot(&self) -> Vec<OpenPostSnapshot> {
        let bodies = self.open_bodies.read().await;
        let mut posts: Vec<OpenPostSnapshot> = bodies
            .iter()
            .map(|(&id, body)| OpenPostSnapshot { id, body: body.clone() })
            .collect();
        posts.sort_by_key(|p| p.id);
        posts
    }

    /// Stop the flush task, drain the buffer and clear all maps. Must be
    /// called before the feed is discarded so no timer callback outlives it.
    pub async fn destroy(&self) {
        {
            let mut state = self.flush_state.lock().await;
            if let Some(task) = state.task.take() {
                task.abort();
            }
            state.buffer.clear();
        }
        self.clients.write().await.clear();
        self.open_bodies.write().await.clear();
        debug!(thread_id = self.thread_id, "thread feed destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    fn test_client(id: ConnId) -> (Arc<ClientConnection>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(ClientConnection::new(id, "127.0.0.1".parse().unwrap(), 0, tx)),
            rx,
        )
    }

    fn recv_text(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<String> {
        match rx.try_recv() {
            Ok(Message::Text(text)) => Some(text.to_string()),
            _ => None,
        }
    }

    // =========================================================================
    // Flush batching
    // =========================================================================

    #[tokio::test]
    async fn flush_wraps_multiple_messages_in_concat() {
        let feed = Arc::new(ThreadFeed::new(7, Duration::from_millis(100)));
        let (client, mut rx) = test_client(1);
        feed.add_client(client).await;

        feed.queue_text_message(r#"01{"id":1}"#.to_string()).await;
        feed.queue_text_message(r#"05{"id":1}"#.to_string()).await;
        feed.flush().await;

        let frame = recv_text(&mut rx).expect("one frame after flush");
        assert_eq!(frame, r#"33["01{\"id\":1}","05{\"id\":1}"]"#);
        assert!(rx.try_recv().is_err(), "exactly one frame, not one per message");
    }

    #[tokio::test]
    async fn flush_sends_single_message_unwrapped() {
        let feed = Arc::new(ThreadFeed::new(7, Duration::from_millis(100)));
        let (client, mut rx) = test_client(1);
        feed.add_client(client).await;

        feed.queue_text_message("34".to_string()).await;
        feed.flush().await;

        assert_eq!(recv_text(&mut rx).as_deref(), Some("34"));
    }

    #[tokio::test]
    async fn flush_with_empty_buffer_sends_nothing() {
        let feed = Arc::new(ThreadFeed::new(7, Duration::from_millis(100)));
        let (client, mut rx) = test_client(1);
        feed.add_client(client).await;

        feed.flush().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn flush_task_delivers_without_manual_flush() {
        let feed = Arc::new(ThreadFeed::new(7, Duration::from_millis(10)));
        let (client, mut rx) = test_client(1);
        feed.add_client(client).await;

        feed.queue_text_message("34".to_string()).await;

        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("flush task must deliver within the timeout")
            .expect("channel open");
    }

    #[tokio::test]
    async fn flush_task_stops_once_buffer_is_empty_and_restarts() {
        let feed = Arc::new(ThreadFeed::new(7, Duration::from_millis(5)));
        let (client, mut rx) = test_client(1);
        feed.add_client(client).await;

        feed.queue_text_message("34".to_string()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Task has flushed and then stopped on the idle tick.
        {
            let state = feed.flush_state.lock().await;
            assert!(state.task.as_ref().is_none_or(|t| t.is_finished()));
        }

        // A new enqueue restarts it.
        feed.queue_text_message("34".to_string()).await;
        tokio::time::timeout(Duration::from_secs(1), async {
            rx.recv().await;
            rx.recv().await;
        })
        .await
        .expect("second flush after restart");
    }

    // =========================================================================
    // Subscribers / idle clock
    // =========================================================================

    #[tokio::test]
    async fn idle_clock_tracks_last_subscriber() {
        let feed = Arc::new(ThreadFeed::new(7, Duration::from_millis(100)));
        assert_eq!(feed.idle_since(), 0);

        let (a, _rx_a) = test_client(1);
        let (b, _rx_b) = test_client(2);
        feed.add_client(a).await;
        feed.add_client(b).await;
        assert_eq!(feed.idle_since(), 0);

        assert!(!feed.remove_client(1, 5_000).await);
        assert_eq!(feed.idle_since(), 0);

        assert!(feed.remove_client(2, 6_000).await);
        assert_eq!(feed.idle_since(), 6_000);

        // Re-adding resets the clock.
        let (c, _rx_c) = test_client(3);
        feed.add_client(c).await;
        assert_eq!(feed.idle_since(), 0);
    }

    #[tokio::test]
    async fn broadcast_prunes_dead_subscribers() {
        let feed = Arc::new(ThreadFeed::new(7, Duration::from_millis(100)));
        let (alive, mut rx_alive) = test_client(1);
        let (dead, rx_dead) = test_client(2);
        feed.add_client(alive).await;
        feed.add_client(dead).await;
        drop(rx_dead);

        feed.broadcast_binary(vec![0x03]).await;

        assert_eq!(feed.client_count().await, 1);
        assert!(matches!(rx_alive.try_recv(), Ok(Message::Binary(_))));
    }

    #[tokio::test]
    async fn unique_addr_count_deduplicates() {
        let feed = Arc::new(ThreadFeed::new(7, Duration::from_millis(100)));
        let (tx, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let (tx3, _rx3) = mpsc::unbounded_channel();
        feed.add_client(Arc::new(ClientConnection::new(1, "10.0.0.1".parse().unwrap(), 0, tx)))
            .await;
        feed.add_client(Arc::new(ClientConnection::new(2, "10.0.0.1".parse().unwrap(), 0, tx2)))
            .await;
        feed.add_client(Arc::new(ClientConnection::new(3, "10.0.0.2".parse().unwrap(), 0, tx3)))
            .await;

        assert_eq!(feed.client_count().await, 3);
        assert_eq!(feed.active_addr_count().await, 2);
    }

    // =========================================================================
    // Open body cache
    // =========================================================================

    #[tokio::test]
    async fn open_body_cache_round_trips() {
        let feed = Arc::new(ThreadFeed::new(7, Duration::from_millis(100)));
        feed.update_open_body(12, "hel".to_string()).await;
        feed.update_open_body(9, String::new()).await;
        feed.update_open_body(12, "hell".to_string()).await;

        let snapshot = feed.open_post_snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, 9);
        assert_eq!(snapshot[1].id, 12);
        assert_eq!(snapshot[1].body, "hell");

        feed.remove_open_body(12).await;
        assert_eq!(feed.open_post_snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn destroy_clears_everything() {
        let feed = Arc::new(ThreadFeed::new(7, Duration::from_millis(100)));
        let (client, _rx) = test_client(1);
        feed.add_client(client).await;
        feed.update_open_body(1, "x".to_string()).await;
        feed.queue_text_message("34".to_string()).await;

        feed.destroy().await;

        assert_eq!(feed.client_count().await, 0);
        assert!(feed.open_post_snapshot().await.is_empty());
        let state = feed.flush_state.lock().await;
        assert!(state.buffer.is_empty());
        assert!(state.task.is_none());
    }
}
