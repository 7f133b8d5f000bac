//! Registry of active per-thread feeds and connection accounting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::client::{ClientConnection, ConnId};
use crate::feed::ThreadFeed;

/// Gateway-wide counters for the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub feeds: usize,
    pub connections: usize,
    pub unique_addrs: usize,
}

/// Owns every [`ThreadFeed`] plus per-source-address connection accounting.
///
/// Feeds are created on first subscriber and only ever destroyed by the
/// sweeper; unsubscribing the last client deliberately leaves the feed in
/// place so rapid reconnects don't thrash feed construction.
pub struct FeedRegistry {
    feeds: RwLock<HashMap<u64, Arc<ThreadFeed>>>,
    connections: RwLock<HashMap<ConnId, Arc<ClientConnection>>>,
    addr_counts: RwLock<HashMap<IpAddr, usize>>,
    max_connections_per_addr: usize,
    flush_interval: Duration,
}

impl FeedRegistry {
    pub fn new(max_connections_per_addr: usize, flush_interval: Duration) -> Self {
        Self {
            feeds: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            addr_counts: RwLock::new(HashMap::new()),
            max_connections_per_addr,
            flush_interval,
        }
    }

    /// Get or create the feed for a thread.
    pub async fn get_or_create(&self, thread_id: u64) -> Arc<ThreadFeed> {
        // Fast path under the read lock.
        {
            let feeds = self.feeds.read().await;
            if let Some(feed) = feeds.get(&thread_id) {
                return feed.clone();
            }
        }

        let mut feeds = self.feeds.write().await;
        // Double-check after acquiring the write lock.
        if let Some(feed) = feeds.get(&thread_id) {
            return feed.clone();
        }

        let feed = Arc::new(ThreadFeed::new(thread_id, self.flush_interval));
        feeds.insert(thread_id, feed.clone());
        debug!(thread_id, "thread feed created");
        feed
    }

    /// Get a feed if it exists.
    pub async fn get_feed(&self, thread_id: u64) -> Option<Arc<ThreadFeed>> {
        self.feeds.read().await.get(&thread_id).cloned()
    }

    /// Remove and destroy a feed.
    pub async fn remove(&self, thread_id: u64) {
        let removed = self.feeds.write().await.remove(&thread_id);
        if let Some(feed) = removed {
            feed.destroy().await;
            debug!(thread_id, "thread feed removed");
        }
    }

    /// Handshake-time gate: reject when the source address already holds the
    /// per-address connection cap, otherwise count the new connection.
    ///
    /// Every accepted registration must be paired with exactly one
    /// [`unregister_connection`](Self::unregister_connection) at close.
    pub async fn register_address(&self, addr: IpAddr) -> bool {
        let mut counts = self.addr_counts.write().await;
        let count = counts.entry(addr).or_insert(0);
        if *count >= self.max_connections_per_addr {
            warn!(%addr, count = *count, "address connection limit exceeded");
            return false;
        }
        *count += 1;
        true
    }

    /// Record an upgraded connection's handle.
    pub async fn attach_connection(&self, conn: Arc<ClientConnection>) {
        self.connections.write().await.insert(conn.id, conn);
    }

    /// Drop a closed connection and decrement its address counter, removing
    /// the counter entry entirely at zero.
    pub async fn unregister_connection(&self, conn: &ClientConnection) {
        self.connections.write().await.remove(&conn.id);

        let mut counts = self.addr_counts.write().await;
        if let Some(count) = counts.get_mut(&conn.addr) {
            if *count <= 1 {
                counts.remove(&conn.addr);
            } else {
                *count -= 1;
            }
        }
    }

    /// Subscribe a connection to a thread feed, creating it if needed.
    pub async fn subscribe(
        &self,
        conn: &Arc<ClientConnection>,
        thread_id: u64,
    ) -> Arc<ThreadFeed> {
        let feed = self.get_or_create(thread_id).await;
        feed.add_client(conn.clone()).await;
        feed
    }

    /// Unsubscribe a connection from its feed. An empty feed is left for the
    /// sweeper rather than destroyed immediately.
    pub async fn unsubscribe(&self, conn_id: ConnId, thread_id: Option<u64>, now: u64) {
        let Some(thread_id) = thread_id else {
            return;
        };
        let Some(feed) = self.get_feed(thread_id).await else {
            return;
        };
        if feed.remove_client(conn_id, now).await {
            debug!(thread_id, "thread feed now empty, eligible for sweep");
        }
    }

    /// All current feeds, for the sweeper.
    pub async fn all_feeds(&self) -> Vec<(u64, Arc<ThreadFeed>)> {
        self.feeds.read().await.iter().map(|(&id, f)| (id, f.clone())).collect()
    }

    /// All current connections, for the sweeper's expired-post pass.
    pub async fn connections(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            feeds: self.feeds.read().await.len(),
            connections: self.connections.read().await.len(),
            unique_addrs: self.addr_counts.read().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    fn registry() -> FeedRegistry {
        FeedRegistry::new(2, Duration::from_millis(100))
    }

    fn conn(id: ConnId, addr: &str) -> (Arc<ClientConnection>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ClientConnection::new(id, addr.parse().unwrap(), 0, tx)), rx)
    }

    #[tokio::test]
    async fn address_cap_is_enforced_and_released() {
        let registry = registry();
        let addr: IpAddr = "203.0.113.9".parse().unwrap();

        assert!(registry.register_address(addr).await);
        assert!(registry.register_address(addr).await);
        assert!(!registry.register_address(addr).await, "third connection is over the cap");

        // Another address is unaffected.
        assert!(registry.register_address("203.0.113.10".parse().unwrap()).await);

        // Releasing one slot lets the address connect again.
        let (c, _rx) = conn(1, "203.0.113.9");
        registry.attach_connection(c.clone()).await;
        registry.unregister_connection(&c).await;
        assert!(registry.register_address(addr).await);
    }

    #[tokio::test]
    async fn zero_count_entries_are_removed() {
        let registry = registry();
        let (c, _rx) = conn(1, "203.0.113.9");
        assert!(registry.register_address(c.addr).await);
        registry.attach_connection(c.clone()).await;

        assert_eq!(registry.stats().await.unique_addrs, 1);
        registry.unregister_connection(&c).await;
        assert_eq!(registry.stats().await.unique_addrs, 0, "no stale zero entries");
    }

    #[tokio::test]
    async fn get_or_create_returns_same_feed() {
        let registry = registry();
        let a = registry.get_or_create(7).await;
        let b = registry.get_or_create(7).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.stats().await.feeds, 1);
    }

    #[tokio::test]
    async fn unsubscribe_leaves_empty_feed_for_sweeper() {
        let registry = registry();
        let (c, _rx) = conn(1, "203.0.113.9");
        let feed = registry.subscribe(&c, 7).await;
        assert_eq!(feed.client_count().await, 1);

        registry.unsubscribe(c.id, Some(7), 5_000).await;
        assert_eq!(feed.client_count().await, 0);
        assert!(registry.get_feed(7).await.is_some(), "eviction is the sweeper's job");
        assert_eq!(feed.idle_since(), 5_000);
    }

    #[tokio::test]
    async fn remove_destroys_feed() {
        let registry = registry();
        registry.get_or_create(7).await;
        registry.remove(7).await;
        assert!(registry.get_feed(7).await.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_without_thread_is_a_noop() {
        let registry = registry();
        let (c, _rx) = conn(1, "203.0.113.9");
        registry.unsubscribe(c.id, None, 0).await;
        registry.unsubscribe(c.id, Some(99), 0).await;
    }
}
