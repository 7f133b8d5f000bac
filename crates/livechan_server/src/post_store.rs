//! Post store collaborator: the external service owning persistent posts.
//!
//! The gateway only ever needs three operations from it (allocate an open
//! post, finalize one, reclaim one after a disconnect), so the contract is
//! exactly those three, behind a trait so tests can substitute an in-memory
//! double for the HTTP client.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// A post store call failure.
///
/// Either kind is relayed to the client as an error message; neither ever
/// tears down the connection or the worker.
#[derive(Debug, Error)]
pub enum PostStoreError {
    /// The store processed the request and said no (bad password, locked
    /// thread, ...). The message is relayed to the client verbatim.
    #[error("{0}")]
    Rejected(String),
    /// The store could not be reached or answered garbage.
    #[error("post store unavailable: {0}")]
    Unavailable(String),
}

/// Result of allocating an open post.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocatedPost {
    pub post_id: u64,
    pub board_post_no: Option<u64>,
}

/// Result of finalizing a post.
#[derive(Debug, Clone, Deserialize)]
pub struct ClosedPost {
    pub content_html: String,
}

/// Result of reclaiming a post.
#[derive(Debug, Clone, Deserialize)]
pub struct ReclaimedPost {
    pub thread_id: u64,
    pub body: String,
}

/// The three operations the gateway needs from the post store.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Allocate an open post in a thread. The password authenticates a later
    /// reclaim.
    async fn allocate(
        &self,
        board: &str,
        thread_id: u64,
        name: &str,
        password: &str,
    ) -> Result<AllocatedPost, PostStoreError>;

    /// Finalize a post, obtaining its rendered HTML.
    async fn close(&self, post_id: u64) -> Result<ClosedPost, PostStoreError>;

    /// Resume ownership of an open post after a disconnect.
    async fn reclaim(&self, post_id: u64, password: &str) -> Result<ReclaimedPost, PostStoreError>;
}

#[derive(Debug, Deserialize)]
struct StoreErrorBody {
    error: String,
}

/// HTTP client for the real post store service.
pub struct HttpPostStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPostStore {
    pub fn new(base_url: String, timeout: std::time::Duration) -> Result<Self, PostStoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PostStoreError::Unavailable(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    /// POST a JSON body and decode the reply, mapping non-2xx responses to
    /// [`PostStoreError::Rejected`] with the store's own error message.
    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, PostStoreError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PostStoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<StoreErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => format!("post store returned {status}"),
            };
            return Err(PostStoreError::Rejected(message));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PostStoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl PostStore for HttpPostStore {
    async fn allocate(
        &self,
        board: &str,
        thread_id: u64,
        name: &str,
        password: &str,
    ) -> Result<AllocatedPost, PostStoreError> {
        self.post_json(
            &format!("/api/v1/boards/{board}/threads/{thread_id}/open-post"),
            json!({ "name": name, "password": password }),
        )
        .await
    }

    async fn close(&self, post_id: u64) -> Result<ClosedPost, PostStoreError> {
        self.post_json(&format!("/api/v1/posts/{post_id}/close"), json!({})).await
    }

    async fn reclaim(&self, post_id: u64, password: &str) -> Result<ReclaimedPost, PostStoreError> {
        self.post_json(
            &format!("/api/v1/posts/{post_id}/reclaim"),
            json!({ "password": password }),
        )
        .await
    }
}

#[derive(Debug, Clone)]
struct StoredPost {
    thread_id: u64,
    password: String,
    body: String,
    closed: bool,
}

/// In-memory post store for tests and local development.
pub struct MemoryPostStore {
    posts: Mutex<HashMap<u64, StoredPost>>,
    next_id: AtomicU64,
}

impl Default for MemoryPostStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self { posts: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Record the latest body for a post, mirroring what the real store
    /// learns when the gateway closes or persists it.
    pub fn set_body(&self, post_id: u64, body: &str) {
        if let Ok(mut posts) = self.posts.lock() {
            if let Some(post) = posts.get_mut(&post_id) {
                post.body = body.to_string();
            }
        }
    }

    pub fn is_closed(&self, post_id: u64) -> bool {
        self.posts
            .lock()
            .map(|posts| posts.get(&post_id).is_some_and(|p| p.closed))
            .unwrap_or(false)
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn allocate(
        &self,
        _board: &str,
        thread_id: u64,
        _name: &str,
        password: &str,
    ) -> Result<AllocatedPost, PostStoreError> {
        let post_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut posts = self
            .posts
            .lock()
            .map_err(|_| PostStoreError::Unavailable("store poisoned".into()))?;
        posts.insert(
            post_id,
            StoredPost {
                thread_id,
                password: password.to_string(),
                body: String::new(),
                closed: false,
            },
        );
        Ok(AllocatedPost { post_id, board_post_no: Some(post_id) })
    }

    async fn close(&self, post_id: u64) -> Result<ClosedPost, PostStoreError> {
        let mut posts = self
            .posts
            .lock()
            .map_err(|_| PostStoreError::Unavailable("store poisoned".into()))?;
        let post = posts
            .get_mut(&post_id)
            .ok_or_else(|| PostStoreError::Rejected("No such open post".into()))?;
        post.closed = true;
        Ok(ClosedPost { content_html: format!("<p>{}</p>", post.body) })
    }

    async fn reclaim(&self, post_id: u64, password: &str) -> Result<ReclaimedPost, PostStoreError> {
        let posts = self
            .posts
            .lock()
            .map_err(|_| PostStoreError::Unavailable("store poisoned".into()))?;
        let post = posts
            .get(&post_id)
            .ok_or_else(|| PostStoreError::Rejected("No such open post".into()))?;
        if post.closed {
            return Err(PostStoreError::Rejected("Post is already closed".into()));
        }
        if post.password != password {
            return Err(PostStoreError::Rejected("Invalid reclaim password".into()));
        }
        Ok(ReclaimedPost { thread_id: post.thread_id, body: post.body.clone() })
    }
}
