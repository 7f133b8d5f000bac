//! Message router and livepost operation handlers.
//!
//! Text frames are routed by their two-digit type code, binary frames by
//! their trailing type byte. Unknown codes are logged and ignored; they are
//! never grounds for dropping the connection. Validation and resource-limit
//! failures answer with a connection-local type-0 error frame.
//!
//! The authoring lifecycle per connection:
//! `unsynced -> synced(no post) -> editing -> synced(no post)`, with the
//! `editing` entry gated by the post store allocate call and the exit by
//! close (client- or server-initiated) or reclaim-after-reconnect.

use std::sync::Arc;

use livechan_proto::{
    BinaryType, CaptchaPayload, ClosePostAnnounce, ErrorPayload, InsertPostAnnounce,
    InsertPostRequest, PostIdReply, ReclaimReply, ReclaimRequest, ServerTimePayload, SplicePayload,
    SyncCountPayload, SyncReply, SynchroniseRequest, TextType, decode_client_frame,
    decode_splice_payload, decode_text, encode_append, encode_backspace, encode_splice,
    encode_text,
};
use tracing::{debug, info, warn};

use crate::client::ClientConnection;
use crate::handlers::ws::GatewayState;
use crate::open_post::OpenPost;
use crate::spam::{COST_CHAR_APPEND, COST_POST_CREATION, COST_SPLICE_PER_CHAR};
use crate::unix_now;

/// Route a text frame to its handler.
pub async fn handle_text(state: &GatewayState, conn: &Arc<ClientConnection>, data: &str) {
    let frame = match decode_text(data) {
        Ok(frame) => frame,
        Err(_) => {
            warn!(conn_id = conn.id, "invalid text message: missing type prefix");
            return;
        }
    };

    conn.session.lock().await.touch(unix_now());

    match TextType::from_code(frame.code) {
        Some(TextType::Synchronise) => match serde_json::from_str::<SynchroniseRequest>(frame.payload) {
            Ok(req) if !req.board.is_empty() && req.thread > 0 => {
                synchronise(state, conn, req.board, req.thread).await;
            }
            _ => send_error(conn, "Invalid board or thread in synchronise"),
        },
        Some(TextType::Noop) => {
            // Keepalive, no reply.
        }
        Some(TextType::InsertPost) => match serde_json::from_str::<InsertPostRequest>(frame.payload) {
            Ok(req) => insert_post(state, conn, req).await,
            Err(_) => send_error(conn, "Invalid InsertPost payload"),
        },
        Some(TextType::ClosePost) => close_post(state, conn).await,
        Some(TextType::Reclaim) => match serde_json::from_str::<ReclaimRequest>(frame.payload) {
            Ok(req) => reclaim(state, conn, req).await,
            Err(_) => send_error(conn, "Invalid Reclaim payload"),
        },
        Some(TextType::InsertImage) => {
            send_error(conn, "Image attachment is not yet available");
        }
        _ => {
            warn!(conn_id = conn.id, code = frame.code, "unknown text message type");
        }
    }
}

/// Route a binary frame to its handler.
pub async fn handle_binary(state: &GatewayState, conn: &Arc<ClientConnection>, data: &[u8]) {
    let frame = match decode_client_frame(data) {
        Ok(frame) => frame,
        Err(_) => {
            warn!(conn_id = conn.id, "empty binary frame");
            return;
        }
    };

    conn.session.lock().await.touch(unix_now());

    match BinaryType::from_byte(frame.type_byte) {
        Some(BinaryType::Append) => {
            // Payload must be exactly one UTF-8 character.
            let Ok(text) = std::str::from_utf8(frame.payload) else {
                warn!(conn_id = conn.id, "append payload is not UTF-8");
                return;
            };
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => append(state, conn, ch).await,
                _ => warn!(conn_id = conn.id, "append payload must be a single character"),
            }
        }
        Some(BinaryType::Backspace) => backspace(state, conn).await,
        Some(BinaryType::Splice) => match decode_splice_payload(frame.payload) {
            Ok(payload) => splice(state, conn, payload).await,
            Err(e) => warn!(conn_id = conn.id, "invalid splice payload: {e}"),
        },
        None => {
            warn!(conn_id = conn.id, type_byte = frame.type_byte, "unknown binary message type");
        }
    }
}

/// Synchronise (type 30): subscribe the client to a thread feed and send the
/// snapshot it needs to reconcile its view.
async fn synchronise(state: &GatewayState, conn: &Arc<ClientConnection>, board: String, thread_id: u64) {
    let now = unix_now();

    // If already synced to a different thread, unsubscribe first.
    let previous = {
        let mut session = conn.session.lock().await;
        if session.is_synced() && session.thread_id != Some(thread_id) {
            let previous = session.thread_id;
            session.reset_sync();
            previous
        } else {
            None
        }
    };
    if previous.is_some() {
        state.registry.unsubscribe(conn.id, previous, now).await;
    }

    {
        let mut session = conn.session.lock().await;
        session.board = Some(board.clone());
        session.thread_id = Some(thread_id);
        session.synced = true;
        session.touch(now);
    }

    let feed = state.registry.subscribe(conn, thread_id).await;

    let reply = SyncReply {
        board,
        thread: thread_id,
        open_posts: feed.open_post_snapshot().await,
        active_ips: feed.active_addr_count().await,
        client_count: feed.client_count().await,
    };
    if let Ok(frame) = encode_text(TextType::Synchronise, &reply) {
        conn.send_text(frame);
    }

    // Everyone on the feed learns the new counts; batched, not latency-critical.
    let count = SyncCountPayload {
        active: feed.active_addr_count().await,
        total: feed.client_count().await,
    };
    if let Ok(frame) = encode_text(TextType::SyncCount, &count) {
        feed.queue_text_message(frame).await;
    }

    // Server time for client clock-drift calculation.
    if let Ok(frame) = encode_text(TextType::ServerTime, &ServerTimePayload { time: now }) {
        conn.send_text(frame);
    }

    info!(
        conn_id = conn.id,
        thread_id,
        clients = reply.client_count,
        "client synchronised"
    );
}

/// InsertPost (type 01): allocate an open post via the post store.
async fn insert_post(state: &GatewayState, conn: &Arc<ClientConnection>, req: InsertPostRequest) {
    let (board, thread_id) = {
        let session = conn.session.lock().await;
        if !session.is_synced() {
            send_error(conn, "Must synchronise to a thread before creating a post");
            return;
        }
        if session.open_post.is_some() {
            send_error(conn, "Already have an open post");
            return;
        }
        (
            session.board.clone().unwrap_or_default(),
            session.thread_id.unwrap_or_default(),
        )
    };

    // Post creation is the heaviest spam cost; over the threshold the client
    // has to solve a captcha before the store is touched at all.
    state.spam.record(conn.addr, COST_POST_CREATION);
    if state.spam.requires_captcha(conn.addr) {
        if let Ok(frame) = encode_text(TextType::Captcha, &CaptchaPayload { required: true }) {
            conn.send_text(frame);
        }
        send_error(conn, "Solve the captcha before posting again");
        return;
    }

    let name = req.name.unwrap_or_default();
    let password = match req.password {
        Some(p) if !p.is_empty() => p,
        _ => random_secret(),
    };

    let allocated = match state.post_store.allocate(&board, thread_id, &name, &password).await {
        Ok(allocated) => allocated,
        Err(e) => {
            send_error(conn, &e.to_string());
            warn!(conn_id = conn.id, thread_id, "insert post failed: {e}");
            return;
        }
    };

    let now = unix_now();
    {
        let mut session = conn.session.lock().await;
        // The sweeper or a reclaim may have raced the allocate call.
        if session.open_post.is_some() {
            send_error(conn, "Already have an open post");
            return;
        }
        session.open_post = Some(OpenPost::new(
            allocated.post_id,
            thread_id,
            board,
            now,
            password,
        ));
    }

    if let Ok(frame) = encode_text(
        TextType::PostId,
        &PostIdReply { id: allocated.post_id, board_post_no: allocated.board_post_no },
    ) {
        conn.send_text(frame);
    }

    if let Some(feed) = state.registry.get_feed(thread_id).await {
        let announce = InsertPostAnnounce {
            id: allocated.post_id,
            board_post_no: allocated.board_post_no,
            name,
            is_editing: true,
            body: String::new(),
            created_at: now,
        };
        if let Ok(frame) = encode_text(TextType::InsertPost, &announce) {
            feed.queue_text_message(frame).await;
        }
        feed.update_open_body(allocated.post_id, String::new()).await;
    }

    info!(conn_id = conn.id, post_id = allocated.post_id, thread_id, "open post created");
}

/// Append (binary 0x02): the keystroke hot path.
async fn append(state: &GatewayState, conn: &Arc<ClientConnection>, ch: char) {
    state.spam.record(conn.addr, COST_CHAR_APPEND);

    let applied = {
        let mut session = conn.session.lock().await;
        match session.open_post.as_mut() {
            None => {
                debug!(conn_id = conn.id, "append from client without open post");
                return;
            }
            Some(open) => {
                if !open.append(ch) {
                    None
                } else {
                    Some((open.thread_id, open.post_id, open.body().to_string()))
                }
            }
        }
    };

    let Some((thread_id, post_id, body)) = applied else {
        send_error(conn, "Post body limit reached");
        return;
    };

    match encode_append(post_id, ch) {
        Ok(frame) => {
            if let Some(feed) = state.registry.get_feed(thread_id).await {
                // Immediate binary fan-out; never buffered.
                feed.broadcast_binary(frame).await;
                feed.update_open_body(post_id, body).await;
            }
        }
        Err(e) => warn!(post_id, "append encode failed: {e}"),
    }
}

/// Backspace (binary 0x03).
async fn backspace(state: &GatewayState, conn: &Arc<ClientConnection>) {
    let applied = {
        let mut session = conn.session.lock().await;
        match session.open_post.as_mut() {
            None => {
                debug!(conn_id = conn.id, "backspace from client without open post");
                return;
            }
            Some(open) => {
                if !open.backspace() {
                    None
                } else {
                    Some((open.thread_id, open.post_id, open.body().to_string()))
                }
            }
        }
    };

    let Some((thread_id, post_id, body)) = applied else {
        send_error(conn, "Post body is empty");
        return;
    };

    match encode_backspace(post_id) {
        Ok(frame) => {
            if let Some(feed) = state.registry.get_feed(thread_id).await {
                feed.broadcast_binary(frame).await;
                feed.update_open_body(post_id, body).await;
            }
        }
        Err(e) => warn!(post_id, "backspace encode failed: {e}"),
    }
}

/// Splice (binary 0x04): arbitrary span replacement (paste, cut, autocorrect).
async fn splice(state: &GatewayState, conn: &Arc<ClientConnection>, payload: SplicePayload) {
    let cost = COST_SPLICE_PER_CHAR * (payload.text.chars().count().max(1) as u64);
    state.spam.record(conn.addr, cost);

    let applied = {
        let mut session = conn.session.lock().await;
        match session.open_post.as_mut() {
            None => {
                debug!(conn_id = conn.id, "splice from client without open post");
                return;
            }
            Some(open) => {
                if !open.splice(payload.start as usize, payload.delete_count as usize, &payload.text)
                {
                    None
                } else {
                    Some((open.thread_id, open.post_id, open.body().to_string()))
                }
            }
        }
    };

    let Some((thread_id, post_id, body)) = applied else {
        send_error(conn, "Post body limit reached");
        return;
    };

    match encode_splice(post_id, payload.start, payload.delete_count, &payload.text) {
        Ok(frame) => {
            if let Some(feed) = state.registry.get_feed(thread_id).await {
                feed.broadcast_binary(frame).await;
                feed.update_open_body(post_id, body).await;
            }
        }
        Err(e) => warn!(post_id, "splice encode failed: {e}"),
    }
}

/// ClosePost (type 05): finalize the client's open post.
async fn close_post(state: &GatewayState, conn: &Arc<ClientConnection>) {
    let open = { conn.session.lock().await.open_post.take() };
    let Some(open) = open else {
        send_error(conn, "No open post to close");
        return;
    };

    finalize_post(state, &open, true).await;
    info!(conn_id = conn.id, post_id = open.post_id, thread_id = open.thread_id, "post closed");
}

/// Shared close path for client requests, disconnects and sweeper expiry.
///
/// The caller has already detached the [`OpenPost`] from its connection, so
/// whatever the post store answers, nothing is left in the "editing" state.
pub(crate) async fn finalize_post(state: &GatewayState, open: &OpenPost, refresh_count: bool) {
    let content_html = match state.post_store.close(open.post_id).await {
        Ok(closed) => closed.content_html,
        Err(e) => {
            // Local state is already cleared; the rendered HTML is lost.
            warn!(post_id = open.post_id, "close post store call failed: {e}");
            String::new()
        }
    };

    let Some(feed) = state.registry.get_feed(open.thread_id).await else {
        return;
    };

    if let Ok(frame) =
        encode_text(TextType::ClosePost, &ClosePostAnnounce { id: open.post_id, content_html })
    {
        feed.queue_text_message(frame).await;
    }
    feed.remove_open_body(open.post_id).await;

    if refresh_count {
        let count = SyncCountPayload {
            active: feed.active_addr_count().await,
            total: feed.client_count().await,
        };
        if let Ok(frame) = encode_text(TextType::SyncCount, &count) {
            feed.queue_text_message(frame).await;
        }
    }
}

/// Reclaim (type 31): resume an open post after a disconnect.
async fn reclaim(state: &GatewayState, conn: &Arc<ClientConnection>, req: ReclaimRequest) {
    {
        let session = conn.session.lock().await;
        if !session.is_synced() {
            send_error(conn, "Must synchronise before reclaiming");
            return;
        }
        if session.open_post.is_some() {
            send_error(conn, "Already have an open post");
            return;
        }
    }

    if req.id == 0 || req.password.is_empty() {
        send_error(conn, "Post ID and password required");
        return;
    }

    let reclaimed = match state.post_store.reclaim(req.id, &req.password).await {
        Ok(reclaimed) => reclaimed,
        Err(e) => {
            send_error(conn, &e.to_string());
            info!(conn_id = conn.id, post_id = req.id, "reclaim failed: {e}");
            return;
        }
    };

    let now = unix_now();
    let cache_thread = {
        let mut session = conn.session.lock().await;
        if session.open_post.is_some() {
            send_error(conn, "Already have an open post");
            return;
        }
        let board = session.board.clone().unwrap_or_default();
        let mut open = OpenPost::new(req.id, reclaimed.thread_id, board, now, req.password.clone());
        open.restore_body(reclaimed.body.clone());
        session.open_post = Some(open);
        session.thread_id
    };

    if let Ok(frame) =
        encode_text(TextType::Reclaim, &ReclaimReply { id: req.id, body: reclaimed.body.clone() })
    {
        conn.send_text(frame);
    }

    if let Some(thread_id) = cache_thread {
        if let Some(feed) = state.registry.get_feed(thread_id).await {
            feed.update_open_body(req.id, reclaimed.body).await;
        }
    }

    info!(conn_id = conn.id, post_id = req.id, thread_id = reclaimed.thread_id, "post reclaimed");
}

/// Disconnect cleanup: force-close any open post, unsubscribe, release the
/// address slot.
pub async fn disconnect_cleanup(state: &GatewayState, conn: &Arc<ClientConnection>) {
    let now = unix_now();
    let (thread_id, open) = {
        let mut session = conn.session.lock().await;
        (session.thread_id, session.open_post.take())
    };

    if let Some(open) = open {
        finalize_post(state, &open, false).await;
        info!(post_id = open.post_id, thread_id = open.thread_id, "post force-closed on disconnect");
    }

    state.registry.unsubscribe(conn.id, thread_id, now).await;
    state.registry.unregister_connection(conn).await;
}

/// Send a connection-local error frame (type 0).
pub(crate) fn send_error(conn: &ClientConnection, message: &str) {
    if let Ok(frame) = encode_text(TextType::Error, &ErrorPayload { error: message.to_string() }) {
        conn.send_text(frame);
    }
}

fn random_secret() -> String {
    use rand::{Rng, distributions::Alphanumeric};
    rand::thread_rng().sample_iter(&Alphanumeric).take(32).map(char::from).collect()
}
