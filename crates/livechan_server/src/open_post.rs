//! State of an open (actively being edited) post.
//!
//! An open post is allocated in the post store when a user starts typing and
//! lives in gateway memory until it is explicitly closed, times out, or its
//! author disconnects without reclaiming it. The body only ever changes
//! through [`OpenPost::append`], [`OpenPost::backspace`] and
//! [`OpenPost::splice`]; every mutation is all-or-nothing so the derived
//! counters never drift from the body.

/// Maximum body length in characters (code points).
pub const MAX_BODY_CHARS: usize = 2000;

/// Maximum number of newlines in a post body.
pub const MAX_LINE_COUNT: usize = 100;

/// Maximum open post lifetime in seconds (15 minutes).
pub const MAX_LIFETIME_SECS: u64 = 900;

/// An in-progress post owned by exactly one connection.
#[derive(Debug, Clone)]
pub struct OpenPost {
    /// Post id assigned by the post store.
    pub post_id: u64,
    /// Parent thread id.
    pub thread_id: u64,
    /// Board slug.
    pub board: String,
    body: String,
    char_count: usize,
    line_count: usize,
    /// Unix timestamp of post allocation.
    pub created_at: u64,
    /// Secret required to reclaim this post after a disconnect.
    pub reclaim_secret: String,
}

impl OpenPost {
    pub fn new(
        post_id: u64,
        thread_id: u64,
        board: String,
        created_at: u64,
        reclaim_secret: String,
    ) -> Self {
        Self {
            post_id,
            thread_id,
            board,
            body: String::new(),
            char_count: 0,
            line_count: 0,
            created_at,
            reclaim_secret,
        }
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn char_count(&self) -> usize {
        self.char_count
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// Whether the body has reached the character ceiling.
    pub fn is_body_full(&self) -> bool {
        self.char_count >= MAX_BODY_CHARS
    }

    /// Whether the body has reached the newline ceiling.
    pub fn has_max_lines(&self) -> bool {
        self.line_count >= MAX_LINE_COUNT
    }

    /// Whether the post has exceeded its maximum open lifetime at `now`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) >= MAX_LIFETIME_SECS
    }

    /// Append a character. Returns `false` (body unchanged) if the character
    /// ceiling is reached, or the character is a newline and the line ceiling
    /// is reached.
    pub fn append(&mut self, ch: char) -> bool {
        if self.is_body_full() {
            return false;
        }
        if ch == '\n' {
            if self.has_max_lines() {
                return false;
            }
            self.line_count += 1;
        }
        self.body.push(ch);
        self.char_count += 1;
        true
    }

    /// Remove the last character. Returns `false` if the body is empty.
    pub fn backspace(&mut self) -> bool {
        let Some(removed) = self.body.pop() else {
            return false;
        };
        self.char_count -= 1;
        if removed == '\n' {
            self.line_count -= 1;
        }
        true
    }

    /// Replace `delete_count` code points at `start` with `text`.
    ///
    /// Offsets are code-point offsets; a `start` past the end clamps to the
    /// end and an oversized `delete_count` clamps to the remaining tail.
    /// Returns `false` (body unchanged) when the *resulting* body would
    /// exceed the character or line ceiling.
    pub fn splice(&mut self, start: usize, delete_count: usize, text: &str) -> bool {
        let chars: Vec<char> = self.body.chars().collect();
        let start = start.min(chars.len());
        let end = start.saturating_add(delete_count).min(chars.len());

        let mut new_body = String::with_capacity(self.body.len() + text.len());
        new_body.extend(&chars[..start]);
        new_body.push_str(text);
        new_body.extend(&chars[end..]);

        let new_char_count = new_body.chars().count();
        if new_char_count > MAX_BODY_CHARS {
            return false;
        }
        let new_line_count = new_body.bytes().filter(|&b| b == b'\n').count();
        if new_line_count > MAX_LINE_COUNT {
            return false;
        }

        self.body = new_body;
        self.char_count = new_char_count;
        self.line_count = new_line_count;
        true
    }

    /// Replace the body wholesale with state recovered from the post store
    /// during a reclaim, recomputing both counters.
    pub fn restore_body(&mut self, body: String) {
        self.char_count = body.chars().count();
        self.line_count = body.bytes().filter(|&b| b == b'\n').count();
        self.body = body;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> OpenPost {
        OpenPost::new(1, 7, "g".into(), 1_000, "secret".into())
    }

    fn assert_counters_consistent(p: &OpenPost) {
        assert_eq!(p.char_count(), p.body().chars().count());
        assert_eq!(p.line_count(), p.body().bytes().filter(|&b| b == b'\n').count());
    }

    // =========================================================================
    // Append / Backspace
    // =========================================================================

    #[test]
    fn append_then_backspace_is_identity() {
        let mut p = post();
        assert!(p.splice(0, 0, "base"));
        let before = p.body().to_string();

        assert!(p.append('x'));
        assert!(p.backspace());
        assert_eq!(p.body(), before);
        assert_counters_consistent(&p);
    }

    #[test]
    fn append_rejects_at_char_ceiling() {
        let mut p = post();
        let filler = "a".repeat(MAX_BODY_CHARS);
        assert!(p.splice(0, 0, &filler));
        assert!(p.is_body_full());

        assert!(!p.append('x'));
        assert_eq!(p.char_count(), MAX_BODY_CHARS);
        assert_counters_consistent(&p);
    }

    #[test]
    fn append_newline_rejects_at_line_ceiling() {
        let mut p = post();
        let lines = "\n".repeat(MAX_LINE_COUNT);
        assert!(p.splice(0, 0, &lines));

        assert!(!p.append('\n'));
        // Ordinary characters still fit.
        assert!(p.append('x'));
        assert_counters_consistent(&p);
    }

    #[test]
    fn backspace_on_empty_body_fails() {
        let mut p = post();
        assert!(!p.backspace());
        assert_eq!(p.char_count(), 0);
    }

    #[test]
    fn backspace_decrements_line_count_for_newlines() {
        let mut p = post();
        assert!(p.append('a'));
        assert!(p.append('\n'));
        assert_eq!(p.line_count(), 1);

        assert!(p.backspace());
        assert_eq!(p.line_count(), 0);
        assert_eq!(p.body(), "a");
    }

    #[test]
    fn multibyte_chars_count_as_one() {
        let mut p = post();
        assert!(p.append('語'));
        assert_eq!(p.char_count(), 1);
        assert!(p.backspace());
        assert_eq!(p.body(), "");
        assert_counters_consistent(&p);
    }

    // =========================================================================
    // Splice
    // =========================================================================

    #[test]
    fn splice_of_entire_body_with_empty_text_clears_it() {
        let mut p = post();
        assert!(p.splice(0, 0, "hello\nworld"));
        let len = p.char_count();

        assert!(p.splice(0, len, ""));
        assert_eq!(p.body(), "");
        assert_eq!(p.char_count(), 0);
        assert_eq!(p.line_count(), 0);
    }

    #[test]
    fn splice_replaces_middle_span() {
        let mut p = post();
        assert!(p.splice(0, 0, "hello world"));
        assert!(p.splice(6, 5, "there"));
        assert_eq!(p.body(), "hello there");
        assert_counters_consistent(&p);
    }

    #[test]
    fn splice_clamps_out_of_range_offsets() {
        let mut p = post();
        assert!(p.splice(0, 0, "abc"));
        // Start past the end appends; oversized delete clamps to the tail.
        assert!(p.splice(100, 50, "!"));
        assert_eq!(p.body(), "abc!");
        assert!(p.splice(1, 100, ""));
        assert_eq!(p.body(), "a");
    }

    #[test]
    fn splice_rejecting_leaves_state_unchanged() {
        let mut p = post();
        assert!(p.splice(0, 0, "seed"));
        let body = p.body().to_string();

        let too_long = "x".repeat(MAX_BODY_CHARS + 1);
        assert!(!p.splice(0, 0, &too_long));
        assert_eq!(p.body(), body);

        let too_many_lines = "\n".repeat(MAX_LINE_COUNT + 1);
        assert!(!p.splice(0, 0, &too_many_lines));
        assert_eq!(p.body(), body);
        assert_counters_consistent(&p);
    }

    #[test]
    fn splice_uses_code_point_offsets() {
        let mut p = post();
        assert!(p.splice(0, 0, "日本語"));
        assert!(p.splice(1, 1, "x"));
        assert_eq!(p.body(), "日x語");
        assert_counters_consistent(&p);
    }

    // =========================================================================
    // Expiry / restore
    // =========================================================================

    #[test]
    fn expiry_boundary_is_exact() {
        let p = post();
        assert!(!p.is_expired_at(1_000 + MAX_LIFETIME_SECS - 1));
        assert!(p.is_expired_at(1_000 + MAX_LIFETIME_SECS));
    }

    #[test]
    fn restore_body_recomputes_counters() {
        let mut p = post();
        p.restore_body("one\ntwo\n語".to_string());
        assert_eq!(p.char_count(), 9);
        assert_eq!(p.line_count(), 2);
        assert_counters_consistent(&p);
    }

    #[test]
    fn counters_hold_under_mixed_edit_sequences() {
        let mut p = post();
        for ch in "abc\ndef".chars() {
            assert!(p.append(ch));
        }
        assert!(p.backspace());
        assert!(p.splice(2, 3, "XY\n"));
        assert!(p.append('z'));
        assert!(p.backspace());
        assert_counters_consistent(&p);
        assert!(p.char_count() <= MAX_BODY_CHARS);
        assert!(p.line_count() <= MAX_LINE_COUNT);
    }
}
