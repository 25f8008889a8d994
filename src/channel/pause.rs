use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_PAUSE_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque identity under which a caller pauses a channel. The caller
/// keeps the token and presents it again to resume; two tokens never
/// compare equal unless they are clones of the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PauseToken(u64);

impl PauseToken {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(NEXT_PAUSE_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

/// The set of pause identities currently holding a unit paused.
#[derive(Debug, Default)]
pub struct PauseSet {
    tokens: HashSet<PauseToken>,
}

impl PauseSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the token was not already present.
    pub fn pause(&mut self, token: PauseToken) -> bool {
        self.tokens.insert(token)
    }

    /// Returns true if the token was present.
    pub fn resume(&mut self, token: PauseToken) -> bool {
        self.tokens.remove(&token)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let a = PauseToken::new();
        let b = PauseToken::new();
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn test_pause_is_idempotent() {
        let mut set = PauseSet::new();
        let token = PauseToken::new();
        assert!(set.pause(token));
        assert!(!set.pause(token));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_resume_of_unknown_token_is_a_no_op() {
        let mut set = PauseSet::new();
        let held = PauseToken::new();
        set.pause(held);
        assert!(!set.resume(PauseToken::new()));
        assert!(!set.is_empty());
        assert!(set.resume(held));
        assert!(set.is_empty());
    }
}
