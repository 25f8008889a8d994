use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::debug;

/// Oldest entries are dropped once the history grows past this.
const MAX_HISTORY_ENTRIES: usize = 5;

/// One sign-in period recorded by the auth subsystem.
///
/// `start` is `None` only for the initial anonymous entry, which covers
/// every record staged before the first sign-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTokenHistoryEntry {
    pub token: Option<String>,
    pub account_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub expires_on: Option<DateTime<Utc>>,
}

impl AuthTokenHistoryEntry {
    fn anonymous() -> Self {
        Self {
            token: None,
            account_id: None,
            start: None,
            expires_on: None,
        }
    }
}

/// A half-open validity interval during which one auth token signs
/// outgoing batches. `start = None` means "since the beginning of time";
/// `end = None` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenWindow {
    pub token: Option<String>,
    pub account_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Timeline of auth tokens, mutated by the sign-in/refresh subsystem and
/// snapshotted by the channel before each flush.
///
/// The history always contains at least one entry, so a snapshot always
/// yields at least one window and anonymous records remain sendable.
pub struct AuthTokenContext {
    history: Mutex<Vec<AuthTokenHistoryEntry>>,
}

impl AuthTokenContext {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(vec![AuthTokenHistoryEntry::anonymous()]),
        }
    }

    /// Restore a previously persisted history, e.g. from secure storage
    /// at process start. An empty list falls back to the anonymous entry.
    pub fn from_history(entries: Vec<AuthTokenHistoryEntry>) -> Self {
        let history = if entries.is_empty() {
            vec![AuthTokenHistoryEntry::anonymous()]
        } else {
            entries
        };
        Self {
            history: Mutex::new(history),
        }
    }

    /// Record a new sign-in (or token refresh). The current period is
    /// closed implicitly: its window ends where the new entry starts.
    pub fn set_auth_token(
        &self,
        token: Option<String>,
        account_id: Option<String>,
        expires_on: Option<DateTime<Utc>>,
    ) {
        let mut history = self.history.lock().unwrap();
        history.push(AuthTokenHistoryEntry {
            token,
            account_id: account_id.clone(),
            start: Some(Utc::now()),
            expires_on,
        });
        if history.len() > MAX_HISTORY_ENTRIES {
            let excess = history.len() - MAX_HISTORY_ENTRIES;
            history.drain(..excess);
        }
        debug!(
            account_id = account_id.as_deref().unwrap_or("<anonymous>"),
            entries = history.len(),
            "Auth token history updated"
        );
    }

    /// Drop all sign-in state, returning to a single anonymous period.
    pub fn clear(&self) {
        let mut history = self.history.lock().unwrap();
        history.clear();
        history.push(AuthTokenHistoryEntry::anonymous());
    }

    /// The token of the most recent period, if any.
    pub fn current_token(&self) -> Option<String> {
        let history = self.history.lock().unwrap();
        history.last().and_then(|e| e.token.clone())
    }

    /// Snapshot the timeline as ordered, non-overlapping windows. Each
    /// window ends where the next begins; the last window is unbounded.
    pub fn windows(&self) -> Vec<TokenWindow> {
        let history = self.history.lock().unwrap();
        let mut windows = Vec::with_capacity(history.len());
        for (i, entry) in history.iter().enumerate() {
            let end = history.get(i + 1).and_then(|next| next.start);
            windows.push(TokenWindow {
                token: entry.token.clone(),
                account_id: entry.account_id.clone(),
                start: entry.start,
                end,
            });
        }
        windows
    }
}

impl Default for AuthTokenContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(
        token: Option<&str>,
        start: Option<DateTime<Utc>>,
    ) -> AuthTokenHistoryEntry {
        AuthTokenHistoryEntry {
            token: token.map(|t| t.to_string()),
            account_id: None,
            start,
            expires_on: None,
        }
    }

    #[test]
    fn test_new_context_yields_single_anonymous_window() {
        let context = AuthTokenContext::new();
        let windows = context.windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].token, None);
        assert_eq!(windows[0].start, None);
        assert_eq!(windows[0].end, None);
    }

    #[test]
    fn test_windows_end_where_the_next_begins() {
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();
        let context = AuthTokenContext::from_history(vec![
            entry(None, None),
            entry(Some("tok-a"), Some(t1)),
            entry(Some("tok-b"), Some(t2)),
        ]);

        let windows = context.windows();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].end, Some(t1));
        assert_eq!(windows[1].start, Some(t1));
        assert_eq!(windows[1].end, Some(t2));
        assert_eq!(windows[2].token.as_deref(), Some("tok-b"));
        assert_eq!(windows[2].end, None);
    }

    #[test]
    fn test_set_auth_token_closes_the_previous_window() {
        let context = AuthTokenContext::new();
        context.set_auth_token(Some("tok".to_string()), Some("acct".to_string()), None);

        let windows = context.windows();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].token, None);
        assert!(windows[0].end.is_some());
        assert_eq!(windows[0].end, windows[1].start);
        assert_eq!(windows[1].token.as_deref(), Some("tok"));
        assert_eq!(context.current_token().as_deref(), Some("tok"));
    }

    #[test]
    fn test_history_is_bounded() {
        let context = AuthTokenContext::new();
        for i in 0..10 {
            context.set_auth_token(Some(format!("tok-{i}")), None, None);
        }
        let windows = context.windows();
        assert_eq!(windows.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(windows.last().unwrap().token.as_deref(), Some("tok-9"));
    }

    #[test]
    fn test_clear_returns_to_anonymous() {
        let context = AuthTokenContext::new();
        context.set_auth_token(Some("tok".to_string()), None, None);
        context.clear();

        let windows = context.windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].token, None);
        assert_eq!(context.current_token(), None);
    }
}
