//! Sync cursor model

use serde::{Deserialize, Serialize};

/// Bookmark into the remote change stream
///
/// `token` is opaque to the client; the server hands back the next
/// position with every pull. Persisted so an interrupted pull resumes
/// instead of refetching history, and advanced only after a whole batch
/// has been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Wall-clock time of the last completed pull (Unix ms)
    pub last_pulled_at: i64,
    /// Opaque server position; `None` means "from the beginning"
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cursor_starts_from_beginning() {
        let cursor = SyncCursor::default();
        assert_eq!(cursor.last_pulled_at, 0);
        assert!(cursor.token.is_none());
    }

    #[test]
    fn cursor_serializes_round_trip() {
        let cursor = SyncCursor {
            last_pulled_at: 1_234,
            token: Some("17".to_string()),
        };
        let json = serde_json::to_string(&cursor).unwrap();
        let parsed: SyncCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cursor);
    }
}
