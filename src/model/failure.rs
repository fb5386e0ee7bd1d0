use super::journal::SourceKey;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Retry bookkeeping for one business event whose posting failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalFailure {
    pub id: i64,
    pub source: SourceKey,
    pub attempts: i32,
    pub last_error: String,
    pub last_attempt_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JournalFailure {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Cut `error` to at most `max_chars` characters, never splitting a code point.
pub fn truncate_error(error: &str, max_chars: usize) -> String {
    match error.char_indices().nth(max_chars) {
        Some((byte_index, _)) => error[..byte_index].to_string(),
        None => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_error_short_input_unchanged() {
        assert_eq!(truncate_error("no open period", 2000), "no open period");
    }

    #[test]
    fn test_truncate_error_respects_char_boundaries() {
        let text = "ééééé";
        assert_eq!(truncate_error(text, 3), "ééé");
        assert_eq!(truncate_error(text, 5), text);
        assert_eq!(truncate_error(text, 0), "");
    }
}
