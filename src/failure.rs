//! Journal failure tracker
//!
//! One row per business event whose posting failed, upserted on every retry. A notifier is
//! told only about first failures; its own errors are logged and dropped.

use crate::error::LedgerError;
use crate::model::failure::truncate_error;
use crate::model::{JournalFailure, SourceKey};
use crate::store::LedgerStore;
use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Notification failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Receives first-failure alerts.
pub trait Notifier: Send + Sync {
    fn notify(&self, failure: &JournalFailure) -> Result<(), NotifyError>;
}

/// Writes each alert as a warn line on the `ledgerguard::alerts` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, failure: &JournalFailure) -> Result<(), NotifyError> {
        log::warn!(
            target: "ledgerguard::alerts",
            "journal posting failed for {}: {}",
            failure.source,
            failure.last_error
        );
        Ok(())
    }
}

/// Hands alerts to a bounded queue without blocking the posting path.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: Sender<JournalFailure>,
}

impl ChannelNotifier {
    /// Notifier plus the receiving end an operator worker drains.
    pub fn bounded(capacity: usize) -> (Self, Receiver<JournalFailure>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, failure: &JournalFailure) -> Result<(), NotifyError> {
        match self.sender.try_send(failure.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(NotifyError("alert queue is full".to_string())),
            Err(TrySendError::Disconnected(_)) => {
                Err(NotifyError("alert queue has no receiver".to_string()))
            }
        }
    }
}

pub struct FailureTracker<'a> {
    store: &'a dyn LedgerStore,
    notifier: Option<&'a dyn Notifier>,
    max_error_chars: usize,
}

impl<'a> FailureTracker<'a> {
    pub fn new(store: &'a dyn LedgerStore, max_error_chars: usize) -> Self {
        Self {
            store,
            notifier: None,
            max_error_chars,
        }
    }

    pub fn with_notifier(mut self, notifier: &'a dyn Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Record a failed attempt for `key`, alerting if this is the first one.
    pub fn record_journal_failure(
        &self,
        key: &SourceKey,
        error: &dyn fmt::Display,
    ) -> Result<JournalFailure, LedgerError> {
        let text = truncate_error(&error.to_string(), self.max_error_chars);
        let inserted = self.store.upsert_failure(key, &text, Utc::now())?;

        #[cfg(feature = "metrics")]
        crate::metrics::METRICS.record_posting_failure(&key.source_type);

        let first = inserted.was_created();
        let failure = inserted.into_inner();
        log::warn!(
            "recorded posting failure for {} (attempt {}): {}",
            key,
            failure.attempts,
            failure.last_error
        );
        if first {
            if let Some(notifier) = self.notifier {
                if let Err(e) = notifier.notify(&failure) {
                    log::warn!("dropping alert for {key}: {e}");
                }
            }
        }
        Ok(failure)
    }

    /// Mark the open failure for `key` resolved. `None` when nothing was open.
    pub fn resolve_journal_failure(
        &self,
        key: &SourceKey,
    ) -> Result<Option<JournalFailure>, LedgerError> {
        let resolved = self.store.resolve_failure(key, Utc::now())?;
        if let Some(failure) = &resolved {
            log::info!(
                "resolved posting failure for {} after {} attempt(s)",
                key,
                failure.attempts
            );
        }
        Ok(resolved)
    }

    pub fn failure(&self, key: &SourceKey) -> Result<Option<JournalFailure>, LedgerError> {
        Ok(self.store.failure_by_source(key)?)
    }

    pub fn unresolved(&self) -> Result<Vec<JournalFailure>, LedgerError> {
        Ok(self.store.list_failures(true)?)
    }

    pub fn all(&self) -> Result<Vec<JournalFailure>, LedgerError> {
        Ok(self.store.list_failures(false)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify(&self, _failure: &JournalFailure) -> Result<(), NotifyError> {
            Err(NotifyError("smtp down".to_string()))
        }
    }

    fn key() -> SourceKey {
        SourceKey::new("invoice", 42, "posted")
    }

    #[test]
    fn test_attempts_increment_and_alert_once() {
        let store = MemoryStore::new();
        let (notifier, alerts) = ChannelNotifier::bounded(8);
        let tracker = FailureTracker::new(&store, 2000).with_notifier(&notifier);

        let first = tracker.record_journal_failure(&key(), &"no open period").unwrap();
        assert_eq!(first.attempts, 1);
        let second = tracker.record_journal_failure(&key(), &"still no open period").unwrap();
        assert_eq!(second.attempts, 2);
        assert_eq!(second.last_error, "still no open period");

        assert_eq!(alerts.try_iter().count(), 1);
    }

    #[test]
    fn test_resolve_then_fail_again() {
        let store = MemoryStore::new();
        let tracker = FailureTracker::new(&store, 2000);
        tracker.record_journal_failure(&key(), &"boom").unwrap();

        let resolved = tracker.resolve_journal_failure(&key()).unwrap().unwrap();
        assert!(resolved.is_resolved());
        assert!(tracker.unresolved().unwrap().is_empty());
        assert!(tracker.resolve_journal_failure(&key()).unwrap().is_none());

        let reopened = tracker.record_journal_failure(&key(), &"boom again").unwrap();
        assert!(!reopened.is_resolved());
        assert_eq!(reopened.attempts, 2);
        assert_eq!(tracker.unresolved().unwrap().len(), 1);
        assert_eq!(tracker.all().unwrap().len(), 1);
    }

    #[test]
    fn test_error_text_truncated() {
        let store = MemoryStore::new();
        let tracker = FailureTracker::new(&store, 5);
        let failure = tracker.record_journal_failure(&key(), &"ééééééééé").unwrap();
        assert_eq!(failure.last_error, "ééééé");
    }

    #[test]
    fn test_notifier_errors_are_swallowed() {
        let store = MemoryStore::new();
        let notifier = FailingNotifier;
        let tracker = FailureTracker::new(&store, 2000).with_notifier(&notifier);
        assert!(tracker.record_journal_failure(&key(), &"boom").is_ok());
    }

    #[test]
    fn test_full_queue_does_not_block() {
        let store = MemoryStore::new();
        let (notifier, _alerts) = ChannelNotifier::bounded(1);
        let tracker = FailureTracker::new(&store, 2000).with_notifier(&notifier);
        for id in 0..3 {
            let key = SourceKey::new("bill", id, "posted");
            assert!(tracker.record_journal_failure(&key, &"boom").is_ok());
        }
    }
}
