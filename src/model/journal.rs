//! Journal entries, lines and the inputs the engine accepts

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Manual,
    System,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::Manual => "manual",
            EntryType::System => "system",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(EntryType::Manual),
            "system" => Ok(EntryType::System),
            _ => Err(()),
        }
    }
}

/// Identity of the business event a journal records: `(source_type, source_id, event_type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceKey {
    pub source_type: String,
    pub source_id: i64,
    pub event_type: String,
}

impl SourceKey {
    pub fn new(source_type: impl Into<String>, source_id: i64, event_type: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            source_id,
            event_type: event_type.into(),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source_type, self.source_id, self.event_type)
    }
}

/// One caller-supplied line, before account resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInput {
    pub account_code: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: Option<String>,
}

impl LineInput {
    pub fn debit(account_code: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account_code: account_code.into(),
            debit: amount,
            credit: Decimal::ZERO,
            description: None,
        }
    }

    pub fn credit(account_code: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account_code: account_code.into(),
            debit: Decimal::ZERO,
            credit: amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Everything `create_journal_entry` / `create_or_get_journal` need.
#[derive(Debug, Clone)]
pub struct JournalRequest {
    pub entry_date: NaiveDate,
    pub entry_type: EntryType,
    pub source: Option<SourceKey>,
    pub description: String,
    pub lines: Vec<LineInput>,
    pub created_by: Option<Uuid>,
    pub auto_post: bool,
    pub reverses_entry_id: Option<i64>,
}

impl JournalRequest {
    /// A system entry keyed by `source`, posted in the same unit of work.
    pub fn system(
        entry_date: NaiveDate,
        source: SourceKey,
        description: impl Into<String>,
        lines: Vec<LineInput>,
    ) -> Self {
        Self {
            entry_date,
            entry_type: EntryType::System,
            source: Some(source),
            description: description.into(),
            lines,
            created_by: None,
            auto_post: true,
            reverses_entry_id: None,
        }
    }

    pub fn manual(entry_date: NaiveDate, description: impl Into<String>, lines: Vec<LineInput>) -> Self {
        Self {
            entry_date,
            entry_type: EntryType::Manual,
            source: None,
            description: description.into(),
            lines,
            created_by: None,
            auto_post: false,
            reverses_entry_id: None,
        }
    }

    pub fn created_by(mut self, user: Uuid) -> Self {
        self.created_by = Some(user);
        self
    }

    pub fn auto_post(mut self, auto_post: bool) -> Self {
        self.auto_post = auto_post;
        self
    }

    pub fn keyed(mut self, source: SourceKey) -> Self {
        self.source = Some(source);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalEntry {
    pub id: i64,
    pub journal_number: String,
    pub entry_date: NaiveDate,
    pub entry_type: EntryType,
    pub source: Option<SourceKey>,
    pub description: String,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub is_posted: bool,
    pub posted_at: Option<DateTime<Utc>>,
    pub reverses_entry_id: Option<i64>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalLine {
    pub id: i64,
    pub journal_entry_id: i64,
    pub line_number: i32,
    pub account_id: i64,
    pub account_code: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: Option<String>,
}

/// Signed change to one account's cached balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    pub account_id: i64,
    pub amount: Decimal,
}

/// A line whose account has been resolved and whose amounts passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftLine {
    pub account_id: i64,
    pub account_code: String,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: Option<String>,
}

/// A validated entry ready for the store. The store only persists it.
#[derive(Debug, Clone)]
pub struct JournalDraft {
    pub entry_date: NaiveDate,
    pub entry_type: EntryType,
    pub source: Option<SourceKey>,
    pub description: String,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub lines: Vec<DraftLine>,
    pub created_by: Option<Uuid>,
    pub reverses_entry_id: Option<i64>,
    /// Set when the entry is posted in the same unit of work.
    pub posted_at: Option<DateTime<Utc>>,
    /// Applied only when `posted_at` is set, in ascending account id order.
    pub balance_deltas: Vec<BalanceDelta>,
}

/// Mutable fields of a draft entry.
#[derive(Debug, Clone, Default)]
pub struct JournalAmendment {
    pub description: Option<String>,
    pub entry_date: Option<NaiveDate>,
}

impl JournalAmendment {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.entry_date.is_none()
    }
}

pub fn format_journal_number(sequence: i64) -> String {
    format!("JE-{sequence:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_journal_number() {
        assert_eq!(format_journal_number(1), "JE-000001");
        assert_eq!(format_journal_number(42), "JE-000042");
        assert_eq!(format_journal_number(1_234_567), "JE-1234567");
    }

    #[test]
    fn test_source_key_display() {
        let key = SourceKey::new("pos_zreport", 42, "posted");
        assert_eq!(key.to_string(), "pos_zreport:42:posted");
    }

    #[test]
    fn test_line_input_constructors() {
        let amount = Decimal::new(5000, 2);
        let debit = LineInput::debit("1000", amount);
        assert_eq!((debit.debit, debit.credit), (amount, Decimal::ZERO));
        let credit = LineInput::credit("4000", amount).with_description("sales");
        assert_eq!((credit.debit, credit.credit), (Decimal::ZERO, amount));
        assert_eq!(credit.description.as_deref(), Some("sales"));
    }

    #[test]
    fn test_entry_type_text() {
        assert_eq!("system".parse::<EntryType>(), Ok(EntryType::System));
        assert_eq!(EntryType::Manual.to_string(), "manual");
        assert!("auto".parse::<EntryType>().is_err());
    }
}
