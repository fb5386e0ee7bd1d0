//! Ledger error types
//!
//! [`StoreError`] is what a [`LedgerStore`](crate::store::LedgerStore) backend reports.
//! [`LedgerError`] is what the engine, the period guard, the mapping resolver and the
//! workflows report; each validation failure has its own variant so callers can tell the
//! causes apart.

use crate::executor::DbError;
use crate::model::{MappingKey, PeriodStatus, SourceKey, UnknownVariant};
use crate::transaction::TransactionError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt;

/// Storage-layer error
#[derive(Debug)]
pub enum StoreError {
    /// Database error from the executor
    Database(DbError),
    /// A uniqueness or overlap rule rejected the write
    Conflict(String),
    /// A referenced row does not exist
    NotFound(String),
    /// The row is posted and can no longer change
    Immutable(String),
    /// No open period covers the date at write time
    PeriodUnavailable(NaiveDate),
    /// A stored value could not be mapped back to a model type
    Decode(String),
    /// In-memory tables were poisoned by a panicking writer
    Poisoned,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {e}"),
            StoreError::Conflict(s) => write!(f, "Conflict: {s}"),
            StoreError::NotFound(s) => write!(f, "Not found: {s}"),
            StoreError::Immutable(s) => write!(f, "Immutable: {s}"),
            StoreError::PeriodUnavailable(date) => {
                write!(f, "No open fiscal period covers {date} at write time")
            }
            StoreError::Decode(s) => write!(f, "Decode error: {s}"),
            StoreError::Poisoned => write!(f, "In-memory store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        StoreError::Database(err)
    }
}

impl From<may_postgres::Error> for StoreError {
    fn from(err: may_postgres::Error) -> Self {
        StoreError::Database(DbError::PostgresError(err))
    }
}

impl From<TransactionError> for StoreError {
    fn from(err: TransactionError) -> Self {
        StoreError::Database(err.into())
    }
}

impl From<UnknownVariant> for StoreError {
    fn from(err: UnknownVariant) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// Posting, period and mapping errors
#[derive(Debug)]
pub enum LedgerError {
    /// `Σdebit != Σcredit`
    Unbalanced { total_debit: Decimal, total_credit: Decimal },
    /// A line carries both a debit and a credit, or neither
    SingleSideViolation { line: usize, account_code: String },
    /// A line amount is below zero
    NegativeAmount { line: usize, account_code: String },
    /// A line amount has more than two decimal places
    AmountPrecision { line: usize, amount: Decimal },
    /// A line amount (`line`) or a total (`None`) does not fit `NUMERIC(19, 2)`
    AmountOverflow { line: Option<usize> },
    /// No line carries a nonzero amount
    ZeroValueEntry,
    UnknownAccount(String),
    InactiveAccount(String),
    /// No fiscal period covers the date
    NoOpenPeriod(NaiveDate),
    /// The covering period is closed or locked
    PeriodNotOpen { date: NaiveDate, period: String, status: PeriodStatus },
    InvalidPeriodRange { start_date: NaiveDate, end_date: NaiveDate },
    PeriodOverlap { start_date: NaiveDate, end_date: NaiveDate },
    PeriodNotFound(i64),
    /// Lifecycle transition not allowed from the current status
    InvalidPeriodTransition { period: String, from: PeriodStatus, to: PeriodStatus },
    /// No active mapping for a semantic account role
    MissingMapping(MappingKey),
    JournalNotFound(i64),
    /// The entry is posted; it and its lines cannot change
    PostedEntryImmutable(i64),
    AlreadyPosted(i64),
    /// `create_journal_entry` found an entry for the same business event
    DuplicateSource(SourceKey),
    /// Reversal requested for a draft or for a reversal entry
    NotReversible { id: i64, reason: &'static str },
    /// Workflow input rejected before any posting
    InvalidInput(String),
    Store(StoreError),
}

impl LedgerError {
    /// Validation failures are the caller's to fix; everything else is infrastructure.
    pub fn is_validation(&self) -> bool {
        !matches!(self, LedgerError::Store(_))
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Unbalanced {
                total_debit,
                total_credit,
            } => write!(
                f,
                "Journal is unbalanced: total debit {total_debit} != total credit {total_credit}"
            ),
            LedgerError::SingleSideViolation { line, account_code } => write!(
                f,
                "Line {line} ({account_code}) must have exactly one of debit or credit nonzero"
            ),
            LedgerError::NegativeAmount { line, account_code } => {
                write!(f, "Line {line} ({account_code}) has a negative amount")
            }
            LedgerError::AmountPrecision { line, amount } => write!(
                f,
                "Line {line} amount {amount} has more than two decimal places"
            ),
            LedgerError::AmountOverflow { line: Some(line) } => write!(
                f,
                "Line {line} amount exceeds the ledger maximum of {}",
                crate::money::MAX_AMOUNT
            ),
            LedgerError::AmountOverflow { line: None } => write!(
                f,
                "Total exceeds the ledger maximum of {}",
                crate::money::MAX_AMOUNT
            ),
            LedgerError::ZeroValueEntry => write!(f, "Journal has no nonzero lines"),
            LedgerError::UnknownAccount(code) => write!(f, "Unknown account code: {code}"),
            LedgerError::InactiveAccount(code) => write!(f, "Account {code} is inactive"),
            LedgerError::NoOpenPeriod(date) => {
                write!(f, "No fiscal period covers entry date {date}")
            }
            LedgerError::PeriodNotOpen {
                date,
                period,
                status,
            } => write!(
                f,
                "Fiscal period {period} covering {date} is {status}; postings are not allowed"
            ),
            LedgerError::InvalidPeriodRange {
                start_date,
                end_date,
            } => write!(
                f,
                "Period end date {end_date} must be after start date {start_date}"
            ),
            LedgerError::PeriodOverlap {
                start_date,
                end_date,
            } => write!(
                f,
                "Period {start_date}..{end_date} overlaps an existing period"
            ),
            LedgerError::PeriodNotFound(id) => write!(f, "Fiscal period {id} not found"),
            LedgerError::InvalidPeriodTransition { period, from, to } => write!(
                f,
                "Fiscal period {period} cannot move from {from} to {to}"
            ),
            LedgerError::MissingMapping(key) => {
                write!(f, "No active account mapping for '{key}'")
            }
            LedgerError::JournalNotFound(id) => write!(f, "Journal entry {id} not found"),
            LedgerError::PostedEntryImmutable(id) => {
                write!(f, "Journal entry {id} is posted and cannot be modified")
            }
            LedgerError::AlreadyPosted(id) => write!(f, "Journal entry {id} is already posted"),
            LedgerError::DuplicateSource(key) => {
                write!(f, "A journal entry already exists for {key}")
            }
            LedgerError::NotReversible { id, reason } => {
                write!(f, "Journal entry {id} cannot be reversed: {reason}")
            }
            LedgerError::InvalidInput(s) => write!(f, "Invalid input: {s}"),
            LedgerError::Store(e) => write!(f, "Store error: {e}"),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        LedgerError::Store(err)
    }
}
