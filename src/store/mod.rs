//! Storage seam for the ledger
//!
//! [`LedgerStore`] is the only way the engine, the guards and the workflows reach persisted
//! state. Two backends implement it:
//!
//! - [`PgStore`](postgres::PgStore): SQL over [`LedgerExecutor`](crate::executor::LedgerExecutor),
//!   one database transaction per write method, uniqueness enforced by constraints.
//! - [`MemoryStore`](memory::MemoryStore): mutex-guarded tables applying the same uniqueness,
//!   overlap and immutability rules, used by tests and dry runs.
//!
//! Every write method is atomic: it either applies in full or leaves the store untouched.
//! Idempotent inserts report whether this call created the row ([`Inserted::Created`]) or
//! found the row another caller had already written ([`Inserted::Existing`]).

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::StoreError;
use crate::model::{
    Account, AccountCategory, AccountMapping, BalanceDelta, FiscalPeriod, JournalAmendment,
    JournalDraft, JournalEntry, JournalFailure, JournalLine, MappingKey, NewAccount,
    NewAccountCategory, NewFiscalPeriod, NewZReport, NormalSide, PeriodStatus, SourceKey, ZReport,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Outcome of an insert guarded by a unique key
#[derive(Debug, Clone, PartialEq)]
pub enum Inserted<T> {
    Created(T),
    Existing(T),
}

impl<T> Inserted<T> {
    pub fn was_created(&self) -> bool {
        matches!(self, Inserted::Created(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Inserted::Created(value) | Inserted::Existing(value) => value,
        }
    }

    pub fn get(&self) -> &T {
        match self {
            Inserted::Created(value) | Inserted::Existing(value) => value,
        }
    }
}

/// Cached balance and posted line totals for one account, read in one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTotals {
    pub account_id: i64,
    pub account_code: String,
    pub normal_side: NormalSide,
    pub stored_balance: Decimal,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

impl LedgerTotals {
    /// Balance implied by the posted lines.
    pub fn derived_balance(&self) -> Decimal {
        self.normal_side.balance(self.total_debit, self.total_credit)
    }
}

pub trait LedgerStore: Send + Sync {
    // Chart of accounts

    fn insert_category(&self, new: &NewAccountCategory) -> Result<AccountCategory, StoreError>;

    fn category_by_code(&self, code: &str) -> Result<Option<AccountCategory>, StoreError>;

    /// Fails with `NotFound` when the category code is unknown, `Conflict` on a duplicate code.
    fn insert_account(&self, new: &NewAccount) -> Result<Account, StoreError>;

    fn account_by_code(&self, code: &str) -> Result<Option<Account>, StoreError>;

    /// Accounts for the codes that exist; unknown codes are simply absent.
    fn accounts_by_codes(&self, codes: &[String]) -> Result<Vec<Account>, StoreError>;

    fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    fn set_account_active(&self, code: &str, active: bool) -> Result<Option<Account>, StoreError>;

    // Fiscal periods

    /// Fails with `Conflict` when the range overlaps an existing period.
    fn insert_period(&self, new: &NewFiscalPeriod) -> Result<FiscalPeriod, StoreError>;

    fn period_by_id(&self, id: i64) -> Result<Option<FiscalPeriod>, StoreError>;

    fn period_covering(&self, date: NaiveDate) -> Result<Option<FiscalPeriod>, StoreError>;

    fn list_periods(&self) -> Result<Vec<FiscalPeriod>, StoreError>;

    /// Compare-and-set on status. `None` when the period is not currently in `from`.
    fn transition_period(
        &self,
        id: i64,
        from: PeriodStatus,
        to: PeriodStatus,
        by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Option<FiscalPeriod>, StoreError>;

    // Journals

    /// Persist header, lines and (when `draft.posted_at` is set) balance deltas in one unit.
    ///
    /// A draft with a source key that already exists yields `Inserted::Existing` with the stored
    /// row and writes nothing. Fails with `PeriodUnavailable` when no open period covers the
    /// entry date at write time.
    fn insert_journal(&self, draft: &JournalDraft) -> Result<Inserted<JournalEntry>, StoreError>;

    /// Draft → posted, applying `deltas` in the same unit. `Immutable` if already posted.
    fn mark_journal_posted(
        &self,
        id: i64,
        posted_at: DateTime<Utc>,
        deltas: &[BalanceDelta],
    ) -> Result<JournalEntry, StoreError>;

    /// `Immutable` if the entry is posted.
    fn amend_journal(
        &self,
        id: i64,
        amendment: &JournalAmendment,
    ) -> Result<JournalEntry, StoreError>;

    fn journal_by_id(&self, id: i64) -> Result<Option<JournalEntry>, StoreError>;

    fn journal_by_source(&self, key: &SourceKey) -> Result<Option<JournalEntry>, StoreError>;

    fn count_journals_for_source(&self, key: &SourceKey) -> Result<i64, StoreError>;

    fn journal_lines(&self, journal_id: i64) -> Result<Vec<JournalLine>, StoreError>;

    // Account mappings

    fn upsert_mapping(&self, key: MappingKey, account_id: i64) -> Result<AccountMapping, StoreError>;

    fn mapping(&self, key: MappingKey) -> Result<Option<AccountMapping>, StoreError>;

    fn deactivate_mapping(&self, key: MappingKey) -> Result<Option<AccountMapping>, StoreError>;

    fn list_mappings(&self) -> Result<Vec<AccountMapping>, StoreError>;

    // Failures

    /// Upsert by source key: `attempts += 1`, replace `last_error`, clear `resolved_at`.
    fn upsert_failure(
        &self,
        key: &SourceKey,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<Inserted<JournalFailure>, StoreError>;

    /// Set `resolved_at` on the unresolved failure for `key`, if there is one.
    fn resolve_failure(
        &self,
        key: &SourceKey,
        at: DateTime<Utc>,
    ) -> Result<Option<JournalFailure>, StoreError>;

    fn failure_by_source(&self, key: &SourceKey) -> Result<Option<JournalFailure>, StoreError>;

    fn list_failures(&self, unresolved_only: bool) -> Result<Vec<JournalFailure>, StoreError>;

    // Z-reports

    /// One report per session; a second insert for the session yields the stored row.
    fn insert_zreport(&self, new: &NewZReport) -> Result<Inserted<ZReport>, StoreError>;

    fn zreport_by_id(&self, id: i64) -> Result<Option<ZReport>, StoreError>;

    fn zreport_by_session(&self, session_id: i64) -> Result<Option<ZReport>, StoreError>;

    /// Record the report's journal. An existing link is kept.
    fn link_zreport_journal(
        &self,
        report_id: i64,
        journal_entry_id: i64,
        at: DateTime<Utc>,
    ) -> Result<ZReport, StoreError>;

    // Balance cache

    /// Totals for one account (`Some(code)`) or every account, ordered by account code.
    fn ledger_totals(&self, account_code: Option<&str>) -> Result<Vec<LedgerTotals>, StoreError>;

    /// Write `new` only if the cached balance still equals `expected`.
    fn compare_and_set_balance(
        &self,
        account_id: i64,
        expected: Decimal,
        new: Decimal,
    ) -> Result<bool, StoreError>;
}
