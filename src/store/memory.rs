//! In-memory [`LedgerStore`]
//!
//! All tables live behind one `Mutex`, so every method is atomic with respect to every
//! other. The uniqueness, overlap and immutability rules mirror the PostgreSQL schema.

use super::{Inserted, LedgerStore, LedgerTotals};
use crate::error::StoreError;
use crate::model::journal::format_journal_number;
use crate::model::{
    Account, AccountCategory, AccountMapping, BalanceDelta,
    FiscalPeriod, JournalAmendment, JournalDraft, JournalEntry, JournalFailure, JournalLine,
    MappingKey, NewAccount, NewAccountCategory, NewFiscalPeriod, NewZReport, PeriodStatus,
    SourceKey, ZReport,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    journal_sequence: i64,
    categories: BTreeMap<i64, AccountCategory>,
    accounts: BTreeMap<i64, Account>,
    periods: BTreeMap<i64, FiscalPeriod>,
    journals: BTreeMap<i64, JournalEntry>,
    lines: Vec<JournalLine>,
    mappings: BTreeMap<MappingKey, AccountMapping>,
    failures: BTreeMap<i64, JournalFailure>,
    zreports: BTreeMap<i64, ZReport>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn account_by_code(&self, code: &str) -> Option<&Account> {
        self.accounts.values().find(|a| a.account_code == code)
    }

    fn journal_by_source(&self, key: &SourceKey) -> Option<&JournalEntry> {
        self.journals
            .values()
            .find(|j| j.source.as_ref() == Some(key))
    }

    fn failure_by_source_mut(&mut self, key: &SourceKey) -> Option<&mut JournalFailure> {
        self.failures.values_mut().find(|f| &f.source == key)
    }

    fn ensure_open_period(&self, date: NaiveDate) -> Result<(), StoreError> {
        match self.periods.values().find(|p| p.contains(date)) {
            Some(period) if period.status.accepts_postings() => Ok(()),
            _ => Err(StoreError::PeriodUnavailable(date)),
        }
    }

    /// Validate every delta first so a missing account leaves balances untouched.
    fn apply_deltas(&mut self, deltas: &[BalanceDelta]) -> Result<(), StoreError> {
        if let Some(missing) = deltas
            .iter()
            .find(|d| !self.accounts.contains_key(&d.account_id))
        {
            return Err(StoreError::NotFound(format!("account id {}", missing.account_id)));
        }
        let mut ordered = deltas.to_vec();
        ordered.sort_by_key(|d| d.account_id);
        for delta in ordered {
            if let Some(account) = self.accounts.get_mut(&delta.account_id) {
                account.current_balance += delta.amount;
            }
        }
        Ok(())
    }
}

/// Mutex-guarded in-memory tables
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Number of journal entries of any kind.
    pub fn journal_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.journals.len())
    }

    /// Overwrite a cached balance without touching lines, to simulate cache drift.
    pub fn corrupt_balance(&self, account_code: &str, balance: Decimal) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let account = tables
            .accounts
            .values_mut()
            .find(|a| a.account_code == account_code)
            .ok_or_else(|| StoreError::NotFound(format!("account {account_code}")))?;
        account.current_balance = balance;
        Ok(())
    }
}

impl LedgerStore for MemoryStore {
    fn insert_category(&self, new: &NewAccountCategory) -> Result<AccountCategory, StoreError> {
        let mut tables = self.lock()?;
        if tables.categories.values().any(|c| c.code == new.code) {
            return Err(StoreError::Conflict(format!(
                "account category {} already exists",
                new.code
            )));
        }
        let category = AccountCategory {
            id: tables.allocate_id(),
            code: new.code.clone(),
            name: new.name.clone(),
            account_type: new.account_type,
        };
        tables.categories.insert(category.id, category.clone());
        Ok(category)
    }

    fn category_by_code(&self, code: &str) -> Result<Option<AccountCategory>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.categories.values().find(|c| c.code == code).cloned())
    }

    fn insert_account(&self, new: &NewAccount) -> Result<Account, StoreError> {
        let mut tables = self.lock()?;
        let category = tables
            .categories
            .values()
            .find(|c| c.code == new.category_code)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("account category {}", new.category_code)))?;
        if tables.account_by_code(&new.account_code).is_some() {
            return Err(StoreError::Conflict(format!(
                "account {} already exists",
                new.account_code
            )));
        }
        let account = Account {
            id: tables.allocate_id(),
            account_code: new.account_code.clone(),
            name: new.name.clone(),
            category_id: category.id,
            category_code: category.code,
            normal_side: category.account_type,
            current_balance: Decimal::ZERO,
            is_active: true,
            created_at: Utc::now(),
        };
        tables.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    fn account_by_code(&self, code: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.lock()?.account_by_code(code).cloned())
    }

    fn accounts_by_codes(&self, codes: &[String]) -> Result<Vec<Account>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .accounts
            .values()
            .filter(|a| codes.contains(&a.account_code))
            .cloned()
            .collect())
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let tables = self.lock()?;
        let mut accounts: Vec<Account> = tables.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.account_code.cmp(&b.account_code));
        Ok(accounts)
    }

    fn set_account_active(&self, code: &str, active: bool) -> Result<Option<Account>, StoreError> {
        let mut tables = self.lock()?;
        Ok(tables
            .accounts
            .values_mut()
            .find(|a| a.account_code == code)
            .map(|account| {
                account.is_active = active;
                account.clone()
            }))
    }

    fn insert_period(&self, new: &NewFiscalPeriod) -> Result<FiscalPeriod, StoreError> {
        let mut tables = self.lock()?;
        if new.start_date >= new.end_date {
            return Err(StoreError::Conflict(format!(
                "period {} has start_date >= end_date",
                new.name
            )));
        }
        if let Some(existing) = tables
            .periods
            .values()
            .find(|p| p.overlaps(new.start_date, new.end_date))
        {
            return Err(StoreError::Conflict(format!(
                "period {} overlaps {}",
                new.name, existing.name
            )));
        }
        let period = FiscalPeriod {
            id: tables.allocate_id(),
            name: new.name.clone(),
            start_date: new.start_date,
            end_date: new.end_date,
            status: PeriodStatus::Open,
            closed_at: None,
            closed_by: None,
            locked_at: None,
            created_at: Utc::now(),
        };
        tables.periods.insert(period.id, period.clone());
        Ok(period)
    }

    fn period_by_id(&self, id: i64) -> Result<Option<FiscalPeriod>, StoreError> {
        Ok(self.lock()?.periods.get(&id).cloned())
    }

    fn period_covering(&self, date: NaiveDate) -> Result<Option<FiscalPeriod>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.periods.values().find(|p| p.contains(date)).cloned())
    }

    fn list_periods(&self) -> Result<Vec<FiscalPeriod>, StoreError> {
        let tables = self.lock()?;
        let mut periods: Vec<FiscalPeriod> = tables.periods.values().cloned().collect();
        periods.sort_by_key(|p| p.start_date);
        Ok(periods)
    }

    fn transition_period(
        &self,
        id: i64,
        from: PeriodStatus,
        to: PeriodStatus,
        by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Option<FiscalPeriod>, StoreError> {
        let mut tables = self.lock()?;
        let Some(period) = tables.periods.get_mut(&id) else {
            return Ok(None);
        };
        if period.status != from {
            return Ok(None);
        }
        period.status = to;
        match to {
            PeriodStatus::Closed => {
                period.closed_at = Some(at);
                period.closed_by = by;
            }
            PeriodStatus::Locked => period.locked_at = Some(at),
            PeriodStatus::Open => {}
        }
        Ok(Some(period.clone()))
    }

    fn insert_journal(&self, draft: &JournalDraft) -> Result<Inserted<JournalEntry>, StoreError> {
        let mut tables = self.lock()?;
        if let Some(key) = &draft.source {
            if let Some(existing) = tables.journal_by_source(key) {
                return Ok(Inserted::Existing(existing.clone()));
            }
        }
        if draft.total_debit != draft.total_credit {
            return Err(StoreError::Conflict(format!(
                "entry totals differ: {} != {}",
                draft.total_debit, draft.total_credit
            )));
        }
        tables.ensure_open_period(draft.entry_date)?;
        if let Some(line) = draft
            .lines
            .iter()
            .find(|l| !tables.accounts.contains_key(&l.account_id))
        {
            return Err(StoreError::NotFound(format!("account {}", line.account_code)));
        }
        if draft.posted_at.is_some() {
            tables.apply_deltas(&draft.balance_deltas)?;
        }

        tables.journal_sequence += 1;
        let now = Utc::now();
        let entry = JournalEntry {
            id: tables.allocate_id(),
            journal_number: format_journal_number(tables.journal_sequence),
            entry_date: draft.entry_date,
            entry_type: draft.entry_type,
            source: draft.source.clone(),
            description: draft.description.clone(),
            total_debit: draft.total_debit,
            total_credit: draft.total_credit,
            is_posted: draft.posted_at.is_some(),
            posted_at: draft.posted_at,
            reverses_entry_id: draft.reverses_entry_id,
            created_by: draft.created_by,
            created_at: now,
            updated_at: now,
        };
        for (index, line) in draft.lines.iter().enumerate() {
            let id = tables.allocate_id();
            tables.lines.push(JournalLine {
                id,
                journal_entry_id: entry.id,
                line_number: index as i32 + 1,
                account_id: line.account_id,
                account_code: line.account_code.clone(),
                debit: line.debit,
                credit: line.credit,
                description: line.description.clone(),
            });
        }
        tables.journals.insert(entry.id, entry.clone());
        Ok(Inserted::Created(entry))
    }

    fn mark_journal_posted(
        &self,
        id: i64,
        posted_at: DateTime<Utc>,
        deltas: &[BalanceDelta],
    ) -> Result<JournalEntry, StoreError> {
        let mut tables = self.lock()?;
        let entry_date = match tables.journals.get(&id) {
            None => return Err(StoreError::NotFound(format!("journal entry {id}"))),
            Some(entry) if entry.is_posted => {
                return Err(StoreError::Immutable(format!("journal entry {id} is posted")))
            }
            Some(entry) => entry.entry_date,
        };
        tables.ensure_open_period(entry_date)?;
        tables.apply_deltas(deltas)?;
        let entry = tables
            .journals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("journal entry {id}")))?;
        entry.is_posted = true;
        entry.posted_at = Some(posted_at);
        entry.updated_at = posted_at;
        Ok(entry.clone())
    }

    fn amend_journal(
        &self,
        id: i64,
        amendment: &JournalAmendment,
    ) -> Result<JournalEntry, StoreError> {
        let mut tables = self.lock()?;
        let entry = tables
            .journals
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("journal entry {id}")))?;
        if entry.is_posted {
            return Err(StoreError::Immutable(format!("journal entry {id} is posted")));
        }
        if let Some(description) = &amendment.description {
            entry.description = description.clone();
        }
        if let Some(entry_date) = amendment.entry_date {
            entry.entry_date = entry_date;
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    fn journal_by_id(&self, id: i64) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self.lock()?.journals.get(&id).cloned())
    }

    fn journal_by_source(&self, key: &SourceKey) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self.lock()?.journal_by_source(key).cloned())
    }

    fn count_journals_for_source(&self, key: &SourceKey) -> Result<i64, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .journals
            .values()
            .filter(|j| j.source.as_ref() == Some(key))
            .count() as i64)
    }

    fn journal_lines(&self, journal_id: i64) -> Result<Vec<JournalLine>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .lines
            .iter()
            .filter(|l| l.journal_entry_id == journal_id)
            .cloned()
            .collect())
    }

    fn upsert_mapping(&self, key: MappingKey, account_id: i64) -> Result<AccountMapping, StoreError> {
        let mut tables = self.lock()?;
        let account_code = tables
            .accounts
            .get(&account_id)
            .map(|a| a.account_code.clone())
            .ok_or_else(|| StoreError::NotFound(format!("account id {account_id}")))?;
        let mapping = AccountMapping {
            key,
            account_id,
            account_code,
            is_active: true,
            updated_at: Utc::now(),
        };
        tables.mappings.insert(key, mapping.clone());
        Ok(mapping)
    }

    fn mapping(&self, key: MappingKey) -> Result<Option<AccountMapping>, StoreError> {
        Ok(self.lock()?.mappings.get(&key).cloned())
    }

    fn deactivate_mapping(&self, key: MappingKey) -> Result<Option<AccountMapping>, StoreError> {
        let mut tables = self.lock()?;
        Ok(tables.mappings.get_mut(&key).map(|mapping| {
            mapping.is_active = false;
            mapping.updated_at = Utc::now();
            mapping.clone()
        }))
    }

    fn list_mappings(&self) -> Result<Vec<AccountMapping>, StoreError> {
        Ok(self.lock()?.mappings.values().cloned().collect())
    }

    fn upsert_failure(
        &self,
        key: &SourceKey,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<Inserted<JournalFailure>, StoreError> {
        let mut tables = self.lock()?;
        if let Some(failure) = tables.failure_by_source_mut(key) {
            failure.attempts += 1;
            failure.last_error = error.to_string();
            failure.last_attempt_at = at;
            failure.resolved_at = None;
            return Ok(Inserted::Existing(failure.clone()));
        }
        let failure = JournalFailure {
            id: tables.allocate_id(),
            source: key.clone(),
            attempts: 1,
            last_error: error.to_string(),
            last_attempt_at: at,
            resolved_at: None,
            created_at: at,
        };
        tables.failures.insert(failure.id, failure.clone());
        Ok(Inserted::Created(failure))
    }

    fn resolve_failure(
        &self,
        key: &SourceKey,
        at: DateTime<Utc>,
    ) -> Result<Option<JournalFailure>, StoreError> {
        let mut tables = self.lock()?;
        Ok(tables
            .failure_by_source_mut(key)
            .filter(|f| f.resolved_at.is_none())
            .map(|failure| {
                failure.resolved_at = Some(at);
                failure.clone()
            }))
    }

    fn failure_by_source(&self, key: &SourceKey) -> Result<Option<JournalFailure>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.failures.values().find(|f| &f.source == key).cloned())
    }

    fn list_failures(&self, unresolved_only: bool) -> Result<Vec<JournalFailure>, StoreError> {
        let tables = self.lock()?;
        let mut failures: Vec<JournalFailure> = tables
            .failures
            .values()
            .filter(|f| !unresolved_only || f.resolved_at.is_none())
            .cloned()
            .collect();
        failures.sort_by(|a, b| b.last_attempt_at.cmp(&a.last_attempt_at));
        Ok(failures)
    }

    fn insert_zreport(&self, new: &NewZReport) -> Result<Inserted<ZReport>, StoreError> {
        let mut tables = self.lock()?;
        if let Some(existing) = tables
            .zreports
            .values()
            .find(|r| r.session_id == new.session_id)
        {
            return Ok(Inserted::Existing(existing.clone()));
        }
        let report = ZReport {
            id: tables.allocate_id(),
            session_id: new.session_id,
            business_date: new.business_date,
            closed_at: new.closed_at,
            totals: new.totals.clone(),
            journal_entry_id: None,
            journal_posted_at: None,
            created_at: Utc::now(),
        };
        tables.zreports.insert(report.id, report.clone());
        Ok(Inserted::Created(report))
    }

    fn zreport_by_id(&self, id: i64) -> Result<Option<ZReport>, StoreError> {
        Ok(self.lock()?.zreports.get(&id).cloned())
    }

    fn zreport_by_session(&self, session_id: i64) -> Result<Option<ZReport>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .zreports
            .values()
            .find(|r| r.session_id == session_id)
            .cloned())
    }

    fn link_zreport_journal(
        &self,
        report_id: i64,
        journal_entry_id: i64,
        at: DateTime<Utc>,
    ) -> Result<ZReport, StoreError> {
        let mut tables = self.lock()?;
        if !tables.journals.contains_key(&journal_entry_id) {
            return Err(StoreError::NotFound(format!("journal entry {journal_entry_id}")));
        }
        let report = tables
            .zreports
            .get_mut(&report_id)
            .ok_or_else(|| StoreError::NotFound(format!("z-report {report_id}")))?;
        if report.journal_entry_id.is_none() {
            report.journal_entry_id = Some(journal_entry_id);
            report.journal_posted_at = Some(at);
        }
        Ok(report.clone())
    }

    fn ledger_totals(&self, account_code: Option<&str>) -> Result<Vec<LedgerTotals>, StoreError> {
        let tables = self.lock()?;
        let mut totals: Vec<LedgerTotals> = tables
            .accounts
            .values()
            .filter(|a| account_code.map_or(true, |code| a.account_code == code))
            .map(|account| {
                let (total_debit, total_credit) = tables
                    .lines
                    .iter()
                    .filter(|l| l.account_id == account.id)
                    .filter(|l| {
                        tables
                            .journals
                            .get(&l.journal_entry_id)
                            .map_or(false, |j| j.is_posted)
                    })
                    .fold((Decimal::ZERO, Decimal::ZERO), |(d, c), l| {
                        (d + l.debit, c + l.credit)
                    });
                LedgerTotals {
                    account_id: account.id,
                    account_code: account.account_code.clone(),
                    normal_side: account.normal_side,
                    stored_balance: account.current_balance,
                    total_debit,
                    total_credit,
                }
            })
            .collect();
        totals.sort_by(|a, b| a.account_code.cmp(&b.account_code));
        Ok(totals)
    }

    fn compare_and_set_balance(
        &self,
        account_id: i64,
        expected: Decimal,
        new: Decimal,
    ) -> Result<bool, StoreError> {
        let mut tables = self.lock()?;
        let account = tables
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| StoreError::NotFound(format!("account id {account_id}")))?;
        if account.current_balance != expected {
            return Ok(false);
        }
        account.current_balance = new;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DraftLine, EntryType, NormalSide};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seeded() -> (MemoryStore, Account, Account) {
        let store = MemoryStore::new();
        store
            .insert_category(&NewAccountCategory {
                code: "ASSET".into(),
                name: "Assets".into(),
                account_type: NormalSide::DebitNormal,
            })
            .unwrap();
        store
            .insert_category(&NewAccountCategory {
                code: "INCOME".into(),
                name: "Income".into(),
                account_type: NormalSide::CreditNormal,
            })
            .unwrap();
        let cash = store
            .insert_account(&NewAccount {
                account_code: "1000".into(),
                name: "Cash".into(),
                category_code: "ASSET".into(),
            })
            .unwrap();
        let sales = store
            .insert_account(&NewAccount {
                account_code: "4000".into(),
                name: "Sales".into(),
                category_code: "INCOME".into(),
            })
            .unwrap();
        store
            .insert_period(&NewFiscalPeriod {
                name: "FY2025-01".into(),
                start_date: date(2025, 1, 1),
                end_date: date(2025, 1, 31),
            })
            .unwrap();
        (store, cash, sales)
    }

    fn draft(cash: &Account, sales: &Account, key: Option<SourceKey>, posted: bool) -> JournalDraft {
        let amount = Decimal::new(5000, 2);
        JournalDraft {
            entry_date: date(2025, 1, 15),
            entry_type: EntryType::System,
            source: key,
            description: "cash sale".into(),
            total_debit: amount,
            total_credit: amount,
            lines: vec![
                DraftLine {
                    account_id: cash.id,
                    account_code: cash.account_code.clone(),
                    debit: amount,
                    credit: Decimal::ZERO,
                    description: None,
                },
                DraftLine {
                    account_id: sales.id,
                    account_code: sales.account_code.clone(),
                    debit: Decimal::ZERO,
                    credit: amount,
                    description: None,
                },
            ],
            created_by: None,
            reverses_entry_id: None,
            posted_at: posted.then(Utc::now),
            balance_deltas: vec![
                BalanceDelta { account_id: cash.id, amount },
                BalanceDelta { account_id: sales.id, amount },
            ],
        }
    }

    #[test]
    fn test_duplicate_source_returns_existing_row() {
        let (store, cash, sales) = seeded();
        let key = SourceKey::new("invoice", 7, "posted");
        let first = store.insert_journal(&draft(&cash, &sales, Some(key.clone()), true)).unwrap();
        let second = store.insert_journal(&draft(&cash, &sales, Some(key.clone()), true)).unwrap();
        assert!(first.was_created());
        assert!(!second.was_created());
        assert_eq!(first.get().id, second.get().id);
        assert_eq!(store.count_journals_for_source(&key).unwrap(), 1);
        let cash_after = store.account_by_code("1000").unwrap().unwrap();
        assert_eq!(cash_after.current_balance, Decimal::new(5000, 2));
    }

    #[test]
    fn test_posted_entry_rejects_amendment() {
        let (store, cash, sales) = seeded();
        let entry = store.insert_journal(&draft(&cash, &sales, None, true)).unwrap().into_inner();
        let amendment = JournalAmendment {
            description: Some("changed".into()),
            entry_date: None,
        };
        assert!(matches!(
            store.amend_journal(entry.id, &amendment),
            Err(StoreError::Immutable(_))
        ));
    }

    #[test]
    fn test_closed_period_rejects_insert() {
        let (store, cash, sales) = seeded();
        let period = store.period_covering(date(2025, 1, 15)).unwrap().unwrap();
        store
            .transition_period(period.id, PeriodStatus::Open, PeriodStatus::Closed, None, Utc::now())
            .unwrap()
            .unwrap();
        assert!(matches!(
            store.insert_journal(&draft(&cash, &sales, None, true)),
            Err(StoreError::PeriodUnavailable(_))
        ));
        assert_eq!(store.journal_count().unwrap(), 0);
    }

    #[test]
    fn test_overlapping_period_rejected() {
        let (store, _, _) = seeded();
        let result = store.insert_period(&NewFiscalPeriod {
            name: "overlap".into(),
            start_date: date(2025, 1, 31),
            end_date: date(2025, 2, 28),
        });
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn test_transition_is_compare_and_set() {
        let (store, _, _) = seeded();
        let period = store.period_covering(date(2025, 1, 1)).unwrap().unwrap();
        let first = store
            .transition_period(period.id, PeriodStatus::Open, PeriodStatus::Closed, None, Utc::now())
            .unwrap();
        let second = store
            .transition_period(period.id, PeriodStatus::Open, PeriodStatus::Closed, None, Utc::now())
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }
}
