//! PostgreSQL [`LedgerStore`]
//!
//! Each write method runs in its own transaction on the store's connection. Idempotent
//! inserts use `INSERT ... ON CONFLICT DO NOTHING RETURNING`: an empty result means another
//! writer owns the key, and the committed winner is read back. A `PgStore` owns one
//! connection, so concurrent workers each open their own store.

use super::{Inserted, LedgerStore, LedgerTotals};
use crate::config::DatabaseConfig;
use crate::connection::{connect_with_config, ConnectionError};
use crate::error::StoreError;
use crate::executor::{LedgerExecutor, PgExecutor};
use crate::model::journal::format_journal_number;
use crate::model::{
    parse_column, Account, AccountCategory, AccountMapping, BalanceDelta, FiscalPeriod,
    JournalAmendment, JournalDraft, JournalEntry, JournalFailure, JournalLine, MappingKey,
    NewAccount, NewAccountCategory, NewFiscalPeriod, NewZReport, PeriodStatus, SourceKey,
    ZReport, ZReportTotals,
};
use crate::transaction::{run_in_transaction, IsolationLevel};
use chrono::{DateTime, NaiveDate, Utc};
use may_postgres::types::FromSql;
use may_postgres::Row;
use rust_decimal::Decimal;
use uuid::Uuid;

const ACCOUNT_SELECT: &str = "SELECT a.id, a.account_code, a.name, a.category_id, \
     c.code AS category_code, c.account_type, a.current_balance, a.is_active, a.created_at \
     FROM accounts a JOIN account_categories c ON c.id = a.category_id";

const PERIOD_COLUMNS: &str =
    "id, name, start_date, end_date, status, closed_at, closed_by, locked_at, created_at";

const JOURNAL_COLUMNS: &str = "id, journal_number, entry_date, entry_type, source_type, \
     source_id, event_type, description, total_debit, total_credit, is_posted, posted_at, \
     reverses_entry_id, created_by, created_at, updated_at";

const MAPPING_SELECT: &str = "SELECT m.key, m.account_id, a.account_code, m.is_active, \
     m.updated_at FROM account_mappings m JOIN accounts a ON a.id = m.account_id";

const FAILURE_COLUMNS: &str = "id, source_type, source_id, event_type, attempts, last_error, \
     last_attempt_at, resolved_at, created_at";

const ZREPORT_COLUMNS: &str = "id, session_id, business_date, closed_at, gross_sales, \
     discounts, net_sales, vat_amount, cash_total, card_total, on_account_total, sale_count, \
     journal_entry_id, journal_posted_at, created_at";

fn get<'a, T: FromSql<'a>>(row: &'a Row, column: &str) -> Result<T, StoreError> {
    row.try_get(column)
        .map_err(|e| StoreError::Decode(format!("{column}: {e}")))
}

fn category_from_row(row: &Row) -> Result<AccountCategory, StoreError> {
    let account_type: String = get(row, "account_type")?;
    Ok(AccountCategory {
        id: get(row, "id")?,
        code: get(row, "code")?,
        name: get(row, "name")?,
        account_type: parse_column("account_type", &account_type)?,
    })
}

fn account_from_row(row: &Row) -> Result<Account, StoreError> {
    let account_type: String = get(row, "account_type")?;
    Ok(Account {
        id: get(row, "id")?,
        account_code: get(row, "account_code")?,
        name: get(row, "name")?,
        category_id: get(row, "category_id")?,
        category_code: get(row, "category_code")?,
        normal_side: parse_column("account_type", &account_type)?,
        current_balance: get(row, "current_balance")?,
        is_active: get(row, "is_active")?,
        created_at: get(row, "created_at")?,
    })
}

fn period_from_row(row: &Row) -> Result<FiscalPeriod, StoreError> {
    let status: String = get(row, "status")?;
    Ok(FiscalPeriod {
        id: get(row, "id")?,
        name: get(row, "name")?,
        start_date: get(row, "start_date")?,
        end_date: get(row, "end_date")?,
        status: parse_column("status", &status)?,
        closed_at: get(row, "closed_at")?,
        closed_by: get(row, "closed_by")?,
        locked_at: get(row, "locked_at")?,
        created_at: get(row, "created_at")?,
    })
}

fn source_from_row(row: &Row) -> Result<Option<SourceKey>, StoreError> {
    let source_type: Option<String> = get(row, "source_type")?;
    let source_id: Option<i64> = get(row, "source_id")?;
    let event_type: Option<String> = get(row, "event_type")?;
    Ok(match (source_type, source_id, event_type) {
        (Some(source_type), Some(source_id), Some(event_type)) => Some(SourceKey {
            source_type,
            source_id,
            event_type,
        }),
        _ => None,
    })
}

fn journal_from_row(row: &Row) -> Result<JournalEntry, StoreError> {
    let entry_type: String = get(row, "entry_type")?;
    Ok(JournalEntry {
        id: get(row, "id")?,
        journal_number: get(row, "journal_number")?,
        entry_date: get(row, "entry_date")?,
        entry_type: parse_column("entry_type", &entry_type)?,
        source: source_from_row(row)?,
        description: get(row, "description")?,
        total_debit: get(row, "total_debit")?,
        total_credit: get(row, "total_credit")?,
        is_posted: get(row, "is_posted")?,
        posted_at: get(row, "posted_at")?,
        reverses_entry_id: get(row, "reverses_entry_id")?,
        created_by: get(row, "created_by")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn line_from_row(row: &Row) -> Result<JournalLine, StoreError> {
    Ok(JournalLine {
        id: get(row, "id")?,
        journal_entry_id: get(row, "journal_entry_id")?,
        line_number: get(row, "line_number")?,
        account_id: get(row, "account_id")?,
        account_code: get(row, "account_code")?,
        debit: get(row, "debit")?,
        credit: get(row, "credit")?,
        description: get(row, "description")?,
    })
}

fn mapping_from_row(row: &Row) -> Result<AccountMapping, StoreError> {
    let key: String = get(row, "key")?;
    Ok(AccountMapping {
        key: parse_column("key", &key)?,
        account_id: get(row, "account_id")?,
        account_code: get(row, "account_code")?,
        is_active: get(row, "is_active")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn failure_from_row(row: &Row) -> Result<JournalFailure, StoreError> {
    Ok(JournalFailure {
        id: get(row, "id")?,
        source: SourceKey {
            source_type: get(row, "source_type")?,
            source_id: get(row, "source_id")?,
            event_type: get(row, "event_type")?,
        },
        attempts: get(row, "attempts")?,
        last_error: get(row, "last_error")?,
        last_attempt_at: get(row, "last_attempt_at")?,
        resolved_at: get(row, "resolved_at")?,
        created_at: get(row, "created_at")?,
    })
}

fn zreport_from_row(row: &Row) -> Result<ZReport, StoreError> {
    Ok(ZReport {
        id: get(row, "id")?,
        session_id: get(row, "session_id")?,
        business_date: get(row, "business_date")?,
        closed_at: get(row, "closed_at")?,
        totals: ZReportTotals {
            gross_sales: get(row, "gross_sales")?,
            discounts: get(row, "discounts")?,
            net_sales: get(row, "net_sales")?,
            vat_amount: get(row, "vat_amount")?,
            cash_total: get(row, "cash_total")?,
            card_total: get(row, "card_total")?,
            on_account_total: get(row, "on_account_total")?,
            sale_count: get(row, "sale_count")?,
        },
        journal_entry_id: get(row, "journal_entry_id")?,
        journal_posted_at: get(row, "journal_posted_at")?,
        created_at: get(row, "created_at")?,
    })
}

/// Lock the covering period against concurrent close until the transaction ends.
fn ensure_open_period(executor: &dyn LedgerExecutor, date: NaiveDate) -> Result<(), StoreError> {
    let row = executor.query_opt(
        "SELECT status FROM fiscal_periods WHERE $1 BETWEEN start_date AND end_date FOR SHARE",
        &[&date],
    )?;
    let status: Option<PeriodStatus> = match row {
        Some(row) => {
            let status: String = get(&row, "status")?;
            Some(parse_column("status", &status)?)
        }
        None => None,
    };
    match status {
        Some(status) if status.accepts_postings() => Ok(()),
        _ => Err(StoreError::PeriodUnavailable(date)),
    }
}

/// Apply in ascending account id so concurrent postings lock accounts in the same order.
fn apply_deltas(executor: &dyn LedgerExecutor, deltas: &[BalanceDelta]) -> Result<(), StoreError> {
    let mut ordered = deltas.to_vec();
    ordered.sort_by_key(|d| d.account_id);
    for delta in ordered {
        let updated = executor.execute(
            "UPDATE accounts SET current_balance = current_balance + $2 WHERE id = $1",
            &[&delta.account_id, &delta.amount],
        )?;
        if updated != 1 {
            return Err(StoreError::NotFound(format!("account id {}", delta.account_id)));
        }
    }
    Ok(())
}

fn select_journal(executor: &dyn LedgerExecutor, id: i64) -> Result<Option<JournalEntry>, StoreError> {
    let sql = format!("SELECT {JOURNAL_COLUMNS} FROM journal_entries WHERE id = $1");
    executor
        .query_opt(&sql, &[&id])?
        .map(|row| journal_from_row(&row))
        .transpose()
}

fn select_zreport_by_session(
    executor: &dyn LedgerExecutor,
    session_id: i64,
) -> Result<Option<ZReport>, StoreError> {
    let sql = format!("SELECT {ZREPORT_COLUMNS} FROM z_reports WHERE session_id = $1");
    executor
        .query_opt(&sql, &[&session_id])?
        .map(|row| zreport_from_row(&row))
        .transpose()
}

pub struct PgStore {
    executor: PgExecutor,
}

impl PgStore {
    pub fn new(executor: PgExecutor) -> Self {
        Self { executor }
    }

    /// Open a dedicated connection with the configured session settings.
    pub fn connect(config: &DatabaseConfig) -> Result<Self, ConnectionError> {
        let client = connect_with_config(config)?;
        Ok(Self::new(PgExecutor::new(client)))
    }

    pub fn executor(&self) -> &PgExecutor {
        &self.executor
    }

    fn in_transaction<T, F>(&self, body: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn LedgerExecutor) -> Result<T, StoreError>,
    {
        run_in_transaction(self.executor.client(), IsolationLevel::ReadCommitted, |tx| {
            body(tx)
        })
    }
}

impl LedgerStore for PgStore {
    fn insert_category(&self, new: &NewAccountCategory) -> Result<AccountCategory, StoreError> {
        let row = self.executor.query_opt(
            "INSERT INTO account_categories (code, name, account_type) VALUES ($1, $2, $3) \
             ON CONFLICT (code) DO NOTHING RETURNING id, code, name, account_type",
            &[&new.code, &new.name, &new.account_type.as_str()],
        )?;
        match row {
            Some(row) => category_from_row(&row),
            None => Err(StoreError::Conflict(format!(
                "account category {} already exists",
                new.code
            ))),
        }
    }

    fn category_by_code(&self, code: &str) -> Result<Option<AccountCategory>, StoreError> {
        self.executor
            .query_opt(
                "SELECT id, code, name, account_type FROM account_categories WHERE code = $1",
                &[&code],
            )?
            .map(|row| category_from_row(&row))
            .transpose()
    }

    fn insert_account(&self, new: &NewAccount) -> Result<Account, StoreError> {
        let category = self
            .category_by_code(&new.category_code)?
            .ok_or_else(|| StoreError::NotFound(format!("account category {}", new.category_code)))?;
        let inserted = self.executor.query_opt(
            "INSERT INTO accounts (account_code, name, category_id) VALUES ($1, $2, $3) \
             ON CONFLICT (account_code) DO NOTHING RETURNING id",
            &[&new.account_code, &new.name, &category.id],
        )?;
        if inserted.is_none() {
            return Err(StoreError::Conflict(format!(
                "account {} already exists",
                new.account_code
            )));
        }
        self.account_by_code(&new.account_code)?
            .ok_or_else(|| StoreError::NotFound(format!("account {}", new.account_code)))
    }

    fn account_by_code(&self, code: &str) -> Result<Option<Account>, StoreError> {
        let sql = format!("{ACCOUNT_SELECT} WHERE a.account_code = $1");
        self.executor
            .query_opt(&sql, &[&code])?
            .map(|row| account_from_row(&row))
            .transpose()
    }

    fn accounts_by_codes(&self, codes: &[String]) -> Result<Vec<Account>, StoreError> {
        let sql = format!("{ACCOUNT_SELECT} WHERE a.account_code = ANY($1)");
        self.executor
            .query_all(&sql, &[&codes])?
            .iter()
            .map(account_from_row)
            .collect()
    }

    fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let sql = format!("{ACCOUNT_SELECT} ORDER BY a.account_code");
        self.executor
            .query_all(&sql, &[])?
            .iter()
            .map(account_from_row)
            .collect()
    }

    fn set_account_active(&self, code: &str, active: bool) -> Result<Option<Account>, StoreError> {
        let updated = self.executor.execute(
            "UPDATE accounts SET is_active = $2 WHERE account_code = $1",
            &[&code, &active],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        self.account_by_code(code)
    }

    fn insert_period(&self, new: &NewFiscalPeriod) -> Result<FiscalPeriod, StoreError> {
        if new.start_date >= new.end_date {
            return Err(StoreError::Conflict(format!(
                "period {} has start_date >= end_date",
                new.name
            )));
        }
        self.in_transaction(|tx| {
            tx.execute("LOCK TABLE fiscal_periods IN SHARE ROW EXCLUSIVE MODE", &[])?;
            let overlapping = tx.query_opt(
                "SELECT name FROM fiscal_periods WHERE start_date <= $2 AND $1 <= end_date LIMIT 1",
                &[&new.start_date, &new.end_date],
            )?;
            if let Some(row) = overlapping {
                let existing: String = get(&row, "name")?;
                return Err(StoreError::Conflict(format!(
                    "period {} overlaps {existing}",
                    new.name
                )));
            }
            let sql = format!(
                "INSERT INTO fiscal_periods (name, start_date, end_date) VALUES ($1, $2, $3) \
                 RETURNING {PERIOD_COLUMNS}"
            );
            let row = tx.query_one(&sql, &[&new.name, &new.start_date, &new.end_date])?;
            period_from_row(&row)
        })
    }

    fn period_by_id(&self, id: i64) -> Result<Option<FiscalPeriod>, StoreError> {
        let sql = format!("SELECT {PERIOD_COLUMNS} FROM fiscal_periods WHERE id = $1");
        self.executor
            .query_opt(&sql, &[&id])?
            .map(|row| period_from_row(&row))
            .transpose()
    }

    fn period_covering(&self, date: NaiveDate) -> Result<Option<FiscalPeriod>, StoreError> {
        let sql = format!(
            "SELECT {PERIOD_COLUMNS} FROM fiscal_periods WHERE $1 BETWEEN start_date AND end_date"
        );
        self.executor
            .query_opt(&sql, &[&date])?
            .map(|row| period_from_row(&row))
            .transpose()
    }

    fn list_periods(&self) -> Result<Vec<FiscalPeriod>, StoreError> {
        let sql = format!("SELECT {PERIOD_COLUMNS} FROM fiscal_periods ORDER BY start_date");
        self.executor
            .query_all(&sql, &[])?
            .iter()
            .map(period_from_row)
            .collect()
    }

    fn transition_period(
        &self,
        id: i64,
        from: PeriodStatus,
        to: PeriodStatus,
        by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<Option<FiscalPeriod>, StoreError> {
        let row = match to {
            PeriodStatus::Closed => {
                let sql = format!(
                    "UPDATE fiscal_periods SET status = $3, closed_at = $4, closed_by = $5 \
                     WHERE id = $1 AND status = $2 RETURNING {PERIOD_COLUMNS}"
                );
                self.executor
                    .query_opt(&sql, &[&id, &from.as_str(), &to.as_str(), &at, &by])?
            }
            PeriodStatus::Locked => {
                let sql = format!(
                    "UPDATE fiscal_periods SET status = $3, locked_at = $4 \
                     WHERE id = $1 AND status = $2 RETURNING {PERIOD_COLUMNS}"
                );
                self.executor
                    .query_opt(&sql, &[&id, &from.as_str(), &to.as_str(), &at])?
            }
            PeriodStatus::Open => {
                let sql = format!(
                    "UPDATE fiscal_periods SET status = $3 \
                     WHERE id = $1 AND status = $2 RETURNING {PERIOD_COLUMNS}"
                );
                self.executor
                    .query_opt(&sql, &[&id, &from.as_str(), &to.as_str()])?
            }
        };
        row.map(|row| period_from_row(&row)).transpose()
    }

    fn insert_journal(&self, draft: &JournalDraft) -> Result<Inserted<JournalEntry>, StoreError> {
        let (source_type, source_id, event_type) = match &draft.source {
            Some(key) => (
                Some(key.source_type.as_str()),
                Some(key.source_id),
                Some(key.event_type.as_str()),
            ),
            None => (None, None, None),
        };

        let created = self.in_transaction(|tx| {
            // Duplicates and closed periods are settled before a number is drawn;
            // `nextval` is not rolled back.
            if let Some(key) = &draft.source {
                tx.execute(
                    "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))",
                    &[&key.to_string()],
                )?;
                let existing = tx.query_opt(
                    "SELECT id FROM journal_entries \
                     WHERE source_type = $1 AND source_id = $2 AND event_type = $3",
                    &[&source_type, &source_id, &event_type],
                )?;
                if existing.is_some() {
                    return Ok(None);
                }
            }
            ensure_open_period(tx, draft.entry_date)?;

            let sequence: i64 = get(
                &tx.query_one("SELECT nextval('journal_number_seq') AS seq", &[])?,
                "seq",
            )?;
            let journal_number = format_journal_number(sequence);
            let header = tx.query_opt(
                "INSERT INTO journal_entries (journal_number, entry_date, entry_type, source_type, \
                 source_id, event_type, description, total_debit, total_credit, reverses_entry_id, \
                 created_by) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT (source_type, source_id, event_type) DO NOTHING RETURNING id",
                &[
                    &journal_number,
                    &draft.entry_date,
                    &draft.entry_type.as_str(),
                    &source_type,
                    &source_id,
                    &event_type,
                    &draft.description,
                    &draft.total_debit,
                    &draft.total_credit,
                    &draft.reverses_entry_id,
                    &draft.created_by,
                ],
            )?;
            let Some(header) = header else {
                return Ok(None);
            };
            let id: i64 = get(&header, "id")?;

            for (index, line) in draft.lines.iter().enumerate() {
                let line_number = index as i32 + 1;
                tx.execute(
                    "INSERT INTO journal_lines (journal_entry_id, line_number, account_id, debit, \
                     credit, description) VALUES ($1, $2, $3, $4, $5, $6)",
                    &[
                        &id,
                        &line_number,
                        &line.account_id,
                        &line.debit,
                        &line.credit,
                        &line.description,
                    ],
                )?;
            }

            if let Some(posted_at) = draft.posted_at {
                apply_deltas(tx, &draft.balance_deltas)?;
                tx.execute(
                    "UPDATE journal_entries SET is_posted = TRUE, posted_at = $2, updated_at = $2 \
                     WHERE id = $1",
                    &[&id, &posted_at],
                )?;
            }

            select_journal(tx, id)
        })?;

        if let Some(entry) = created {
            return Ok(Inserted::Created(entry));
        }
        let key = draft
            .source
            .as_ref()
            .ok_or_else(|| StoreError::Conflict("journal insert skipped without a source key".into()))?;
        self.journal_by_source(key)?
            .map(Inserted::Existing)
            .ok_or_else(|| StoreError::Conflict(format!("journal for {key} vanished after conflict")))
    }

    fn mark_journal_posted(
        &self,
        id: i64,
        posted_at: DateTime<Utc>,
        deltas: &[BalanceDelta],
    ) -> Result<JournalEntry, StoreError> {
        self.in_transaction(|tx| {
            let row = tx
                .query_opt(
                    "SELECT entry_date, is_posted FROM journal_entries WHERE id = $1 FOR UPDATE",
                    &[&id],
                )?
                .ok_or_else(|| StoreError::NotFound(format!("journal entry {id}")))?;
            let is_posted: bool = get(&row, "is_posted")?;
            if is_posted {
                return Err(StoreError::Immutable(format!("journal entry {id} is posted")));
            }
            let entry_date: NaiveDate = get(&row, "entry_date")?;
            ensure_open_period(tx, entry_date)?;
            apply_deltas(tx, deltas)?;
            tx.execute(
                "UPDATE journal_entries SET is_posted = TRUE, posted_at = $2, updated_at = $2 \
                 WHERE id = $1",
                &[&id, &posted_at],
            )?;
            select_journal(tx, id)?
                .ok_or_else(|| StoreError::NotFound(format!("journal entry {id}")))
        })
    }

    fn amend_journal(
        &self,
        id: i64,
        amendment: &JournalAmendment,
    ) -> Result<JournalEntry, StoreError> {
        self.in_transaction(|tx| {
            let row = tx
                .query_opt(
                    "SELECT is_posted FROM journal_entries WHERE id = $1 FOR UPDATE",
                    &[&id],
                )?
                .ok_or_else(|| StoreError::NotFound(format!("journal entry {id}")))?;
            let is_posted: bool = get(&row, "is_posted")?;
            if is_posted {
                return Err(StoreError::Immutable(format!("journal entry {id} is posted")));
            }
            tx.execute(
                "UPDATE journal_entries SET description = COALESCE($2, description), \
                 entry_date = COALESCE($3, entry_date), updated_at = NOW() WHERE id = $1",
                &[&id, &amendment.description, &amendment.entry_date],
            )?;
            select_journal(tx, id)?
                .ok_or_else(|| StoreError::NotFound(format!("journal entry {id}")))
        })
    }

    fn journal_by_id(&self, id: i64) -> Result<Option<JournalEntry>, StoreError> {
        select_journal(&self.executor, id)
    }

    fn journal_by_source(&self, key: &SourceKey) -> Result<Option<JournalEntry>, StoreError> {
        let sql = format!(
            "SELECT {JOURNAL_COLUMNS} FROM journal_entries \
             WHERE source_type = $1 AND source_id = $2 AND event_type = $3"
        );
        self.executor
            .query_opt(&sql, &[&key.source_type, &key.source_id, &key.event_type])?
            .map(|row| journal_from_row(&row))
            .transpose()
    }

    fn count_journals_for_source(&self, key: &SourceKey) -> Result<i64, StoreError> {
        let row = self.executor.query_one(
            "SELECT COUNT(*) AS n FROM journal_entries \
             WHERE source_type = $1 AND source_id = $2 AND event_type = $3",
            &[&key.source_type, &key.source_id, &key.event_type],
        )?;
        get(&row, "n")
    }

    fn journal_lines(&self, journal_id: i64) -> Result<Vec<JournalLine>, StoreError> {
        self.executor
            .query_all(
                "SELECT l.id, l.journal_entry_id, l.line_number, l.account_id, a.account_code, \
                 l.debit, l.credit, l.description FROM journal_lines l \
                 JOIN accounts a ON a.id = l.account_id \
                 WHERE l.journal_entry_id = $1 ORDER BY l.line_number",
                &[&journal_id],
            )?
            .iter()
            .map(line_from_row)
            .collect()
    }

    fn upsert_mapping(&self, key: MappingKey, account_id: i64) -> Result<AccountMapping, StoreError> {
        let exists = self
            .executor
            .query_opt("SELECT id FROM accounts WHERE id = $1", &[&account_id])?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("account id {account_id}")));
        }
        self.executor.execute(
            "INSERT INTO account_mappings (key, account_id, is_active, updated_at) \
             VALUES ($1, $2, TRUE, NOW()) \
             ON CONFLICT (key) DO UPDATE SET account_id = EXCLUDED.account_id, \
             is_active = TRUE, updated_at = NOW()",
            &[&key.as_str(), &account_id],
        )?;
        self.mapping(key)?
            .ok_or_else(|| StoreError::NotFound(format!("mapping {key}")))
    }

    fn mapping(&self, key: MappingKey) -> Result<Option<AccountMapping>, StoreError> {
        let sql = format!("{MAPPING_SELECT} WHERE m.key = $1");
        self.executor
            .query_opt(&sql, &[&key.as_str()])?
            .map(|row| mapping_from_row(&row))
            .transpose()
    }

    fn deactivate_mapping(&self, key: MappingKey) -> Result<Option<AccountMapping>, StoreError> {
        let updated = self.executor.execute(
            "UPDATE account_mappings SET is_active = FALSE, updated_at = NOW() WHERE key = $1",
            &[&key.as_str()],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        self.mapping(key)
    }

    fn list_mappings(&self) -> Result<Vec<AccountMapping>, StoreError> {
        let sql = format!("{MAPPING_SELECT} ORDER BY m.key");
        self.executor
            .query_all(&sql, &[])?
            .iter()
            .map(mapping_from_row)
            .collect()
    }

    fn upsert_failure(
        &self,
        key: &SourceKey,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<Inserted<JournalFailure>, StoreError> {
        let sql = format!(
            "INSERT INTO journal_failures (source_type, source_id, event_type, attempts, \
             last_error, last_attempt_at, created_at) VALUES ($1, $2, $3, 1, $4, $5, $5) \
             ON CONFLICT (source_type, source_id, event_type) DO UPDATE SET \
             attempts = journal_failures.attempts + 1, last_error = EXCLUDED.last_error, \
             last_attempt_at = EXCLUDED.last_attempt_at, resolved_at = NULL \
             RETURNING {FAILURE_COLUMNS}, (xmax = 0) AS inserted"
        );
        let row = self.executor.query_one(
            &sql,
            &[&key.source_type, &key.source_id, &key.event_type, &error, &at],
        )?;
        let failure = failure_from_row(&row)?;
        let inserted: bool = get(&row, "inserted")?;
        Ok(if inserted {
            Inserted::Created(failure)
        } else {
            Inserted::Existing(failure)
        })
    }

    fn resolve_failure(
        &self,
        key: &SourceKey,
        at: DateTime<Utc>,
    ) -> Result<Option<JournalFailure>, StoreError> {
        let sql = format!(
            "UPDATE journal_failures SET resolved_at = $4 \
             WHERE source_type = $1 AND source_id = $2 AND event_type = $3 \
             AND resolved_at IS NULL RETURNING {FAILURE_COLUMNS}"
        );
        self.executor
            .query_opt(&sql, &[&key.source_type, &key.source_id, &key.event_type, &at])?
            .map(|row| failure_from_row(&row))
            .transpose()
    }

    fn failure_by_source(&self, key: &SourceKey) -> Result<Option<JournalFailure>, StoreError> {
        let sql = format!(
            "SELECT {FAILURE_COLUMNS} FROM journal_failures \
             WHERE source_type = $1 AND source_id = $2 AND event_type = $3"
        );
        self.executor
            .query_opt(&sql, &[&key.source_type, &key.source_id, &key.event_type])?
            .map(|row| failure_from_row(&row))
            .transpose()
    }

    fn list_failures(&self, unresolved_only: bool) -> Result<Vec<JournalFailure>, StoreError> {
        let sql = format!(
            "SELECT {FAILURE_COLUMNS} FROM journal_failures \
             WHERE NOT $1 OR resolved_at IS NULL ORDER BY last_attempt_at DESC"
        );
        self.executor
            .query_all(&sql, &[&unresolved_only])?
            .iter()
            .map(failure_from_row)
            .collect()
    }

    fn insert_zreport(&self, new: &NewZReport) -> Result<Inserted<ZReport>, StoreError> {
        let totals = &new.totals;
        let sql = format!(
            "INSERT INTO z_reports (session_id, business_date, closed_at, gross_sales, discounts, \
             net_sales, vat_amount, cash_total, card_total, on_account_total, sale_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (session_id) DO NOTHING RETURNING {ZREPORT_COLUMNS}"
        );
        let row = self.executor.query_opt(
            &sql,
            &[
                &new.session_id,
                &new.business_date,
                &new.closed_at,
                &totals.gross_sales,
                &totals.discounts,
                &totals.net_sales,
                &totals.vat_amount,
                &totals.cash_total,
                &totals.card_total,
                &totals.on_account_total,
                &totals.sale_count,
            ],
        )?;
        if let Some(row) = row {
            return Ok(Inserted::Created(zreport_from_row(&row)?));
        }
        select_zreport_by_session(&self.executor, new.session_id)?
            .map(Inserted::Existing)
            .ok_or_else(|| {
                StoreError::Conflict(format!(
                    "z-report for session {} vanished after conflict",
                    new.session_id
                ))
            })
    }

    fn zreport_by_id(&self, id: i64) -> Result<Option<ZReport>, StoreError> {
        let sql = format!("SELECT {ZREPORT_COLUMNS} FROM z_reports WHERE id = $1");
        self.executor
            .query_opt(&sql, &[&id])?
            .map(|row| zreport_from_row(&row))
            .transpose()
    }

    fn zreport_by_session(&self, session_id: i64) -> Result<Option<ZReport>, StoreError> {
        select_zreport_by_session(&self.executor, session_id)
    }

    fn link_zreport_journal(
        &self,
        report_id: i64,
        journal_entry_id: i64,
        at: DateTime<Utc>,
    ) -> Result<ZReport, StoreError> {
        let sql = format!(
            "UPDATE z_reports SET journal_entry_id = COALESCE(journal_entry_id, $2), \
             journal_posted_at = COALESCE(journal_posted_at, $3) WHERE id = $1 \
             RETURNING {ZREPORT_COLUMNS}"
        );
        let row = self
            .executor
            .query_opt(&sql, &[&report_id, &journal_entry_id, &at])?
            .ok_or_else(|| StoreError::NotFound(format!("z-report {report_id}")))?;
        zreport_from_row(&row)
    }

    fn ledger_totals(&self, account_code: Option<&str>) -> Result<Vec<LedgerTotals>, StoreError> {
        let rows = self.executor.query_all(
            "SELECT a.id, a.account_code, c.account_type, a.current_balance, \
             COALESCE(SUM(l.debit) FILTER (WHERE e.is_posted), 0) AS total_debit, \
             COALESCE(SUM(l.credit) FILTER (WHERE e.is_posted), 0) AS total_credit \
             FROM accounts a \
             JOIN account_categories c ON c.id = a.category_id \
             LEFT JOIN journal_lines l ON l.account_id = a.id \
             LEFT JOIN journal_entries e ON e.id = l.journal_entry_id \
             WHERE $1::text IS NULL OR a.account_code = $1 \
             GROUP BY a.id, a.account_code, c.account_type, a.current_balance \
             ORDER BY a.account_code",
            &[&account_code],
        )?;
        rows.iter()
            .map(|row| {
                let account_type: String = get(row, "account_type")?;
                Ok(LedgerTotals {
                    account_id: get(row, "id")?,
                    account_code: get(row, "account_code")?,
                    normal_side: parse_column("account_type", &account_type)?,
                    stored_balance: get(row, "current_balance")?,
                    total_debit: get(row, "total_debit")?,
                    total_credit: get(row, "total_credit")?,
                })
            })
            .collect()
    }

    fn compare_and_set_balance(
        &self,
        account_id: i64,
        expected: Decimal,
        new: Decimal,
    ) -> Result<bool, StoreError> {
        let updated = self.executor.execute(
            "UPDATE accounts SET current_balance = $3 WHERE id = $1 AND current_balance = $2",
            &[&account_id, &expected, &new],
        )?;
        Ok(updated == 1)
    }
}
