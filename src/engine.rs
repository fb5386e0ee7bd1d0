//! Journal engine
//!
//! Validates candidate lines, resolves accounts, checks the period and hands a
//! [`JournalDraft`] to the store, which persists header, lines and (for posted entries) the
//! balance cache as one unit.
//!
//! Validation order for a line set:
//!
//! 1. no negative amounts
//! 2. at least one nonzero amount
//! 3. exactly one side nonzero per line
//! 4. at most two decimal places
//! 5. every amount and both totals within `NUMERIC(19, 2)`
//! 6. `Σdebit == Σcredit`
//!
//! then unknown/inactive accounts, then the fiscal period.

use crate::chart::ChartOfAccounts;
use crate::error::{LedgerError, StoreError};
use crate::model::{
    Account, BalanceDelta, DraftLine, JournalAmendment, JournalDraft, JournalEntry, JournalLine,
    JournalRequest, LineInput, SourceKey,
};
use crate::money::{checked_sum, has_currency_precision, within_amount_range};
use crate::period::PeriodGuard;
use crate::store::{Inserted, LedgerStore};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use uuid::Uuid;

/// Result of an idempotent posting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalOutcome {
    pub entry: JournalEntry,
    /// `false` when the entry already existed for the source key.
    pub created: bool,
}

/// Check a line set and return `(Σdebit, Σcredit)`.
pub fn validate_lines(lines: &[LineInput]) -> Result<(Decimal, Decimal), LedgerError> {
    for (index, line) in lines.iter().enumerate() {
        if line.debit < Decimal::ZERO || line.credit < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount {
                line: index + 1,
                account_code: line.account_code.clone(),
            });
        }
    }

    if lines.iter().all(|l| l.debit.is_zero() && l.credit.is_zero()) {
        return Err(LedgerError::ZeroValueEntry);
    }

    for (index, line) in lines.iter().enumerate() {
        if line.debit.is_zero() == line.credit.is_zero() {
            return Err(LedgerError::SingleSideViolation {
                line: index + 1,
                account_code: line.account_code.clone(),
            });
        }
    }

    for (index, line) in lines.iter().enumerate() {
        let amount = if line.debit.is_zero() { line.credit } else { line.debit };
        if !has_currency_precision(amount) {
            return Err(LedgerError::AmountPrecision {
                line: index + 1,
                amount,
            });
        }
        if !within_amount_range(amount) {
            return Err(LedgerError::AmountOverflow {
                line: Some(index + 1),
            });
        }
    }

    let overflow = || LedgerError::AmountOverflow { line: None };
    let total_debit = checked_sum(lines.iter().map(|l| l.debit)).ok_or_else(overflow)?;
    let total_credit = checked_sum(lines.iter().map(|l| l.credit)).ok_or_else(overflow)?;
    if total_debit != total_credit {
        return Err(LedgerError::Unbalanced {
            total_debit,
            total_credit,
        });
    }
    Ok((total_debit, total_credit))
}

/// Per-account change to the balance cache, aggregated and ordered by account id.
pub fn balance_deltas<'l, I>(lines: I, accounts: &HashMap<String, Account>) -> Vec<BalanceDelta>
where
    I: IntoIterator<Item = (&'l str, Decimal, Decimal)>,
{
    let mut deltas: BTreeMap<i64, Decimal> = BTreeMap::new();
    for (code, debit, credit) in lines {
        if let Some(account) = accounts.get(code) {
            *deltas.entry(account.id).or_default() += account.normal_side.balance(debit, credit);
        }
    }
    deltas
        .into_iter()
        .filter(|(_, amount)| !amount.is_zero())
        .map(|(account_id, amount)| BalanceDelta { account_id, amount })
        .collect()
}

pub struct JournalEngine<'a> {
    store: &'a dyn LedgerStore,
    chart: ChartOfAccounts<'a>,
    periods: PeriodGuard<'a>,
}

impl<'a> JournalEngine<'a> {
    pub fn new(store: &'a dyn LedgerStore) -> Self {
        Self {
            store,
            chart: ChartOfAccounts::new(store),
            periods: PeriodGuard::new(store),
        }
    }

    /// Create an entry. A source key that already has an entry fails with `DuplicateSource`.
    pub fn create_journal_entry(&self, request: JournalRequest) -> Result<JournalEntry, LedgerError> {
        if let Some(key) = &request.source {
            if self.store.journal_by_source(key)?.is_some() {
                return Err(LedgerError::DuplicateSource(key.clone()));
            }
        }
        match (self.insert(&request)?, request.source) {
            (Inserted::Existing(_), Some(key)) => Err(LedgerError::DuplicateSource(key)),
            (inserted, _) => Ok(inserted.into_inner()),
        }
    }

    /// Create the entry for `request.source`, or return the one that already exists unchanged.
    pub fn create_or_get_journal(&self, request: JournalRequest) -> Result<JournalOutcome, LedgerError> {
        let key = request.source.clone().ok_or_else(|| {
            LedgerError::InvalidInput("create_or_get_journal requires a source key".to_string())
        })?;

        #[cfg(feature = "tracing")]
        let span = crate::metrics::tracing_helpers::posting_span(
            &key.source_type,
            key.source_id,
            &key.event_type,
        );
        #[cfg(feature = "tracing")]
        let _entered = span.enter();

        if let Some(entry) = self.store.journal_by_source(&key)? {
            return Ok(self.existing(&key, entry));
        }
        match self.insert(&request)? {
            Inserted::Created(entry) => Ok(JournalOutcome {
                entry,
                created: true,
            }),
            Inserted::Existing(entry) => Ok(self.existing(&key, entry)),
        }
    }

    fn existing(&self, key: &SourceKey, entry: JournalEntry) -> JournalOutcome {
        log::debug!("journal {} already exists for {}", entry.journal_number, key);
        #[cfg(feature = "metrics")]
        crate::metrics::METRICS.record_idempotent_hit(&key.source_type);
        JournalOutcome {
            entry,
            created: false,
        }
    }

    fn insert(&self, request: &JournalRequest) -> Result<Inserted<JournalEntry>, LedgerError> {
        let started = Instant::now();
        let draft = self.prepare(request)?;
        let inserted = self
            .store
            .insert_journal(&draft)
            .map_err(|e| self.store_error(e))?;

        if let Inserted::Created(entry) = &inserted {
            let source_type = entry
                .source
                .as_ref()
                .map_or("manual", |key| key.source_type.as_str());
            log::info!(
                "created journal {} ({}) on {} for {}: {} {}",
                entry.journal_number,
                source_type,
                entry.entry_date,
                entry.total_debit,
                if entry.is_posted { "posted" } else { "draft" },
                entry.description
            );
            #[cfg(feature = "metrics")]
            crate::metrics::METRICS.record_posting(source_type, started.elapsed());
        }
        #[cfg(not(feature = "metrics"))]
        let _ = started;
        Ok(inserted)
    }

    fn prepare(&self, request: &JournalRequest) -> Result<JournalDraft, LedgerError> {
        let (total_debit, total_credit) = validate_lines(&request.lines)?;
        let accounts = self
            .chart
            .resolve_codes(request.lines.iter().map(|l| l.account_code.as_str()))?;
        self.periods.ensure_postable(request.entry_date)?;

        let mut lines = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            let account = accounts
                .get(&line.account_code)
                .ok_or_else(|| LedgerError::UnknownAccount(line.account_code.clone()))?;
            lines.push(DraftLine {
                account_id: account.id,
                account_code: line.account_code.clone(),
                debit: line.debit,
                credit: line.credit,
                description: line.description.clone(),
            });
        }

        let balance_deltas = if request.auto_post {
            balance_deltas(
                lines
                    .iter()
                    .map(|l| (l.account_code.as_str(), l.debit, l.credit)),
                &accounts,
            )
        } else {
            Vec::new()
        };

        Ok(JournalDraft {
            entry_date: request.entry_date,
            entry_type: request.entry_type,
            source: request.source.clone(),
            description: request.description.clone(),
            total_debit,
            total_credit,
            lines,
            created_by: request.created_by,
            reverses_entry_id: request.reverses_entry_id,
            posted_at: request.auto_post.then(Utc::now),
            balance_deltas,
        })
    }

    /// Post a draft, applying its lines to the balance cache in the same unit.
    pub fn post_journal(&self, id: i64) -> Result<JournalEntry, LedgerError> {
        let entry = self.get_journal(id)?;
        if entry.is_posted {
            return Err(LedgerError::AlreadyPosted(id));
        }
        self.periods.ensure_postable(entry.entry_date)?;

        let lines = self.journal_lines(id)?;
        let accounts = self
            .chart
            .resolve_codes(lines.iter().map(|l| l.account_code.as_str()))?;
        let deltas = balance_deltas(
            lines
                .iter()
                .map(|l| (l.account_code.as_str(), l.debit, l.credit)),
            &accounts,
        );

        let posted = self
            .store
            .mark_journal_posted(id, Utc::now(), &deltas)
            .map_err(|e| match e {
                StoreError::Immutable(_) => LedgerError::AlreadyPosted(id),
                other => self.store_error(other),
            })?;
        log::info!("posted journal {}", posted.journal_number);
        Ok(posted)
    }

    /// Change description or date of a draft. Posted entries are immutable.
    pub fn amend_journal(
        &self,
        id: i64,
        amendment: &JournalAmendment,
    ) -> Result<JournalEntry, LedgerError> {
        let entry = self.get_journal(id)?;
        if entry.is_posted {
            return Err(LedgerError::PostedEntryImmutable(id));
        }
        if amendment.is_empty() {
            return Ok(entry);
        }
        if let Some(date) = amendment.entry_date {
            self.periods.ensure_postable(date)?;
        }
        self.store.amend_journal(id, amendment).map_err(|e| match e {
            StoreError::Immutable(_) => LedgerError::PostedEntryImmutable(id),
            StoreError::NotFound(_) => LedgerError::JournalNotFound(id),
            other => LedgerError::Store(other),
        })
    }

    /// Post an entry with every line's sides swapped, once per original entry.
    pub fn reverse_journal(
        &self,
        id: i64,
        entry_date: NaiveDate,
        created_by: Option<Uuid>,
    ) -> Result<JournalOutcome, LedgerError> {
        let original = self.get_journal(id)?;
        if !original.is_posted {
            return Err(LedgerError::NotReversible {
                id,
                reason: "entry is not posted",
            });
        }
        if original.reverses_entry_id.is_some() {
            return Err(LedgerError::NotReversible {
                id,
                reason: "entry is itself a reversal",
            });
        }

        let lines = self
            .journal_lines(id)?
            .into_iter()
            .map(|line| LineInput {
                account_code: line.account_code,
                debit: line.credit,
                credit: line.debit,
                description: line.description,
            })
            .collect();
        let mut request = JournalRequest::system(
            entry_date,
            SourceKey::new("journal_entry", id, "reversed"),
            format!("Reversal of {}", original.journal_number),
            lines,
        );
        request.created_by = created_by;
        request.reverses_entry_id = Some(id);
        self.create_or_get_journal(request)
    }

    pub fn get_journal(&self, id: i64) -> Result<JournalEntry, LedgerError> {
        self.store
            .journal_by_id(id)?
            .ok_or(LedgerError::JournalNotFound(id))
    }

    pub fn journal_lines(&self, id: i64) -> Result<Vec<JournalLine>, LedgerError> {
        Ok(self.store.journal_lines(id)?)
    }

    pub fn find_by_source(&self, key: &SourceKey) -> Result<Option<JournalEntry>, LedgerError> {
        Ok(self.store.journal_by_source(key)?)
    }

    pub fn count_for_source(&self, key: &SourceKey) -> Result<i64, LedgerError> {
        Ok(self.store.count_journals_for_source(key)?)
    }

    /// The period may have closed between the guard and the write; report which way.
    fn store_error(&self, err: StoreError) -> LedgerError {
        match err {
            StoreError::PeriodUnavailable(date) => match self.periods.ensure_postable(date) {
                Err(e) => e,
                Ok(_) => LedgerError::NoOpenPeriod(date),
            },
            other => LedgerError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_validate_balanced() {
        let lines = vec![LineInput::debit("1000", d("50.00")), LineInput::credit("4000", d("50.00"))];
        assert_eq!(validate_lines(&lines).unwrap(), (d("50.00"), d("50.00")));
    }

    #[test]
    fn test_validate_unbalanced() {
        let lines = vec![LineInput::debit("1000", d("100.00")), LineInput::credit("4000", d("90.00"))];
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::Unbalanced { total_debit, total_credit })
                if total_debit == d("100.00") && total_credit == d("90.00")
        ));
    }

    #[test]
    fn test_validate_both_sides_on_one_line() {
        let lines = vec![
            LineInput {
                account_code: "1000".into(),
                debit: d("10.00"),
                credit: d("10.00"),
                description: None,
            },
            LineInput::credit("4000", d("0.00")),
        ];
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::SingleSideViolation { line: 1, .. })
        ));
    }

    #[test]
    fn test_validate_empty_line_is_single_side_violation() {
        let lines = vec![
            LineInput::debit("1000", d("10.00")),
            LineInput::credit("4000", d("10.00")),
            LineInput::credit("2400", Decimal::ZERO),
        ];
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::SingleSideViolation { line: 3, .. })
        ));
    }

    #[test]
    fn test_validate_negative_and_zero() {
        let negative = vec![LineInput::debit("1000", d("-5.00")), LineInput::credit("4000", d("-5.00"))];
        assert!(matches!(
            validate_lines(&negative),
            Err(LedgerError::NegativeAmount { line: 1, .. })
        ));

        let zero = vec![LineInput::debit("1000", Decimal::ZERO), LineInput::credit("4000", Decimal::ZERO)];
        assert!(matches!(validate_lines(&zero), Err(LedgerError::ZeroValueEntry)));
        assert!(matches!(validate_lines(&[]), Err(LedgerError::ZeroValueEntry)));
    }

    #[test]
    fn test_validate_precision() {
        let lines = vec![LineInput::debit("1000", d("10.005")), LineInput::credit("4000", d("10.005"))];
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::AmountPrecision { line: 1, .. })
        ));
        // Trailing zeros are not extra precision.
        let padded = vec![LineInput::debit("1000", d("10.500")), LineInput::credit("4000", d("10.5"))];
        assert!(validate_lines(&padded).is_ok());
    }

    #[test]
    fn test_validate_amount_overflow() {
        let huge = d("50000000000000000000000000000");
        let lines = vec![
            LineInput::debit("1000", huge),
            LineInput::debit("1010", huge),
            LineInput::credit("4000", huge),
            LineInput::credit("4100", huge),
        ];
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::AmountOverflow { line: Some(1) })
        ));

        let max = crate::money::MAX_AMOUNT;
        let lines = vec![
            LineInput::debit("1000", max),
            LineInput::debit("1010", max),
            LineInput::credit("4000", max),
            LineInput::credit("4100", max),
        ];
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::AmountOverflow { line: None })
        ));

        let lines = vec![LineInput::debit("1000", max), LineInput::credit("4000", max)];
        assert_eq!(validate_lines(&lines).unwrap(), (max, max));
    }
}
