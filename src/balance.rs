//! Balance cache rebuild
//!
//! `accounts.current_balance` is derived data. A rebuild reads each account's cached balance
//! together with its posted line totals in one snapshot, and writes the derived value back with
//! compare-and-set against the balance it read. A concurrent posting makes the write miss;
//! the account is then re-read and retried.

use crate::error::{LedgerError, StoreError};
use crate::model::NormalSide;
use crate::store::{LedgerStore, LedgerTotals};
use rust_decimal::Decimal;
use serde::Serialize;

const DEFAULT_MAX_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildMode {
    /// Report drift, write nothing.
    DryRun,
    /// Overwrite drifted balances.
    Apply,
}

/// One account whose cached balance differs from its posted lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceCorrection {
    pub account_id: i64,
    pub account_code: String,
    pub normal_side: NormalSide,
    pub stored: Decimal,
    pub derived: Decimal,
}

impl BalanceCorrection {
    pub fn difference(&self) -> Decimal {
        self.derived - self.stored
    }

    fn from_totals(totals: &LedgerTotals) -> Option<Self> {
        let derived = totals.derived_balance();
        (derived != totals.stored_balance).then(|| Self {
            account_id: totals.account_id,
            account_code: totals.account_code.clone(),
            normal_side: totals.normal_side,
            stored: totals.stored_balance,
            derived,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub accounts_checked: usize,
    pub corrections: Vec<BalanceCorrection>,
    pub applied: bool,
}

impl RebuildReport {
    pub fn is_consistent(&self) -> bool {
        self.corrections.is_empty()
    }
}

pub struct BalanceRebuilder<'a> {
    store: &'a dyn LedgerStore,
    max_attempts: usize,
}

impl<'a> BalanceRebuilder<'a> {
    pub fn new(store: &'a dyn LedgerStore) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Compare (and with [`RebuildMode::Apply`], fix) one account or all of them.
    pub fn rebuild(
        &self,
        account_code: Option<&str>,
        mode: RebuildMode,
    ) -> Result<RebuildReport, LedgerError> {
        let totals = self.store.ledger_totals(account_code)?;
        if let (Some(code), true) = (account_code, totals.is_empty()) {
            return Err(LedgerError::UnknownAccount(code.to_string()));
        }

        let mut corrections = Vec::new();
        for account in &totals {
            let Some(correction) = BalanceCorrection::from_totals(account) else {
                continue;
            };
            match mode {
                RebuildMode::DryRun => corrections.push(correction),
                RebuildMode::Apply => {
                    if let Some(applied) = self.apply(correction)? {
                        corrections.push(applied);
                    }
                }
            }
        }

        log::info!(
            "balance rebuild checked {} account(s), {} drifted{}",
            totals.len(),
            corrections.len(),
            if mode == RebuildMode::Apply { ", corrected" } else { "" }
        );
        Ok(RebuildReport {
            accounts_checked: totals.len(),
            corrections,
            applied: mode == RebuildMode::Apply,
        })
    }

    /// Write one correction, re-reading the account whenever a concurrent posting wins.
    fn apply(&self, first: BalanceCorrection) -> Result<Option<BalanceCorrection>, LedgerError> {
        let mut correction = first;
        for attempt in 1..=self.max_attempts {
            if self.store.compare_and_set_balance(
                correction.account_id,
                correction.stored,
                correction.derived,
            )? {
                log::warn!(
                    "corrected balance of {} from {} to {}",
                    correction.account_code,
                    correction.stored,
                    correction.derived
                );
                return Ok(Some(correction));
            }
            log::debug!(
                "balance of {} changed during rebuild, retrying (attempt {attempt})",
                correction.account_code
            );
            let fresh = self.store.ledger_totals(Some(&correction.account_code))?;
            match fresh.first().and_then(BalanceCorrection::from_totals) {
                Some(next) => correction = next,
                None => return Ok(None),
            }
        }
        Err(LedgerError::Store(StoreError::Conflict(format!(
            "balance of {} kept changing during rebuild",
            correction.account_code
        ))))
    }
}
