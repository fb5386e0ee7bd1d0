//! Fiscal period guard
//!
//! Answers whether a date is postable and drives the `open → closed → locked` lifecycle.
//! Transitions are compare-and-set in the store, so two concurrent closers cannot both win.

use crate::error::{LedgerError, StoreError};
use crate::model::{FiscalPeriod, NewFiscalPeriod, PeriodStatus};
use crate::store::LedgerStore;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

pub struct PeriodGuard<'a> {
    store: &'a dyn LedgerStore,
}

impl<'a> PeriodGuard<'a> {
    pub fn new(store: &'a dyn LedgerStore) -> Self {
        Self { store }
    }

    pub fn create_period(&self, new: NewFiscalPeriod) -> Result<FiscalPeriod, LedgerError> {
        if new.end_date <= new.start_date {
            return Err(LedgerError::InvalidPeriodRange {
                start_date: new.start_date,
                end_date: new.end_date,
            });
        }
        let period = self.store.insert_period(&new).map_err(|e| match e {
            StoreError::Conflict(_) => LedgerError::PeriodOverlap {
                start_date: new.start_date,
                end_date: new.end_date,
            },
            other => LedgerError::Store(other),
        })?;
        log::info!(
            "created fiscal period {} ({}..={})",
            period.name,
            period.start_date,
            period.end_date
        );
        Ok(period)
    }

    pub fn close_period(&self, id: i64, by_user: Option<Uuid>) -> Result<FiscalPeriod, LedgerError> {
        self.transition(id, PeriodStatus::Open, PeriodStatus::Closed, by_user)
    }

    pub fn lock_period(&self, id: i64) -> Result<FiscalPeriod, LedgerError> {
        self.transition(id, PeriodStatus::Closed, PeriodStatus::Locked, None)
    }

    fn transition(
        &self,
        id: i64,
        from: PeriodStatus,
        to: PeriodStatus,
        by_user: Option<Uuid>,
    ) -> Result<FiscalPeriod, LedgerError> {
        if let Some(period) = self
            .store
            .transition_period(id, from, to, by_user, Utc::now())?
        {
            log::info!("fiscal period {} is now {}", period.name, period.status);
            return Ok(period);
        }
        // Lost the compare-and-set: report the status that blocked it.
        let current = self
            .store
            .period_by_id(id)?
            .ok_or(LedgerError::PeriodNotFound(id))?;
        Err(LedgerError::InvalidPeriodTransition {
            period: current.name,
            from: current.status,
            to,
        })
    }

    /// The open period covering `date`.
    pub fn ensure_postable(&self, date: NaiveDate) -> Result<FiscalPeriod, LedgerError> {
        let period = self
            .store
            .period_covering(date)?
            .ok_or(LedgerError::NoOpenPeriod(date))?;
        if !period.status.accepts_postings() {
            return Err(LedgerError::PeriodNotOpen {
                date,
                period: period.name,
                status: period.status,
            });
        }
        Ok(period)
    }

    pub fn period(&self, id: i64) -> Result<FiscalPeriod, LedgerError> {
        self.store
            .period_by_id(id)?
            .ok_or(LedgerError::PeriodNotFound(id))
    }

    pub fn list(&self) -> Result<Vec<FiscalPeriod>, LedgerError> {
        Ok(self.store.list_periods()?)
    }
}
