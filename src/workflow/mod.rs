//! Derived posting workflows
//!
//! Each workflow turns one business document into one journal entry through
//! [`JournalEngine::create_or_get_journal`], keyed by the document so that retries and
//! duplicate events post at most once. Account codes come from the mapping resolver on every
//! call.
//!
//! Every workflow takes a [`Dispatch`]. In both modes a failure is recorded with the failure
//! tracker and a success resolves any open failure for the same key. `Synchronous` then returns
//! the error to the caller; `Deferred` swallows it and reports [`PostingOutcome::Deferred`].

pub mod bill;
pub mod credit_note;
pub mod invoice;
pub mod opening;
pub mod zreport;

pub use bill::{BillPayment, SupplierBill};
pub use credit_note::{CreditNote, CreditNoteSettlement};
pub use invoice::{CustomerPayment, SalesInvoice};
pub use opening::{read_opening_balances, OpeningBalanceBatch, OpeningBalanceRow};
pub use zreport::aggregate_session;

use crate::chart::ChartOfAccounts;
use crate::config::PostingConfig;
use crate::engine::{JournalEngine, JournalOutcome};
use crate::error::LedgerError;
use crate::failure::{FailureTracker, Notifier};
use crate::mapping::MappingResolver;
use crate::model::{JournalEntry, JournalRequest, LineInput, MappingKey, SourceKey};
use crate::money::{vat_on_net, within_amount_range};
use crate::store::LedgerStore;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// How the caller waits on a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A user is waiting: errors are returned.
    Synchronous,
    /// Fire-and-forget event: errors are recorded and swallowed.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The POS session closed before VAT went live.
    BeforeVatGoLive { closed_on: NaiveDate, go_live: NaiveDate },
    /// Nothing with a positive value to post.
    NothingToPost,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PostingOutcome {
    Posted(JournalOutcome),
    Skipped(SkipReason),
    /// The posting failed under [`Dispatch::Deferred`]; the failure is recorded.
    Deferred,
}

impl PostingOutcome {
    pub fn entry(&self) -> Option<&JournalEntry> {
        match self {
            PostingOutcome::Posted(outcome) => Some(&outcome.entry),
            _ => None,
        }
    }

    pub fn is_posted(&self) -> bool {
        matches!(self, PostingOutcome::Posted(_))
    }
}

/// Cash or bank, for payments and refunds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Bank,
}

impl PaymentMethod {
    pub fn mapping_key(self) -> MappingKey {
        match self {
            PaymentMethod::Cash => MappingKey::Cash,
            PaymentMethod::Bank => MappingKey::Bank,
        }
    }
}

pub struct Workflows<'a> {
    store: &'a dyn LedgerStore,
    engine: JournalEngine<'a>,
    chart: ChartOfAccounts<'a>,
    mappings: MappingResolver<'a>,
    failures: FailureTracker<'a>,
    config: &'a PostingConfig,
}

impl<'a> Workflows<'a> {
    pub fn new(store: &'a dyn LedgerStore, config: &'a PostingConfig) -> Self {
        Self {
            store,
            engine: JournalEngine::new(store),
            chart: ChartOfAccounts::new(store),
            mappings: MappingResolver::new(store),
            failures: FailureTracker::new(store, config.failure_error_max_chars),
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: &'a dyn Notifier) -> Self {
        self.failures = self.failures.with_notifier(notifier);
        self
    }

    pub fn engine(&self) -> &JournalEngine<'a> {
        &self.engine
    }

    pub fn failures(&self) -> &FailureTracker<'a> {
        &self.failures
    }

    /// Run one posting attempt for `key`, recording or resolving its failure row.
    fn dispatch<F>(&self, key: &SourceKey, dispatch: Dispatch, attempt: F) -> Result<PostingOutcome, LedgerError>
    where
        F: FnOnce() -> Result<PostingOutcome, LedgerError>,
    {
        match attempt() {
            Ok(outcome) => {
                if let Err(e) = self.failures.resolve_journal_failure(key) {
                    log::warn!("could not resolve failure record for {key}: {e}");
                }
                Ok(outcome)
            }
            Err(err) => {
                if let Err(record_err) = self.failures.record_journal_failure(key, &err) {
                    log::error!("could not record failure for {key}: {record_err} (posting error: {err})");
                }
                match dispatch {
                    Dispatch::Synchronous => Err(err),
                    Dispatch::Deferred => {
                        log::warn!("deferred posting for {key} failed: {err}");
                        Ok(PostingOutcome::Deferred)
                    }
                }
            }
        }
    }

    fn post(
        &self,
        entry_date: NaiveDate,
        key: &SourceKey,
        description: String,
        lines: Vec<LineInput>,
    ) -> Result<PostingOutcome, LedgerError> {
        let request = JournalRequest::system(entry_date, key.clone(), description, lines);
        self.engine
            .create_or_get_journal(request)
            .map(PostingOutcome::Posted)
    }

    fn account(&self, key: MappingKey) -> Result<String, LedgerError> {
        self.mappings.get_account_code(key)
    }

    /// VAT on an ex-VAT amount; nothing before the go-live date.
    fn vat_for(&self, date: NaiveDate, net: Decimal) -> Result<Decimal, LedgerError> {
        if !within_amount_range(net) {
            return Err(LedgerError::AmountOverflow { line: None });
        }
        if self.config.vat_applies(date) {
            Ok(vat_on_net(net, self.config.vat_rate))
        } else {
            Ok(Decimal::ZERO)
        }
    }
}
