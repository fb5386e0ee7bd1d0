//! # Ledgerguard
//!
//! Double-entry journal posting engine on PostgreSQL for the `may` coroutine runtime.
//!
//! Business documents (POS Z-reports, invoices, bills, credit notes, opening balances) become
//! balanced, immutable journal entries. Each document posts at most once: postings are keyed by
//! `(source_type, source_id, event_type)` and guarded by a unique constraint.
//!
//! ```no_run
//! use ledgerguard::{Dispatch, LedgerConfig, PgStore, Workflows};
//!
//! let config = LedgerConfig::load()?;
//! let store = PgStore::connect(&config.database)?;
//! let workflows = Workflows::new(&store, &config.posting);
//! let outcome = workflows.post_zreport_journal(42, Dispatch::Synchronous)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Layers, bottom up:
//!
//! - [`executor`], [`transaction`], [`connection`]: `may_postgres` access
//! - [`migration`]: embedded schema with constraints and posted-entry triggers
//! - [`store`]: the [`LedgerStore`] seam with PostgreSQL and in-memory backends
//! - [`chart`], [`period`], [`mapping`], [`failure`]: directories and guards
//! - [`engine`]: validation and atomic posting
//! - [`workflow`]: document-to-journal translation
//! - [`balance`]: balance cache rebuild
//! - [`admin`]: operator HTTP endpoint

pub mod admin;
pub mod balance;
pub mod chart;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod executor;
pub mod failure;
pub mod mapping;
pub mod metrics;
pub mod migration;
pub mod model;
pub mod money;
pub mod period;
pub mod store;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
pub mod transaction;
pub mod workflow;

pub use balance::{BalanceCorrection, BalanceRebuilder, RebuildMode, RebuildReport};
pub use chart::ChartOfAccounts;
pub use config::LedgerConfig;
pub use engine::{JournalEngine, JournalOutcome};
pub use error::{LedgerError, StoreError};
pub use executor::{DbError, LedgerExecutor, PgExecutor};
pub use failure::{ChannelNotifier, FailureTracker, LogNotifier, Notifier};
pub use mapping::MappingResolver;
pub use period::PeriodGuard;
pub use store::{Inserted, LedgerStore, MemoryStore, PgStore};
pub use transaction::{IsolationLevel, Transaction};
pub use workflow::{Dispatch, PaymentMethod, PostingOutcome, SkipReason, Workflows};
