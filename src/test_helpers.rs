//! Fixtures for unit and integration tests
//!
//! [`seed_chart`] builds a small chart of accounts with every mapping set and one open
//! fiscal year, on any store. [`TestDatabase`] connects to `TEST_DATABASE_URL` for the
//! PostgreSQL tests and yields `None` when the variable is unset so those tests skip.

use crate::chart::ChartOfAccounts;
use crate::config::DatabaseConfig;
use crate::connection::{connect, ConnectionError};
use crate::error::LedgerError;
use crate::executor::{LedgerExecutor, PgExecutor};
use crate::mapping::MappingResolver;
use crate::migration::{MigrationError, Migrator};
use crate::model::{FiscalPeriod, MappingKey, NewAccount, NewAccountCategory, NewFiscalPeriod, NormalSide};
use crate::period::PeriodGuard;
use crate::store::{LedgerStore, PgStore};
use chrono::NaiveDate;

pub const CASH: &str = "1000";
pub const BANK: &str = "1010";
pub const RECEIVABLES: &str = "1110";
pub const VAT_RECEIVABLE: &str = "1300";
pub const PAYABLES: &str = "2100";
pub const VAT_PAYABLE: &str = "2400";
pub const OPENING_EQUITY: &str = "3000";
pub const SALES: &str = "4000";
pub const POS_SALES: &str = "4100";
pub const EXPENSES: &str = "5000";

/// Seeded chart plus the fiscal year it opened.
#[derive(Debug, Clone)]
pub struct SeededLedger {
    pub fiscal_year: FiscalPeriod,
}

/// Categories, accounts, mappings and an open FY2025 (`2025-01-01..=2025-12-31`).
pub fn seed_chart(store: &dyn LedgerStore) -> Result<SeededLedger, LedgerError> {
    let chart = ChartOfAccounts::new(store);
    for (code, name, side) in [
        ("ASSET", "Assets", NormalSide::DebitNormal),
        ("LIABILITY", "Liabilities", NormalSide::CreditNormal),
        ("EQUITY", "Equity", NormalSide::CreditNormal),
        ("INCOME", "Income", NormalSide::CreditNormal),
        ("EXPENSE", "Expenses", NormalSide::DebitNormal),
    ] {
        chart.create_category(NewAccountCategory {
            code: code.to_string(),
            name: name.to_string(),
            account_type: side,
        })?;
    }

    for (code, name, category) in [
        (CASH, "Cash on hand", "ASSET"),
        (BANK, "Bank", "ASSET"),
        (RECEIVABLES, "Accounts receivable", "ASSET"),
        (VAT_RECEIVABLE, "VAT receivable", "ASSET"),
        (PAYABLES, "Accounts payable", "LIABILITY"),
        (VAT_PAYABLE, "VAT payable", "LIABILITY"),
        (OPENING_EQUITY, "Opening balance equity", "EQUITY"),
        (SALES, "Sales", "INCOME"),
        (POS_SALES, "POS sales", "INCOME"),
        (EXPENSES, "General expenses", "EXPENSE"),
    ] {
        chart.create_account(NewAccount {
            account_code: code.to_string(),
            name: name.to_string(),
            category_code: category.to_string(),
        })?;
    }

    let mappings = MappingResolver::new(store);
    for (key, code) in [
        (MappingKey::Cash, CASH),
        (MappingKey::Bank, BANK),
        (MappingKey::Ar, RECEIVABLES),
        (MappingKey::Ap, PAYABLES),
        (MappingKey::Sales, POS_SALES),
        (MappingKey::Expense, EXPENSES),
        (MappingKey::VatPayable, VAT_PAYABLE),
        (MappingKey::VatReceivable, VAT_RECEIVABLE),
        (MappingKey::OpeningEquity, OPENING_EQUITY),
    ] {
        mappings.set_mapping(key, code)?;
    }

    let fiscal_year = PeriodGuard::new(store).create_period(NewFiscalPeriod {
        name: "FY2025".to_string(),
        start_date: date(2025, 1, 1),
        end_date: date(2025, 12, 31),
    })?;
    Ok(SeededLedger { fiscal_year })
}

/// Shorthand for a calendar date in tests.
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

/// PostgreSQL database named by `TEST_DATABASE_URL`.
pub struct TestDatabase {
    url: String,
}

impl TestDatabase {
    pub const ENV_VAR: &'static str = "TEST_DATABASE_URL";

    /// `None` when `TEST_DATABASE_URL` is unset.
    pub fn from_env() -> Option<Self> {
        std::env::var(Self::ENV_VAR)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(|url| Self { url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn executor(&self) -> Result<PgExecutor, ConnectionError> {
        connect(&self.url).map(PgExecutor::new)
    }

    /// A store on its own connection.
    pub fn store(&self) -> Result<PgStore, ConnectionError> {
        PgStore::connect(&DatabaseConfig {
            url: self.url.clone(),
            ..DatabaseConfig::default()
        })
    }

    /// Drop every ledger object and re-apply the embedded migrations.
    pub fn reset(&self) -> Result<(), MigrationError> {
        let executor = self
            .executor()
            .map_err(|e| MigrationError::Database(crate::executor::DbError::Other(e.to_string())))?;
        executor.execute("DROP SCHEMA public CASCADE", &[])?;
        executor.execute("CREATE SCHEMA public", &[])?;
        Migrator::embedded(30).up(&executor)?;
        Ok(())
    }
}
