//! Migration state table management

use super::error::MigrationError;
use crate::executor::{DbError, LedgerExecutor};
use chrono::{DateTime, Utc};

pub const STATE_TABLE: &str = "ledgerguard_migrations";

/// A row of `ledgerguard_migrations`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub execution_time_ms: Option<i64>,
}

impl MigrationRecord {
    /// Expected column order: `version`, `name`, `checksum`, `applied_at`, `execution_time_ms`
    pub fn from_row(row: &may_postgres::Row) -> Result<Self, DbError> {
        let decode = |e: may_postgres::Error| DbError::DecodeError(e.to_string());
        Ok(Self {
            version: row.try_get(0).map_err(decode)?,
            name: row.try_get(1).map_err(decode)?,
            checksum: row.try_get(2).map_err(decode)?,
            applied_at: row.try_get(3).map_err(decode)?,
            execution_time_ms: row.try_get(4).map_err(decode)?,
        })
    }
}

/// Create `ledgerguard_migrations` if it does not exist
///
/// Version `-1` is reserved for the lock row (see [`super::lock`]).
pub fn initialize_state_table(executor: &dyn LedgerExecutor) -> Result<(), DbError> {
    executor.execute(
        r#"
        CREATE TABLE IF NOT EXISTS ledgerguard_migrations (
            version BIGINT PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            checksum VARCHAR(64) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            execution_time_ms BIGINT
        )
        "#,
        &[],
    )?;
    Ok(())
}

pub fn applied_migrations(
    executor: &dyn LedgerExecutor,
) -> Result<Vec<MigrationRecord>, MigrationError> {
    let rows = executor.query_all(
        "SELECT version, name, checksum, applied_at, execution_time_ms \
         FROM ledgerguard_migrations WHERE version >= 0 ORDER BY version",
        &[],
    )?;
    rows.iter()
        .map(|row| MigrationRecord::from_row(row).map_err(MigrationError::from))
        .collect()
}

pub fn record_migration(
    executor: &dyn LedgerExecutor,
    record: &MigrationRecord,
) -> Result<(), MigrationError> {
    executor.execute(
        "INSERT INTO ledgerguard_migrations (version, name, checksum, applied_at, execution_time_ms) \
         VALUES ($1, $2, $3, $4, $5)",
        &[
            &record.version,
            &record.name,
            &record.checksum,
            &record.applied_at,
            &record.execution_time_ms,
        ],
    )?;
    Ok(())
}

pub fn remove_migration(executor: &dyn LedgerExecutor, version: i64) -> Result<(), MigrationError> {
    executor.execute(
        "DELETE FROM ledgerguard_migrations WHERE version = $1",
        &[&version],
    )?;
    Ok(())
}
