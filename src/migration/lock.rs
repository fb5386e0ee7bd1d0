//! Flyway-style migration lock stored in the state table itself

use super::error::MigrationError;
use crate::executor::LedgerExecutor;
use std::time::{Duration, Instant};

/// Reserved version for the lock row; real migrations use positive timestamps.
const LOCK_VERSION: i64 = -1;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Holds the migration lock until dropped
pub struct MigrationLockGuard<'a> {
    executor: &'a dyn LedgerExecutor,
}

impl<'a> MigrationLockGuard<'a> {
    /// Acquire the lock, polling until `timeout_seconds` elapse
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockTimeout` if another process keeps the lock.
    pub fn acquire(
        executor: &'a dyn LedgerExecutor,
        timeout_seconds: u64,
    ) -> Result<Self, MigrationError> {
        acquire_migration_lock(executor, timeout_seconds)?;
        Ok(Self { executor })
    }
}

impl Drop for MigrationLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = release_migration_lock(self.executor) {
            log::warn!("failed to release migration lock: {e}");
        }
    }
}

/// Insert the lock row; the caller that inserts it holds the lock
pub fn acquire_migration_lock(
    executor: &dyn LedgerExecutor,
    timeout_seconds: u64,
) -> Result<(), MigrationError> {
    let start = Instant::now();
    let timeout = Duration::from_secs(timeout_seconds);

    loop {
        let inserted = executor.execute(
            "INSERT INTO ledgerguard_migrations (version, name, checksum) \
             VALUES ($1, 'LOCK', 'lock') ON CONFLICT (version) DO NOTHING",
            &[&LOCK_VERSION],
        )?;
        if inserted > 0 {
            log::debug!("migration lock acquired");
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(MigrationError::LockTimeout(format!(
                "failed to acquire migration lock within {timeout_seconds} seconds; \
                 to clear a stale lock run: DELETE FROM ledgerguard_migrations WHERE version = {LOCK_VERSION}"
            )));
        }
        may::coroutine::sleep(POLL_INTERVAL);
    }
}

pub fn release_migration_lock(executor: &dyn LedgerExecutor) -> Result<(), MigrationError> {
    executor.execute(
        "DELETE FROM ledgerguard_migrations WHERE version = $1",
        &[&LOCK_VERSION],
    )?;
    Ok(())
}

pub fn is_migration_lock_held(executor: &dyn LedgerExecutor) -> Result<bool, MigrationError> {
    let row = executor.query_one(
        "SELECT COUNT(*) FROM ledgerguard_migrations WHERE version = $1",
        &[&LOCK_VERSION],
    )?;
    let count: i64 = row
        .try_get(0)
        .map_err(|e| crate::executor::DbError::DecodeError(e.to_string()))?;
    Ok(count > 0)
}
