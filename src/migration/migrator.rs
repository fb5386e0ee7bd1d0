//! Migrator - applies the embedded migrations

use super::error::MigrationError;
use super::lock::MigrationLockGuard;
use super::migration::Migration;
use super::schema;
use super::schema_manager::SchemaManager;
use super::state_table::{
    applied_migrations, initialize_state_table, record_migration, remove_migration,
    MigrationRecord,
};
use crate::executor::{LedgerExecutor, PgExecutor};
use crate::transaction::{run_in_transaction, IsolationLevel};
use chrono::Utc;
use std::time::Instant;

/// Applied and pending migrations
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub applied: Vec<MigrationRecord>,
    /// `(version, name)` of migrations not yet applied, oldest first
    pub pending: Vec<(i64, String)>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Runs migrations in version order, one transaction per migration
pub struct Migrator {
    migrations: Vec<Box<dyn Migration>>,
    lock_timeout_seconds: u64,
}

impl Migrator {
    pub fn new(mut migrations: Vec<Box<dyn Migration>>, lock_timeout_seconds: u64) -> Self {
        migrations.sort_by_key(|m| m.version());
        Self {
            migrations,
            lock_timeout_seconds,
        }
    }

    /// The ledger schema compiled into this crate
    pub fn embedded(lock_timeout_seconds: u64) -> Self {
        let migrations = schema::embedded()
            .into_iter()
            .map(|m| Box::new(m) as Box<dyn Migration>)
            .collect();
        Self::new(migrations, lock_timeout_seconds)
    }

    /// Compare the state table with the known migrations, validating checksums
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` if an applied migration changed, `MissingMigration` if the database
    /// has a migration this build does not know.
    pub fn status(&self, executor: &dyn LedgerExecutor) -> Result<MigrationStatus, MigrationError> {
        initialize_state_table(executor)?;
        let applied = applied_migrations(executor)?;

        for record in &applied {
            let Some(migration) = self.migrations.iter().find(|m| m.version() == record.version)
            else {
                return Err(MigrationError::MissingMigration {
                    version: record.version,
                    name: record.name.clone(),
                });
            };
            let current = migration.checksum();
            if record.checksum != current {
                return Err(MigrationError::ChecksumMismatch {
                    version: record.version,
                    name: record.name.clone(),
                    stored: record.checksum.clone(),
                    current,
                });
            }
        }

        let pending = self
            .migrations
            .iter()
            .filter(|m| !applied.iter().any(|r| r.version == m.version()))
            .map(|m| (m.version(), m.name().to_string()))
            .collect();

        Ok(MigrationStatus { applied, pending })
    }

    /// Apply every pending migration under the migration lock
    ///
    /// Returns the number of migrations applied.
    pub fn up(&self, executor: &PgExecutor) -> Result<usize, MigrationError> {
        initialize_state_table(executor)?;
        let _lock = MigrationLockGuard::acquire(executor, self.lock_timeout_seconds)?;
        let status = self.status(executor)?;

        let mut applied = 0;
        for migration in &self.migrations {
            if !status.pending.iter().any(|(v, _)| *v == migration.version()) {
                continue;
            }
            let start = Instant::now();
            run_in_transaction(executor.client(), IsolationLevel::ReadCommitted, |tx| {
                let manager = SchemaManager::new(tx);
                migration
                    .up(&manager)
                    .map_err(|e| MigrationError::ExecutionFailed {
                        version: migration.version(),
                        name: migration.name().to_string(),
                        error: e.to_string(),
                    })?;
                record_migration(
                    tx,
                    &MigrationRecord {
                        version: migration.version(),
                        name: migration.name().to_string(),
                        checksum: migration.checksum(),
                        applied_at: Utc::now(),
                        execution_time_ms: Some(start.elapsed().as_millis() as i64),
                    },
                )
            })?;
            log::info!(
                "applied migration {} ({}) in {} ms",
                migration.version(),
                migration.name(),
                start.elapsed().as_millis()
            );
            applied += 1;
        }
        Ok(applied)
    }

    /// Roll back the most recently applied migration, if any
    pub fn down(&self, executor: &PgExecutor) -> Result<Option<i64>, MigrationError> {
        initialize_state_table(executor)?;
        let _lock = MigrationLockGuard::acquire(executor, self.lock_timeout_seconds)?;
        let status = self.status(executor)?;
        let Some(last) = status.applied.last() else {
            return Ok(None);
        };
        let Some(migration) = self.migrations.iter().find(|m| m.version() == last.version) else {
            return Err(MigrationError::MissingMigration {
                version: last.version,
                name: last.name.clone(),
            });
        };

        run_in_transaction(executor.client(), IsolationLevel::ReadCommitted, |tx| {
            let manager = SchemaManager::new(tx);
            migration
                .down(&manager)
                .map_err(|e| MigrationError::ExecutionFailed {
                    version: migration.version(),
                    name: migration.name().to_string(),
                    error: e.to_string(),
                })?;
            remove_migration(tx, migration.version())
        })?;
        log::info!("rolled back migration {} ({})", migration.version(), migration.name());
        Ok(Some(migration.version()))
    }
}
