//! Migration trait definition

use super::checksum::checksum_statements;
use super::schema_manager::SchemaManager;
use crate::executor::DbError;

/// Trait that all migrations must implement
///
/// Migrations run synchronously on the `may` runtime; the executor handles coroutine
/// scheduling internally.
pub trait Migration: Send + Sync {
    /// Human-readable identifier
    fn name(&self) -> &str;

    /// Version (timestamp: YYYYMMDDHHMMSS)
    fn version(&self) -> i64;

    /// SHA-256 of the migration's forward statements, stored when it is applied
    fn checksum(&self) -> String;

    /// Apply the migration
    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError>;

    /// Roll the migration back
    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), DbError>;
}

/// A migration made of plain SQL statements compiled into the binary
#[derive(Debug, Clone, Copy)]
pub struct SqlMigration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static [&'static str],
    pub down: &'static [&'static str],
}

impl Migration for SqlMigration {
    fn name(&self) -> &str {
        self.name
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn checksum(&self) -> String {
        checksum_statements(self.up)
    }

    fn up(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
        manager.execute_all(self.up)
    }

    fn down(&self, manager: &SchemaManager<'_>) -> Result<(), DbError> {
        manager.execute_all(self.down)
    }
}
