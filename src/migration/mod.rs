//! Schema migrations for the ledger tables
//!
//! Migrations are compiled in ([`schema`]) and applied by [`Migrator`], which tracks them in
//! the `ledgerguard_migrations` state table, verifies SHA-256 checksums of applied
//! migrations, and serializes concurrent runners with a lock row in the same table.

pub mod checksum;
pub mod error;
pub mod lock;
pub mod migration;
pub mod migrator;
pub mod schema;
pub mod schema_manager;
pub mod state_table;

pub use error::MigrationError;
pub use migration::{Migration, SqlMigration};
pub use migrator::{MigrationStatus, Migrator};
pub use schema_manager::SchemaManager;
pub use state_table::MigrationRecord;
