//! SchemaManager - runs migration statements against an executor

use crate::executor::{DbError, LedgerExecutor};

/// Wraps a [`LedgerExecutor`] for the duration of one migration
///
/// The executor is normally an open [`Transaction`](crate::transaction::Transaction), so a
/// migration that fails halfway leaves no partial schema behind.
pub struct SchemaManager<'a> {
    executor: &'a dyn LedgerExecutor,
}

impl<'a> SchemaManager<'a> {
    pub fn new(executor: &'a dyn LedgerExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &'a dyn LedgerExecutor {
        self.executor
    }

    /// Execute one DDL or DML statement without parameters
    pub fn execute_sql(&self, sql: &str) -> Result<(), DbError> {
        self.executor.execute(sql, &[]).map(|_| ())
    }

    /// Execute statements in order, stopping at the first failure
    pub fn execute_all(&self, statements: &[&str]) -> Result<(), DbError> {
        for statement in statements {
            log::debug!("migration statement: {}", first_line(statement));
            self.execute_sql(statement)?;
        }
        Ok(())
    }

    /// Whether a table exists in the current schema
    pub fn has_table(&self, table: &str) -> Result<bool, DbError> {
        let row = self.executor.query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = $1)",
            &[&table],
        )?;
        row.try_get::<_, bool>(0)
            .map_err(|e| DbError::DecodeError(e.to_string()))
    }
}

fn first_line(statement: &str) -> &str {
    statement
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}
