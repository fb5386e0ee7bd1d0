//! Checksums for embedded migrations

use sha2::{Digest, Sha256};

/// SHA-256 over the statements, each followed by a NUL separator
///
/// Used to detect that a migration was edited after it was applied.
pub fn checksum_statements(statements: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for statement in statements {
        hasher.update(statement.trim().as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
