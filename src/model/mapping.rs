use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Semantic account roles workflows post against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingKey {
    Cash,
    Bank,
    Ar,
    Ap,
    Sales,
    Expense,
    VatPayable,
    VatReceivable,
    OpeningEquity,
}

impl MappingKey {
    pub const ALL: [MappingKey; 9] = [
        MappingKey::Cash,
        MappingKey::Bank,
        MappingKey::Ar,
        MappingKey::Ap,
        MappingKey::Sales,
        MappingKey::Expense,
        MappingKey::VatPayable,
        MappingKey::VatReceivable,
        MappingKey::OpeningEquity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MappingKey::Cash => "cash",
            MappingKey::Bank => "bank",
            MappingKey::Ar => "ar",
            MappingKey::Ap => "ap",
            MappingKey::Sales => "sales",
            MappingKey::Expense => "expense",
            MappingKey::VatPayable => "vat_payable",
            MappingKey::VatReceivable => "vat_receivable",
            MappingKey::OpeningEquity => "opening_equity",
        }
    }
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MappingKey {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MappingKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountMapping {
    pub key: MappingKey,
    pub account_id: i64,
    pub account_code: String,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}
