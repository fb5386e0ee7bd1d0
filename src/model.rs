//! Ledger data model
//!
//! Plain row types shared by the stores, the engine and the workflows. Enum columns are
//! persisted as lowercase text; [`parse_column`] maps them back.

pub mod account;
pub mod failure;
pub mod journal;
pub mod mapping;
pub mod period;
pub mod zreport;

pub use account::{Account, AccountCategory, NewAccount, NewAccountCategory, NormalSide};
pub use failure::JournalFailure;
pub use journal::{
    BalanceDelta, DraftLine, EntryType, JournalAmendment, JournalDraft, JournalEntry, JournalLine,
    JournalRequest, LineInput, SourceKey,
};
pub use mapping::{AccountMapping, MappingKey};
pub use period::{FiscalPeriod, NewFiscalPeriod, PeriodStatus};
pub use zreport::{
    NewZReport, PosSale, PosSession, SaleStatus, Tender, TenderType, ZReport, ZReportTotals,
};

/// Error returned when a text column holds a value no enum variant matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub column: &'static str,
    pub value: String,
}

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {} value '{}'", self.column, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Parse a persisted enum column, naming the column in the error.
pub fn parse_column<T>(column: &'static str, value: &str) -> Result<T, UnknownVariant>
where
    T: std::str::FromStr,
{
    value.parse::<T>().map_err(|_| UnknownVariant {
        column,
        value: value.to_string(),
    })
}
