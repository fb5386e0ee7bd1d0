//! Opening balance bootstrap
//!
//! Each row carries a signed amount in the account's own terms: positive increases the
//! account on its normal side. The difference between debits and credits is booked against
//! the `opening_equity` mapping so the entry always balances.

use super::{Dispatch, PostingOutcome, SkipReason, Workflows};
use crate::error::LedgerError;
use crate::model::{JournalRequest, LineInput, MappingKey, SourceKey};
use crate::money::{checked_sum, within_amount_range};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OpeningBalanceRow {
    pub account_code: String,
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpeningBalanceBatch {
    pub batch_id: i64,
    pub entry_date: NaiveDate,
    pub rows: Vec<OpeningBalanceRow>,
    pub created_by: Option<Uuid>,
}

/// Read `account_code,amount[,description]` rows with a header line.
pub fn read_opening_balances<R: io::Read>(reader: R) -> Result<Vec<OpeningBalanceRow>, csv::Error> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader)
        .deserialize()
        .collect()
}

impl<'a> Workflows<'a> {
    /// Post a batch of opening balances as one entry keyed by the batch id.
    pub fn post_opening_balances(
        &self,
        batch: &OpeningBalanceBatch,
        dispatch: Dispatch,
    ) -> Result<PostingOutcome, LedgerError> {
        let key = SourceKey::new("opening_balance", batch.batch_id, "posted");
        self.dispatch(&key, dispatch, || {
            if let Some(index) = batch.rows.iter().position(|row| !within_amount_range(row.amount)) {
                return Err(LedgerError::AmountOverflow {
                    line: Some(index + 1),
                });
            }
            let rows: Vec<&OpeningBalanceRow> =
                batch.rows.iter().filter(|row| !row.amount.is_zero()).collect();
            if rows.is_empty() {
                return Ok(PostingOutcome::Skipped(SkipReason::NothingToPost));
            }

            let equity_code = self.account(MappingKey::OpeningEquity)?;
            let accounts = self
                .chart
                .resolve_codes(rows.iter().map(|row| row.account_code.as_str()))?;

            let mut lines = Vec::with_capacity(rows.len() + 1);
            for row in &rows {
                let account = accounts
                    .get(&row.account_code)
                    .ok_or_else(|| LedgerError::UnknownAccount(row.account_code.clone()))?;
                let (debit, credit) = account.normal_side.split_signed(row.amount);
                lines.push(LineInput {
                    account_code: row.account_code.clone(),
                    debit,
                    credit,
                    description: Some(
                        row.description
                            .clone()
                            .unwrap_or_else(|| format!("Opening balance {}", row.account_code)),
                    ),
                });
            }

            let overflow = || LedgerError::AmountOverflow { line: None };
            let total_debit = checked_sum(lines.iter().map(|l| l.debit)).ok_or_else(overflow)?;
            let total_credit = checked_sum(lines.iter().map(|l| l.credit)).ok_or_else(overflow)?;
            let difference = total_debit - total_credit;
            if difference > Decimal::ZERO {
                lines.push(LineInput::credit(equity_code, difference).with_description("Opening equity"));
            } else if difference < Decimal::ZERO {
                lines.push(LineInput::debit(equity_code, -difference).with_description("Opening equity"));
            }

            let mut request = JournalRequest::system(
                batch.entry_date,
                key.clone(),
                format!("Opening balances (batch {})", batch.batch_id),
                lines,
            );
            request.created_by = batch.created_by;
            self.engine
                .create_or_get_journal(request)
                .map(PostingOutcome::Posted)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_read_opening_balances_csv() {
        let data = "account_code,amount,description\n1000, 500.00 ,Float\n2100,-20.5,\n4000,0,\n";
        let rows = read_opening_balances(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].account_code, "1000");
        assert_eq!(rows[0].amount, Decimal::from_str("500.00").unwrap());
        assert_eq!(rows[0].description.as_deref(), Some("Float"));
        assert_eq!(rows[1].amount, Decimal::from_str("-20.5").unwrap());
        assert_eq!(rows[1].description, None);
    }

    #[test]
    fn test_read_opening_balances_rejects_bad_amount() {
        let data = "account_code,amount\n1000,lots\n";
        assert!(read_opening_balances(data.as_bytes()).is_err());
    }
}
