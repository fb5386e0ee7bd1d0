//! Accounts and account categories

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Side on which increases to an account are recorded, fixed by its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalSide {
    /// Assets and expenses
    DebitNormal,
    /// Liabilities, equity and income
    CreditNormal,
}

impl NormalSide {
    pub fn as_str(self) -> &'static str {
        match self {
            NormalSide::DebitNormal => "debit_normal",
            NormalSide::CreditNormal => "credit_normal",
        }
    }

    /// Balance implied by line totals: `Σdebit − Σcredit` for debit-normal accounts,
    /// `Σcredit − Σdebit` for credit-normal ones.
    pub fn balance(self, total_debit: Decimal, total_credit: Decimal) -> Decimal {
        match self {
            NormalSide::DebitNormal => total_debit - total_credit,
            NormalSide::CreditNormal => total_credit - total_debit,
        }
    }

    /// Split a signed amount (positive = increase) into `(debit, credit)`.
    pub fn split_signed(self, amount: Decimal) -> (Decimal, Decimal) {
        let increase = !amount.is_sign_negative();
        let magnitude = amount.abs();
        match (self, increase) {
            (NormalSide::DebitNormal, true) | (NormalSide::CreditNormal, false) => {
                (magnitude, Decimal::ZERO)
            }
            (NormalSide::DebitNormal, false) | (NormalSide::CreditNormal, true) => {
                (Decimal::ZERO, magnitude)
            }
        }
    }
}

impl fmt::Display for NormalSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormalSide {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit_normal" => Ok(NormalSide::DebitNormal),
            "credit_normal" => Ok(NormalSide::CreditNormal),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountCategory {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub account_type: NormalSide,
}

#[derive(Debug, Clone)]
pub struct NewAccountCategory {
    pub code: String,
    pub name: String,
    pub account_type: NormalSide,
}

/// An account in the chart, joined with its category's normal side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub id: i64,
    pub account_code: String,
    pub name: String,
    pub category_id: i64,
    pub category_code: String,
    pub normal_side: NormalSide,
    /// Cache of posted lines; see [`crate::balance`] for the rebuild.
    pub current_balance: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub account_code: String,
    pub name: String,
    pub category_code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_side_balance() {
        let debit = Decimal::new(15000, 2);
        let credit = Decimal::new(5000, 2);
        assert_eq!(NormalSide::DebitNormal.balance(debit, credit), Decimal::new(10000, 2));
        assert_eq!(NormalSide::CreditNormal.balance(debit, credit), Decimal::new(-10000, 2));
    }

    #[test]
    fn test_split_signed() {
        let amount = Decimal::new(2500, 2);
        assert_eq!(NormalSide::DebitNormal.split_signed(amount), (amount, Decimal::ZERO));
        assert_eq!(NormalSide::CreditNormal.split_signed(amount), (Decimal::ZERO, amount));
        assert_eq!(NormalSide::DebitNormal.split_signed(-amount), (Decimal::ZERO, amount));
        assert_eq!(NormalSide::CreditNormal.split_signed(-amount), (amount, Decimal::ZERO));
    }

    #[test]
    fn test_normal_side_round_trips_through_text() {
        for side in [NormalSide::DebitNormal, NormalSide::CreditNormal] {
            assert_eq!(side.as_str().parse::<NormalSide>(), Ok(side));
        }
        assert!("asset".parse::<NormalSide>().is_err());
    }
}
