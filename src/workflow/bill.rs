//! Supplier bills and bill payments

use super::{Dispatch, PaymentMethod, PostingOutcome, SkipReason, Workflows};
use crate::error::LedgerError;
use crate::model::{LineInput, MappingKey, SourceKey};
use chrono::NaiveDate;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct SupplierBill {
    pub id: i64,
    pub bill_date: NaiveDate,
    pub reference: String,
    /// Billed amount ex VAT.
    pub subtotal: Decimal,
}

#[derive(Debug, Clone)]
pub struct BillPayment {
    pub id: i64,
    pub paid_on: NaiveDate,
    pub reference: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
}

impl<'a> Workflows<'a> {
    /// Debit expense and input VAT, credit payables with the gross.
    pub fn post_bill(&self, bill: &SupplierBill, dispatch: Dispatch) -> Result<PostingOutcome, LedgerError> {
        let key = SourceKey::new("bill", bill.id, "posted");
        self.dispatch(&key, dispatch, || {
            if bill.subtotal <= Decimal::ZERO {
                return Ok(PostingOutcome::Skipped(SkipReason::NothingToPost));
            }
            let vat = self.vat_for(bill.bill_date, bill.subtotal)?;

            let mut lines = vec![LineInput::debit(self.account(MappingKey::Expense)?, bill.subtotal)];
            if vat > Decimal::ZERO {
                lines.push(LineInput::debit(self.account(MappingKey::VatReceivable)?, vat));
            }
            lines.push(LineInput::credit(self.account(MappingKey::Ap)?, bill.subtotal + vat));
            self.post(bill.bill_date, &key, format!("Bill {}", bill.reference), lines)
        })
    }

    pub fn post_bill_payment(
        &self,
        payment: &BillPayment,
        dispatch: Dispatch,
    ) -> Result<PostingOutcome, LedgerError> {
        let key = SourceKey::new("bill_payment", payment.id, "paid");
        self.dispatch(&key, dispatch, || {
            if payment.amount <= Decimal::ZERO {
                return Ok(PostingOutcome::Skipped(SkipReason::NothingToPost));
            }
            let lines = vec![
                LineInput::debit(self.account(MappingKey::Ap)?, payment.amount),
                LineInput::credit(self.account(payment.method.mapping_key())?, payment.amount),
            ];
            self.post(
                payment.paid_on,
                &key,
                format!("Bill payment {}", payment.reference),
                lines,
            )
        })
    }
}
