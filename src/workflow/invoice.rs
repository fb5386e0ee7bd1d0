//! Sales invoices and customer payments

use super::{Dispatch, PaymentMethod, PostingOutcome, SkipReason, Workflows};
use crate::error::LedgerError;
use crate::model::{LineInput, MappingKey, SourceKey};
use chrono::NaiveDate;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct SalesInvoice {
    pub id: i64,
    pub invoice_date: NaiveDate,
    pub reference: String,
    /// Invoiced amount ex VAT.
    pub subtotal: Decimal,
}

#[derive(Debug, Clone)]
pub struct CustomerPayment {
    pub id: i64,
    pub received_on: NaiveDate,
    pub reference: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
}

impl<'a> Workflows<'a> {
    /// Debit receivables with the gross, credit sales and output VAT.
    pub fn post_invoice(
        &self,
        invoice: &SalesInvoice,
        dispatch: Dispatch,
    ) -> Result<PostingOutcome, LedgerError> {
        let key = SourceKey::new("invoice", invoice.id, "posted");
        self.dispatch(&key, dispatch, || {
            if invoice.subtotal <= Decimal::ZERO {
                return Ok(PostingOutcome::Skipped(SkipReason::NothingToPost));
            }
            let vat = self.vat_for(invoice.invoice_date, invoice.subtotal)?;

            let mut lines = vec![
                LineInput::debit(self.account(MappingKey::Ar)?, invoice.subtotal + vat),
                LineInput::credit(self.account(MappingKey::Sales)?, invoice.subtotal),
            ];
            if vat > Decimal::ZERO {
                lines.push(LineInput::credit(self.account(MappingKey::VatPayable)?, vat));
            }
            self.post(
                invoice.invoice_date,
                &key,
                format!("Invoice {}", invoice.reference),
                lines,
            )
        })
    }

    pub fn post_customer_payment(
        &self,
        payment: &CustomerPayment,
        dispatch: Dispatch,
    ) -> Result<PostingOutcome, LedgerError> {
        let key = SourceKey::new("payment", payment.id, "received");
        self.dispatch(&key, dispatch, || {
            if payment.amount <= Decimal::ZERO {
                return Ok(PostingOutcome::Skipped(SkipReason::NothingToPost));
            }
            let lines = vec![
                LineInput::debit(self.account(payment.method.mapping_key())?, payment.amount),
                LineInput::credit(self.account(MappingKey::Ar)?, payment.amount),
            ];
            self.post(
                payment.received_on,
                &key,
                format!("Payment received {}", payment.reference),
                lines,
            )
        })
    }
}
