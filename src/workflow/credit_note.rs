//! Credit note workflow

use super::{Dispatch, PaymentMethod, PostingOutcome, SkipReason, Workflows};
use crate::error::LedgerError;
use crate::model::{LineInput, MappingKey, SourceKey};
use chrono::NaiveDate;
use rust_decimal::Decimal;

/// How the customer is credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditNoteSettlement {
    /// Reduces the customer's receivable.
    OnAccount,
    /// Refunded in cash or to the bank.
    Refund(PaymentMethod),
}

impl CreditNoteSettlement {
    fn mapping_key(self) -> MappingKey {
        match self {
            CreditNoteSettlement::OnAccount => MappingKey::Ar,
            CreditNoteSettlement::Refund(method) => method.mapping_key(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreditNote {
    pub id: i64,
    pub issue_date: NaiveDate,
    pub reference: String,
    /// Amount credited, ex VAT.
    pub subtotal: Decimal,
    pub settlement: CreditNoteSettlement,
}

impl<'a> Workflows<'a> {
    /// Debit sales and output VAT, credit the settlement account with the gross.
    pub fn post_credit_note(
        &self,
        note: &CreditNote,
        dispatch: Dispatch,
    ) -> Result<PostingOutcome, LedgerError> {
        let key = SourceKey::new("credit_note", note.id, "posted");
        self.dispatch(&key, dispatch, || {
            if note.subtotal <= Decimal::ZERO {
                return Ok(PostingOutcome::Skipped(SkipReason::NothingToPost));
            }
            let vat = self.vat_for(note.issue_date, note.subtotal)?;

            let mut lines = vec![LineInput::debit(self.account(MappingKey::Sales)?, note.subtotal)];
            if vat > Decimal::ZERO {
                lines.push(LineInput::debit(self.account(MappingKey::VatPayable)?, vat));
            }
            lines.push(LineInput::credit(
                self.account(note.settlement.mapping_key())?,
                note.subtotal + vat,
            ));
            self.post(
                note.issue_date,
                &key,
                format!("Credit note {}", note.reference),
                lines,
            )
        })
    }
}
