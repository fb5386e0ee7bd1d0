//! POS Z-report workflow

use super::{Dispatch, PostingOutcome, SkipReason, Workflows};
use crate::error::LedgerError;
use crate::model::{
    LineInput, MappingKey, NewZReport, PosSession, SaleStatus, SourceKey, TenderType, ZReport,
    ZReportTotals,
};
use crate::money::{checked_sum, vat_portion};
use crate::store::Inserted;
use chrono::Utc;
use rust_decimal::Decimal;

/// Totals over the session's completed sales. Voided and pending sales are ignored.
///
/// Fails with [`LedgerError::AmountOverflow`] when a total leaves the `NUMERIC(19, 2)` range.
pub fn aggregate_session(session: &PosSession, vat_rate: Decimal) -> Result<ZReportTotals, LedgerError> {
    let mut totals = ZReportTotals::default();
    for sale in session
        .sales
        .iter()
        .filter(|sale| sale.status == SaleStatus::Completed)
    {
        accumulate(&mut totals.gross_sales, sale.gross)?;
        accumulate(&mut totals.discounts, sale.discount)?;
        totals.sale_count += 1;
        for tender in &sale.tenders {
            let total = match tender.tender_type {
                TenderType::Cash => &mut totals.cash_total,
                TenderType::Card | TenderType::BankTransfer => &mut totals.card_total,
                TenderType::OnAccount => &mut totals.on_account_total,
            };
            accumulate(total, tender.amount)?;
        }
    }
    totals.net_sales = totals.gross_sales - totals.discounts;
    totals.vat_amount = vat_portion(totals.net_sales, vat_rate);
    Ok(totals)
}

fn accumulate(total: &mut Decimal, amount: Decimal) -> Result<(), LedgerError> {
    *total = checked_sum([*total, amount]).ok_or(LedgerError::AmountOverflow { line: None })?;
    Ok(())
}

impl<'a> Workflows<'a> {
    /// Persist the Z-report of a closed session, once per session.
    pub fn generate_zreport(&self, session: &PosSession) -> Result<Inserted<ZReport>, LedgerError> {
        let closed_at = session.closed_at.ok_or_else(|| {
            LedgerError::InvalidInput(format!("POS session {} is still open", session.id))
        })?;
        if let Some(existing) = self.store.zreport_by_session(session.id)? {
            return Ok(Inserted::Existing(existing));
        }

        let rate = if self.config.vat_applies(closed_at.date_naive()) {
            self.config.vat_rate
        } else {
            Decimal::ZERO
        };
        let report = self.store.insert_zreport(&NewZReport {
            session_id: session.id,
            business_date: session.business_date,
            closed_at,
            totals: aggregate_session(session, rate)?,
        })?;
        if report.was_created() {
            let report = report.get();
            log::info!(
                "generated Z-report {} for session {}: net {} over {} sale(s)",
                report.id,
                report.session_id,
                report.totals.net_sales,
                report.totals.sale_count
            );
        }
        Ok(report)
    }

    /// Post the report's journal and link it back to the report.
    ///
    /// Skipped when the session closed before the VAT go-live date or net sales are not positive.
    pub fn post_zreport_journal(
        &self,
        report_id: i64,
        dispatch: Dispatch,
    ) -> Result<PostingOutcome, LedgerError> {
        let key = SourceKey::new("pos_zreport", report_id, "posted");
        self.dispatch(&key, dispatch, || {
            let report = self
                .store
                .zreport_by_id(report_id)?
                .ok_or_else(|| LedgerError::InvalidInput(format!("Z-report {report_id} not found")))?;

            let closed_on = report.closed_at.date_naive();
            if let Some(go_live) = self.config.vat_go_live_date {
                if closed_on < go_live {
                    log::info!(
                        "skipping Z-report {report_id}: session closed {closed_on}, before VAT go-live {go_live}"
                    );
                    return Ok(PostingOutcome::Skipped(SkipReason::BeforeVatGoLive {
                        closed_on,
                        go_live,
                    }));
                }
            }

            let totals = &report.totals;
            if totals.net_sales <= Decimal::ZERO {
                return Ok(PostingOutcome::Skipped(SkipReason::NothingToPost));
            }

            let mut lines = Vec::new();
            for (mapping, amount, label) in [
                (MappingKey::Cash, totals.cash_total, "Cash takings"),
                (MappingKey::Bank, totals.card_total, "Card and transfer takings"),
                (MappingKey::Ar, totals.on_account_total, "On-account sales"),
            ] {
                if amount > Decimal::ZERO {
                    lines.push(LineInput::debit(self.account(mapping)?, amount).with_description(label));
                }
            }
            lines.push(
                LineInput::credit(self.account(MappingKey::Sales)?, totals.net_sales - totals.vat_amount)
                    .with_description("Sales ex VAT"),
            );
            if totals.vat_amount > Decimal::ZERO {
                lines.push(
                    LineInput::credit(self.account(MappingKey::VatPayable)?, totals.vat_amount)
                        .with_description("Output VAT"),
                );
            }

            let outcome = self.post(
                report.business_date,
                &key,
                format!("POS Z-report {} (session {})", report.id, report.session_id),
                lines,
            )?;
            if let (Some(entry), None) = (outcome.entry(), report.journal_entry_id) {
                self.store
                    .link_zreport_journal(report.id, entry.id, Utc::now())?;
            }
            Ok(outcome)
        })
    }

    /// Generate the session's report and post its journal.
    pub fn close_session(
        &self,
        session: &PosSession,
        dispatch: Dispatch,
    ) -> Result<(ZReport, PostingOutcome), LedgerError> {
        let report = self.generate_zreport(session)?.into_inner();
        let outcome = self.post_zreport_journal(report.id, dispatch)?;
        let report = self.store.zreport_by_id(report.id)?.unwrap_or(report);
        Ok((report, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PosSale, Tender};
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn sale(id: i64, status: SaleStatus, gross: &str, discount: &str, tenders: Vec<(TenderType, &str)>) -> PosSale {
        PosSale {
            id,
            status,
            gross: d(gross),
            discount: d(discount),
            tenders: tenders
                .into_iter()
                .map(|(tender_type, amount)| Tender {
                    tender_type,
                    amount: d(amount),
                })
                .collect(),
        }
    }

    #[test]
    fn test_aggregate_counts_completed_sales_only() {
        let session = PosSession {
            id: 7,
            business_date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            closed_at: None,
            sales: vec![
                sale(1, SaleStatus::Completed, "110.00", "10.00", vec![(TenderType::Cash, "100.00")]),
                sale(2, SaleStatus::Completed, "67.00", "0.00", vec![
                    (TenderType::Card, "30.00"),
                    (TenderType::BankTransfer, "20.00"),
                    (TenderType::OnAccount, "17.00"),
                ]),
                sale(3, SaleStatus::Voided, "500.00", "0.00", vec![(TenderType::Cash, "500.00")]),
                sale(4, SaleStatus::Pending, "12.00", "0.00", vec![]),
            ],
        };

        let totals = aggregate_session(&session, d("0.18")).unwrap();
        assert_eq!(totals.gross_sales, d("177.00"));
        assert_eq!(totals.discounts, d("10.00"));
        assert_eq!(totals.net_sales, d("167.00"));
        assert_eq!(totals.vat_amount, d("25.47"));
        assert_eq!(totals.cash_total, d("100.00"));
        assert_eq!(totals.card_total, d("50.00"));
        assert_eq!(totals.on_account_total, d("17.00"));
        assert_eq!(totals.sale_count, 2);
    }

    #[test]
    fn test_aggregate_empty_session() {
        let session = PosSession {
            id: 8,
            business_date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
            closed_at: None,
            sales: Vec::new(),
        };
        let totals = aggregate_session(&session, d("0.18")).unwrap();
        assert_eq!(totals, ZReportTotals::default());
    }

    #[test]
    fn test_aggregate_rejects_totals_beyond_column_range() {
        let huge = "60000000000000000.00";
        let session = PosSession {
            id: 9,
            business_date: NaiveDate::from_ymd_opt(2025, 3, 16).unwrap(),
            closed_at: None,
            sales: vec![
                sale(1, SaleStatus::Completed, huge, "0.00", vec![(TenderType::Cash, huge)]),
                sale(2, SaleStatus::Completed, huge, "0.00", vec![(TenderType::Cash, huge)]),
            ],
        };
        assert!(matches!(
            aggregate_session(&session, d("0.18")),
            Err(LedgerError::AmountOverflow { line: None })
        ));
    }
}
