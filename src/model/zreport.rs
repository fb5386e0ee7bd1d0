//! POS sessions as handed over by the point-of-sale, and the Z-report aggregate

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TenderType {
    Cash,
    Card,
    BankTransfer,
    OnAccount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Completed,
    Voided,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tender {
    pub tender_type: TenderType,
    pub amount: Decimal,
}

/// One sale; `gross` is VAT-inclusive and before discount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosSale {
    pub id: i64,
    pub status: SaleStatus,
    pub gross: Decimal,
    pub discount: Decimal,
    pub tenders: Vec<Tender>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosSession {
    pub id: i64,
    pub business_date: NaiveDate,
    /// `None` while the drawer is still open.
    pub closed_at: Option<DateTime<Utc>>,
    pub sales: Vec<PosSale>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ZReportTotals {
    pub gross_sales: Decimal,
    pub discounts: Decimal,
    pub net_sales: Decimal,
    pub vat_amount: Decimal,
    pub cash_total: Decimal,
    /// Card and bank-transfer tenders together.
    pub card_total: Decimal,
    pub on_account_total: Decimal,
    pub sale_count: i32,
}

#[derive(Debug, Clone)]
pub struct NewZReport {
    pub session_id: i64,
    pub business_date: NaiveDate,
    pub closed_at: DateTime<Utc>,
    pub totals: ZReportTotals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZReport {
    pub id: i64,
    pub session_id: i64,
    pub business_date: NaiveDate,
    pub closed_at: DateTime<Utc>,
    #[serde(flatten)]
    pub totals: ZReportTotals,
    pub journal_entry_id: Option<i64>,
    pub journal_posted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
