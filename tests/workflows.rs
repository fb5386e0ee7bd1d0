//! Derived posting workflows against the in-memory store

use chrono::{TimeZone, Utc};
use ledgerguard::config::PostingConfig;
use ledgerguard::mapping::MappingResolver;
use ledgerguard::model::{
    MappingKey, PosSale, PosSession, SaleStatus, SourceKey, Tender, TenderType,
};
use ledgerguard::test_helpers::{
    date, seed_chart, BANK, CASH, EXPENSES, OPENING_EQUITY, PAYABLES, POS_SALES, RECEIVABLES,
    VAT_PAYABLE, VAT_RECEIVABLE,
};
use ledgerguard::workflow::{
    BillPayment, CreditNote, CreditNoteSettlement, CustomerPayment, OpeningBalanceBatch,
    OpeningBalanceRow, SalesInvoice, SupplierBill,
};
use ledgerguard::{
    ChannelNotifier, ChartOfAccounts, Dispatch, JournalEngine, LedgerError, LedgerStore,
    MemoryStore, PaymentMethod, PostingOutcome, SkipReason, Workflows,
};
use rust_decimal::Decimal;
use std::str::FromStr;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    seed_chart(&store).expect("seed chart");
    store
}

fn balance(store: &dyn LedgerStore, code: &str) -> Decimal {
    ChartOfAccounts::new(store).account(code).unwrap().current_balance
}

fn tender(tender_type: TenderType, amount: &str) -> Tender {
    Tender {
        tender_type,
        amount: d(amount),
    }
}

/// Gross 177.00, discounts 10.00: cash 100.00, card 50.00, on account 17.00.
fn march_session() -> PosSession {
    PosSession {
        id: 301,
        business_date: date(2025, 3, 14),
        closed_at: Some(Utc.with_ymd_and_hms(2025, 3, 14, 22, 5, 0).unwrap()),
        sales: vec![
            PosSale {
                id: 1,
                status: SaleStatus::Completed,
                gross: d("110.00"),
                discount: d("10.00"),
                tenders: vec![tender(TenderType::Cash, "100.00")],
            },
            PosSale {
                id: 2,
                status: SaleStatus::Completed,
                gross: d("67.00"),
                discount: Decimal::ZERO,
                tenders: vec![
                    tender(TenderType::Card, "50.00"),
                    tender(TenderType::OnAccount, "17.00"),
                ],
            },
            PosSale {
                id: 3,
                status: SaleStatus::Voided,
                gross: d("80.00"),
                discount: Decimal::ZERO,
                tenders: vec![tender(TenderType::Cash, "80.00")],
            },
        ],
    }
}

#[test]
fn test_zreport_worked_example() {
    let store = seeded();
    let config = PostingConfig::default();
    let workflows = Workflows::new(&store, &config);

    let (report, outcome) = workflows
        .close_session(&march_session(), Dispatch::Synchronous)
        .unwrap();

    assert_eq!(report.totals.gross_sales, d("177.00"));
    assert_eq!(report.totals.discounts, d("10.00"));
    assert_eq!(report.totals.net_sales, d("167.00"));
    assert_eq!(report.totals.vat_amount, d("25.47"));
    assert_eq!(report.totals.sale_count, 2);

    let entry = outcome.entry().expect("posted").clone();
    assert_eq!(report.journal_entry_id, Some(entry.id));
    assert!(report.journal_posted_at.is_some());
    assert_eq!(entry.total_debit, d("167.00"));
    assert_eq!(entry.entry_date, date(2025, 3, 14));

    assert_eq!(balance(&store, CASH), d("100.00"));
    assert_eq!(balance(&store, BANK), d("50.00"));
    assert_eq!(balance(&store, RECEIVABLES), d("17.00"));
    assert_eq!(balance(&store, POS_SALES), d("141.53"));
    assert_eq!(balance(&store, VAT_PAYABLE), d("25.47"));

    // Closing the same session again changes nothing.
    let (again, repeat) = workflows
        .close_session(&march_session(), Dispatch::Synchronous)
        .unwrap();
    assert_eq!(again.id, report.id);
    match repeat {
        PostingOutcome::Posted(outcome) => {
            assert!(!outcome.created);
            assert_eq!(outcome.entry.id, entry.id);
        }
        other => panic!("expected Posted, got {other:?}"),
    }
    let key = SourceKey::new("pos_zreport", report.id, "posted");
    assert_eq!(workflows.engine().count_for_source(&key).unwrap(), 1);
    assert_eq!(balance(&store, CASH), d("100.00"));
}

#[test]
fn test_zreport_before_vat_go_live_is_skipped() {
    let store = seeded();
    let config = PostingConfig {
        vat_go_live_date: Some(date(2025, 4, 1)),
        ..PostingConfig::default()
    };
    let workflows = Workflows::new(&store, &config);

    let (report, outcome) = workflows
        .close_session(&march_session(), Dispatch::Synchronous)
        .unwrap();

    assert_eq!(
        outcome,
        PostingOutcome::Skipped(SkipReason::BeforeVatGoLive {
            closed_on: date(2025, 3, 14),
            go_live: date(2025, 4, 1),
        })
    );
    assert_eq!(report.journal_entry_id, None);
    assert_eq!(store.journal_count().unwrap(), 0);
    assert!(workflows.failures().unresolved().unwrap().is_empty());
}

#[test]
fn test_zreport_without_sales_is_skipped() {
    let store = seeded();
    let config = PostingConfig::default();
    let workflows = Workflows::new(&store, &config);
    let mut session = march_session();
    for sale in &mut session.sales {
        sale.status = SaleStatus::Voided;
    }

    let (report, outcome) = workflows.close_session(&session, Dispatch::Synchronous).unwrap();
    assert_eq!(report.totals.net_sales, Decimal::ZERO);
    assert_eq!(outcome, PostingOutcome::Skipped(SkipReason::NothingToPost));
    assert_eq!(store.journal_count().unwrap(), 0);
}

#[test]
fn test_open_session_has_no_zreport() {
    let store = seeded();
    let config = PostingConfig::default();
    let workflows = Workflows::new(&store, &config);
    let mut session = march_session();
    session.closed_at = None;
    assert!(matches!(
        workflows.generate_zreport(&session),
        Err(LedgerError::InvalidInput(_))
    ));
}

#[test]
fn test_generate_zreport_once_per_session() {
    let store = seeded();
    let config = PostingConfig::default();
    let workflows = Workflows::new(&store, &config);

    let first = workflows.generate_zreport(&march_session()).unwrap();
    let mut changed = march_session();
    changed.sales.truncate(1);
    let second = workflows.generate_zreport(&changed).unwrap();

    assert!(first.was_created());
    assert!(!second.was_created());
    assert_eq!(first.get().id, second.get().id);
    assert_eq!(second.get().totals.gross_sales, d("177.00"));
}

#[test]
fn test_opening_balances_auto_balance_against_equity() {
    let store = seeded();
    let config = PostingConfig::default();
    let workflows = Workflows::new(&store, &config);
    let batch = OpeningBalanceBatch {
        batch_id: 1,
        entry_date: date(2025, 1, 1),
        rows: vec![
            OpeningBalanceRow {
                account_code: CASH.to_string(),
                amount: d("500.00"),
                description: None,
            },
            OpeningBalanceRow {
                account_code: PAYABLES.to_string(),
                amount: d("200.00"),
                description: Some("Supplier balances".to_string()),
            },
            OpeningBalanceRow {
                account_code: RECEIVABLES.to_string(),
                amount: d("-50.00"),
                description: None,
            },
            OpeningBalanceRow {
                account_code: BANK.to_string(),
                amount: Decimal::ZERO,
                description: None,
            },
        ],
        created_by: None,
    };

    let outcome = workflows.post_opening_balances(&batch, Dispatch::Synchronous).unwrap();
    let entry = outcome.entry().expect("posted").clone();
    assert_eq!(entry.total_debit, d("500.00"));

    let lines = workflows.engine().journal_lines(entry.id).unwrap();
    assert_eq!(lines.len(), 4);
    let equity = lines.iter().find(|l| l.account_code == OPENING_EQUITY).unwrap();
    assert_eq!(equity.credit, d("250.00"));

    assert_eq!(balance(&store, CASH), d("500.00"));
    assert_eq!(balance(&store, PAYABLES), d("200.00"));
    assert_eq!(balance(&store, RECEIVABLES), d("-50.00"));
    assert_eq!(balance(&store, OPENING_EQUITY), d("250.00"));
    assert_eq!(balance(&store, BANK), Decimal::ZERO);

    let again = workflows.post_opening_balances(&batch, Dispatch::Synchronous).unwrap();
    match again {
        PostingOutcome::Posted(outcome) => assert!(!outcome.created),
        other => panic!("expected Posted, got {other:?}"),
    }
    assert_eq!(balance(&store, CASH), d("500.00"));
}

#[test]
fn test_opening_balances_debit_equity_when_credits_dominate() {
    let store = seeded();
    let config = PostingConfig::default();
    let workflows = Workflows::new(&store, &config);
    let batch = OpeningBalanceBatch {
        batch_id: 2,
        entry_date: date(2025, 1, 1),
        rows: vec![OpeningBalanceRow {
            account_code: PAYABLES.to_string(),
            amount: d("80.00"),
            description: None,
        }],
        created_by: None,
    };

    workflows.post_opening_balances(&batch, Dispatch::Synchronous).unwrap();
    assert_eq!(balance(&store, PAYABLES), d("80.00"));
    assert_eq!(balance(&store, OPENING_EQUITY), d("-80.00"));
}

#[test]
fn test_opening_balances_all_zero_is_skipped() {
    let store = seeded();
    let config = PostingConfig::default();
    let workflows = Workflows::new(&store, &config);
    let batch = OpeningBalanceBatch {
        batch_id: 3,
        entry_date: date(2025, 1, 1),
        rows: vec![OpeningBalanceRow {
            account_code: CASH.to_string(),
            amount: Decimal::ZERO,
            description: None,
        }],
        created_by: None,
    };
    assert_eq!(
        workflows.post_opening_balances(&batch, Dispatch::Synchronous).unwrap(),
        PostingOutcome::Skipped(SkipReason::NothingToPost)
    );
}

#[test]
fn test_failures_recorded_alerted_once_and_resolved() {
    let store = seeded();
    let config = PostingConfig::default();
    let (notifier, alerts) = ChannelNotifier::bounded(4);
    let workflows = Workflows::new(&store, &config).with_notifier(&notifier);
    let mappings = MappingResolver::new(&store);
    mappings.deactivate(MappingKey::Sales).unwrap();

    let invoice = SalesInvoice {
        id: 77,
        invoice_date: date(2025, 5, 2),
        reference: "INV-77".to_string(),
        subtotal: d("100.00"),
    };
    let key = SourceKey::new("invoice", 77, "posted");

    let sync = workflows.post_invoice(&invoice, Dispatch::Synchronous);
    assert!(matches!(sync, Err(LedgerError::MissingMapping(MappingKey::Sales))));

    let deferred = workflows.post_invoice(&invoice, Dispatch::Deferred).unwrap();
    assert_eq!(deferred, PostingOutcome::Deferred);

    let failure = workflows.failures().failure(&key).unwrap().unwrap();
    assert_eq!(failure.attempts, 2);
    assert!(failure.last_error.contains("sales"));
    assert!(!failure.is_resolved());
    assert_eq!(alerts.try_iter().count(), 1);
    assert_eq!(store.journal_count().unwrap(), 0);

    mappings.set_mapping(MappingKey::Sales, POS_SALES).unwrap();
    let posted = workflows.post_invoice(&invoice, Dispatch::Deferred).unwrap();
    assert!(posted.is_posted());
    assert!(workflows.failures().failure(&key).unwrap().unwrap().is_resolved());
    assert!(workflows.failures().unresolved().unwrap().is_empty());
    assert_eq!(alerts.try_iter().count(), 0);
}

#[test]
fn test_invoice_and_payment() {
    let store = seeded();
    let config = PostingConfig::default();
    let workflows = Workflows::new(&store, &config);

    workflows
        .post_invoice(
            &SalesInvoice {
                id: 1,
                invoice_date: date(2025, 5, 2),
                reference: "INV-1".to_string(),
                subtotal: d("100.00"),
            },
            Dispatch::Synchronous,
        )
        .unwrap();
    assert_eq!(balance(&store, RECEIVABLES), d("118.00"));
    assert_eq!(balance(&store, POS_SALES), d("100.00"));
    assert_eq!(balance(&store, VAT_PAYABLE), d("18.00"));

    let payment = CustomerPayment {
        id: 1,
        received_on: date(2025, 5, 20),
        reference: "TRF-1".to_string(),
        amount: d("118.00"),
        method: PaymentMethod::Bank,
    };
    workflows.post_customer_payment(&payment, Dispatch::Synchronous).unwrap();
    workflows.post_customer_payment(&payment, Dispatch::Synchronous).unwrap();
    assert_eq!(balance(&store, RECEIVABLES), Decimal::ZERO);
    assert_eq!(balance(&store, BANK), d("118.00"));
}

#[test]
fn test_invoice_before_go_live_carries_no_vat() {
    let store = seeded();
    let config = PostingConfig {
        vat_go_live_date: Some(date(2025, 7, 1)),
        ..PostingConfig::default()
    };
    let workflows = Workflows::new(&store, &config);
    workflows
        .post_invoice(
            &SalesInvoice {
                id: 2,
                invoice_date: date(2025, 6, 30),
                reference: "INV-2".to_string(),
                subtotal: d("100.00"),
            },
            Dispatch::Synchronous,
        )
        .unwrap();
    assert_eq!(balance(&store, RECEIVABLES), d("100.00"));
    assert_eq!(balance(&store, VAT_PAYABLE), Decimal::ZERO);
}

#[test]
fn test_bill_and_bill_payment() {
    let store = seeded();
    let config = PostingConfig::default();
    let workflows = Workflows::new(&store, &config);

    workflows
        .post_bill(
            &SupplierBill {
                id: 9,
                bill_date: date(2025, 8, 1),
                reference: "SUP-9".to_string(),
                subtotal: d("200.00"),
            },
            Dispatch::Synchronous,
        )
        .unwrap();
    assert_eq!(balance(&store, EXPENSES), d("200.00"));
    assert_eq!(balance(&store, VAT_RECEIVABLE), d("36.00"));
    assert_eq!(balance(&store, PAYABLES), d("236.00"));

    workflows
        .post_bill_payment(
            &BillPayment {
                id: 9,
                paid_on: date(2025, 8, 15),
                reference: "CHQ-9".to_string(),
                amount: d("236.00"),
                method: PaymentMethod::Cash,
            },
            Dispatch::Synchronous,
        )
        .unwrap();
    assert_eq!(balance(&store, PAYABLES), Decimal::ZERO);
    assert_eq!(balance(&store, CASH), d("-236.00"));
}

#[test]
fn test_credit_note_refund_and_on_account() {
    let store = seeded();
    let config = PostingConfig::default();
    let workflows = Workflows::new(&store, &config);

    let refund = CreditNote {
        id: 5,
        issue_date: date(2025, 9, 1),
        reference: "CN-5".to_string(),
        subtotal: d("50.00"),
        settlement: CreditNoteSettlement::Refund(PaymentMethod::Cash),
    };
    let outcome = workflows.post_credit_note(&refund, Dispatch::Synchronous).unwrap();
    assert_eq!(outcome.entry().unwrap().total_debit, d("59.00"));
    assert_eq!(balance(&store, POS_SALES), d("-50.00"));
    assert_eq!(balance(&store, VAT_PAYABLE), d("-9.00"));
    assert_eq!(balance(&store, CASH), d("-59.00"));

    let on_account = CreditNote {
        id: 6,
        settlement: CreditNoteSettlement::OnAccount,
        ..refund
    };
    workflows.post_credit_note(&on_account, Dispatch::Synchronous).unwrap();
    assert_eq!(balance(&store, RECEIVABLES), d("-59.00"));
}

#[test]
fn test_reversal_of_workflow_posting() {
    let store = seeded();
    let config = PostingConfig::default();
    let workflows = Workflows::new(&store, &config);
    let outcome = workflows
        .post_invoice(
            &SalesInvoice {
                id: 3,
                invoice_date: date(2025, 5, 2),
                reference: "INV-3".to_string(),
                subtotal: d("10.00"),
            },
            Dispatch::Synchronous,
        )
        .unwrap();

    let engine = JournalEngine::new(&store);
    engine
        .reverse_journal(outcome.entry().unwrap().id, date(2025, 5, 3), None)
        .unwrap();
    assert_eq!(balance(&store, RECEIVABLES), Decimal::ZERO);
    assert_eq!(balance(&store, VAT_PAYABLE), Decimal::ZERO);
}

#[test]
fn test_amounts_beyond_column_range_are_rejected() {
    let store = seeded();
    let config = PostingConfig::default();
    let workflows = Workflows::new(&store, &config);
    let huge = d("50000000000000000000000000000");

    let batch = OpeningBalanceBatch {
        batch_id: 4,
        entry_date: date(2025, 1, 1),
        rows: vec![
            OpeningBalanceRow {
                account_code: CASH.to_string(),
                amount: d("10.00"),
                description: None,
            },
            OpeningBalanceRow {
                account_code: BANK.to_string(),
                amount: huge,
                description: None,
            },
        ],
        created_by: None,
    };
    assert!(matches!(
        workflows.post_opening_balances(&batch, Dispatch::Synchronous),
        Err(LedgerError::AmountOverflow { line: Some(2) })
    ));

    let invoice = SalesInvoice {
        id: 90,
        invoice_date: date(2025, 5, 2),
        reference: "INV-90".to_string(),
        subtotal: huge,
    };
    assert!(matches!(
        workflows.post_invoice(&invoice, Dispatch::Synchronous),
        Err(LedgerError::AmountOverflow { line: None })
    ));

    assert_eq!(store.journal_count().unwrap(), 0);
    assert_eq!(workflows.failures().unresolved().unwrap().len(), 2);
}
