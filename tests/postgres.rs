//! PostgreSQL-backed tests
//!
//! These run only when `TEST_DATABASE_URL` points at a disposable database; every test drops
//! and recreates the `public` schema. Without the variable each test prints a note and passes.

use chrono::{TimeZone, Utc};
use ledgerguard::admin;
use ledgerguard::config::{DatabaseConfig, PostingConfig};
use ledgerguard::executor::LedgerExecutor;
use ledgerguard::migration::Migrator;
use ledgerguard::model::{
    JournalRequest, LineInput, NewFiscalPeriod, PosSale, PosSession, SaleStatus, SourceKey,
    Tender, TenderType,
};
use ledgerguard::test_helpers::{date, seed_chart, TestDatabase, BANK, CASH, POS_SALES};
use ledgerguard::{
    BalanceRebuilder, ChartOfAccounts, Dispatch, JournalEngine, LedgerError, LedgerStore,
    PeriodGuard, RebuildMode, Workflows,
};
use rand::Rng;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::thread;

static DATABASE: Mutex<()> = Mutex::new(());

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Reset the database and hold the lock for the duration of the test.
fn database() -> Option<(TestDatabase, std::sync::MutexGuard<'static, ()>)> {
    let Some(db) = TestDatabase::from_env() else {
        eprintln!("{} not set, skipping PostgreSQL test", TestDatabase::ENV_VAR);
        return None;
    };
    let guard = DATABASE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    db.reset().expect("reset test database");
    Some((db, guard))
}

fn sale(id: i64, amount: &str) -> JournalRequest {
    JournalRequest::system(
        date(2025, 4, 10),
        SourceKey::new("invoice", id, "posted"),
        format!("Invoice {id}"),
        vec![
            LineInput::debit(CASH, d(amount)),
            LineInput::credit(POS_SALES, d(amount)),
        ],
    )
}

#[test]
fn test_migrations_up_to_date_after_reset() {
    let Some((db, _guard)) = database() else { return };
    let executor = db.executor().unwrap();
    let migrator = Migrator::embedded(30);

    let status = migrator.status(&executor).unwrap();
    assert!(status.is_up_to_date());
    assert!(!status.applied.is_empty());
    assert_eq!(migrator.up(&executor).unwrap(), 0);
}

#[test]
fn test_posting_updates_balances() {
    let Some((db, _guard)) = database() else { return };
    let store = db.store().unwrap();
    seed_chart(&store).unwrap();
    let engine = JournalEngine::new(&store);

    let entry = engine
        .create_journal_entry(JournalRequest::manual(
            date(2025, 2, 1),
            "Float",
            vec![LineInput::debit(CASH, d("50.00")), LineInput::credit(BANK, d("50.00"))],
        )
        .auto_post(true))
        .unwrap();

    assert!(entry.is_posted);
    assert_eq!(entry.journal_number, "JE-000001");
    let chart = ChartOfAccounts::new(&store);
    assert_eq!(chart.account(CASH).unwrap().current_balance, d("50.00"));
    assert_eq!(chart.account(BANK).unwrap().current_balance, d("-50.00"));

    let lines = engine.journal_lines(entry.id).unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].line_number, 1);
}

#[test]
fn test_unbalanced_entry_leaves_no_rows() {
    let Some((db, _guard)) = database() else { return };
    let store = db.store().unwrap();
    seed_chart(&store).unwrap();
    let engine = JournalEngine::new(&store);

    let result = engine.create_journal_entry(JournalRequest::manual(
        date(2025, 2, 1),
        "Broken",
        vec![LineInput::debit(CASH, d("100.00")), LineInput::credit(BANK, d("90.00"))],
    ));
    assert!(matches!(result, Err(LedgerError::Unbalanced { .. })));

    let row = db
        .executor()
        .unwrap()
        .query_one("SELECT count(*) FROM journal_entries", &[])
        .unwrap();
    assert_eq!(row.get::<_, i64>(0), 0);
}

#[test]
fn test_concurrent_create_or_get_posts_once() {
    let Some((db, _guard)) = database() else { return };
    seed_chart(&db.store().unwrap()).unwrap();
    let db = Arc::new(db);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                let store = db.store().unwrap();
                let engine = JournalEngine::new(&store);
                engine.create_or_get_journal(sale(11, "25.00")).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(outcomes.iter().filter(|o| o.created).count(), 1);
    let first = outcomes[0].entry.id;
    assert!(outcomes.iter().all(|o| o.entry.id == first));

    let store = db.store().unwrap();
    let engine = JournalEngine::new(&store);
    assert_eq!(
        engine
            .count_for_source(&SourceKey::new("invoice", 11, "posted"))
            .unwrap(),
        1
    );
    assert_eq!(
        ChartOfAccounts::new(&store).account(CASH).unwrap().current_balance,
        d("25.00")
    );

    // Callers that lost the race drew no journal number
    let next = engine.create_journal_entry(sale(12, "5.00")).unwrap();
    assert_eq!(next.journal_number, "JE-000002");
}

#[test]
fn test_rejected_postings_leave_no_number_gap() {
    let Some((db, _guard)) = database() else { return };
    let store = db.store().unwrap();
    seed_chart(&store).unwrap();
    let engine = JournalEngine::new(&store);

    let first = engine.create_journal_entry(sale(21, "10.00")).unwrap();
    assert!(matches!(
        engine.create_journal_entry(sale(21, "10.00")),
        Err(LedgerError::DuplicateSource(_))
    ));
    assert_eq!(engine.create_or_get_journal(sale(21, "10.00")).unwrap().entry.id, first.id);
    let mut outside = sale(22, "10.00");
    outside.entry_date = date(2030, 1, 1);
    assert!(engine.create_journal_entry(outside).is_err());

    let second = engine.create_journal_entry(sale(23, "10.00")).unwrap();
    assert_eq!(first.journal_number, "JE-000001");
    assert_eq!(second.journal_number, "JE-000002");
}

#[test]
fn test_concurrent_close_session_generates_one_report() {
    let Some((db, _guard)) = database() else { return };
    seed_chart(&db.store().unwrap()).unwrap();
    let db = Arc::new(db);
    let session = PosSession {
        id: 301,
        business_date: date(2025, 3, 14),
        closed_at: Some(Utc.with_ymd_and_hms(2025, 3, 14, 22, 5, 0).unwrap()),
        sales: vec![
            PosSale {
                id: 1,
                status: SaleStatus::Completed,
                gross: d("110.00"),
                discount: d("10.00"),
                tenders: vec![Tender {
                    tender_type: TenderType::Cash,
                    amount: d("100.00"),
                }],
            },
            PosSale {
                id: 2,
                status: SaleStatus::Completed,
                gross: d("50.00"),
                discount: Decimal::ZERO,
                tenders: vec![Tender {
                    tender_type: TenderType::Card,
                    amount: d("50.00"),
                }],
            },
        ],
    };

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let db = Arc::clone(&db);
            let session = session.clone();
            thread::spawn(move || {
                let store = db.store().unwrap();
                let config = PostingConfig::default();
                let (report, outcome) = Workflows::new(&store, &config)
                    .close_session(&session, Dispatch::Synchronous)
                    .unwrap();
                (report.id, outcome.entry().map(|entry| entry.id))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let report_id = results[0].0;
    assert!(results.iter().all(|(id, _)| *id == report_id));
    let journal_ids: Vec<_> = results.iter().filter_map(|(_, journal)| *journal).collect();
    assert_eq!(journal_ids.len(), 6);
    assert!(journal_ids.iter().all(|id| *id == journal_ids[0]));

    let store = db.store().unwrap();
    assert_eq!(
        JournalEngine::new(&store)
            .count_for_source(&SourceKey::new("pos_zreport", report_id, "posted"))
            .unwrap(),
        1
    );
    let report = store.zreport_by_session(301).unwrap().unwrap();
    assert_eq!(report.id, report_id);
    assert!(report.journal_entry_id.is_some());
    assert_eq!(
        ChartOfAccounts::new(&store).account(CASH).unwrap().current_balance,
        d("100.00")
    );
}

#[test]
fn test_trigger_rejects_changes_to_posted_entry() {
    let Some((db, _guard)) = database() else { return };
    let store = db.store().unwrap();
    seed_chart(&store).unwrap();
    let entry = JournalEngine::new(&store)
        .create_journal_entry(sale(12, "10.00"))
        .unwrap();

    let executor = db.executor().unwrap();
    let update = executor.execute(
        "UPDATE journal_entries SET description = 'tampered' WHERE id = $1",
        &[&entry.id],
    );
    assert!(update.is_err());
    let delete = executor.execute("DELETE FROM journal_lines WHERE journal_entry_id = $1", &[&entry.id]);
    assert!(delete.is_err());

    let unchanged = JournalEngine::new(&store).get_journal(entry.id).unwrap();
    assert_eq!(unchanged.description, "Invoice 12");
}

#[test]
fn test_rebuild_after_postings_is_consistent() {
    let Some((db, _guard)) = database() else { return };
    let store = db.store().unwrap();
    seed_chart(&store).unwrap();
    let engine = JournalEngine::new(&store);
    for id in 1..=5 {
        engine.create_or_get_journal(sale(id, "12.34")).unwrap();
    }

    let report = BalanceRebuilder::new(&store)
        .rebuild(None, RebuildMode::DryRun)
        .unwrap();
    assert!(report.is_consistent());
    assert_eq!(
        ChartOfAccounts::new(&store).account(POS_SALES).unwrap().current_balance,
        d("61.70")
    );
}

#[test]
fn test_overlapping_period_rejected() {
    let Some((db, _guard)) = database() else { return };
    let store = db.store().unwrap();
    seed_chart(&store).unwrap();

    let result = PeriodGuard::new(&store).create_period(NewFiscalPeriod {
        name: "Q4 2025".to_string(),
        start_date: date(2025, 10, 1),
        end_date: date(2026, 3, 31),
    });
    assert!(matches!(result, Err(LedgerError::PeriodOverlap { .. })));
}

#[test]
fn test_admin_endpoint_connects_per_request() {
    let Some((db, _guard)) = database() else { return };
    let store = db.store().unwrap();
    store
        .upsert_failure(&SourceKey::new("bill", 7, "posted"), "No open fiscal period", Utc::now())
        .unwrap();

    let mut rng = rand::thread_rng();
    let base = (0..20)
        .find_map(|_| {
            let bind = format!("127.0.0.1:{}", rng.gen_range(20000..60000));
            let config = DatabaseConfig {
                url: db.url().to_string(),
                ..DatabaseConfig::default()
            };
            admin::serve_database(config, &bind)
                .ok()
                .map(|_| format!("http://{bind}"))
        })
        .expect("no free port for the admin endpoint");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let url = format!("{base}/failures");
            thread::spawn(move || ureq::get(&url).call().unwrap().into_string().unwrap())
        })
        .collect();
    for handle in handles {
        let failures: serde_json::Value = serde_json::from_str(&handle.join().unwrap()).unwrap();
        assert_eq!(failures.as_array().unwrap().len(), 1);
        assert_eq!(failures[0]["source"]["source_type"], "bill");
    }
}
