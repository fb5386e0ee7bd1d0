//! Admin endpoint over a real socket

use chrono::Utc;
use ledgerguard::admin;
use ledgerguard::model::SourceKey;
use ledgerguard::{LedgerStore, MemoryStore};
use rand::Rng;
use std::sync::Arc;

fn start(store: Arc<MemoryStore>) -> String {
    let mut rng = rand::thread_rng();
    for _ in 0..20 {
        let bind = format!("127.0.0.1:{}", rng.gen_range(20000..60000));
        if admin::serve(store.clone(), &bind).is_ok() {
            return format!("http://{bind}");
        }
    }
    panic!("no free port for the admin endpoint");
}

#[test]
fn test_admin_endpoint_serves_health_and_failures() {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_failure(&SourceKey::new("payment", 4, "received"), "No open fiscal period", Utc::now())
        .unwrap();
    let base = start(store);

    let health = ureq::get(&format!("{base}/health")).call().unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.into_string().unwrap(), "ok\n");

    let body = ureq::get(&format!("{base}/failures"))
        .call()
        .unwrap()
        .into_string()
        .unwrap();
    let failures: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(failures[0]["source"]["source_type"], "payment");
    assert_eq!(failures[0]["attempts"], 1);

    match ureq::get(&format!("{base}/missing")).call() {
        Err(ureq::Error::Status(code, _)) => assert_eq!(code, 404),
        other => panic!("expected 404, got {other:?}"),
    }
}
