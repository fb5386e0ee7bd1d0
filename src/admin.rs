//! Operator HTTP endpoint
//!
//! A small `may_minihttp` service:
//!
//! - `GET /health`: `ok`
//! - `GET /failures`: unresolved journal failures as JSON (`?all=true` for every record)
//! - `GET /metrics`: Prometheus text (empty without the `metrics` feature)
//!
//! A `may_postgres` client belongs to one coroutine at a time, so [`serve_database`] opens a
//! connection for each `/failures` request instead of sharing one across connections.

use crate::config::DatabaseConfig;
use crate::failure::FailureTracker;
use crate::store::{LedgerStore, PgStore};
use may_minihttp::{HttpServer, HttpService, Request, Response};
use std::io;
use std::sync::Arc;

/// Status line, content type and body of one admin response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminResponse {
    pub status: usize,
    pub reason: &'static str,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl AdminResponse {
    fn text(status: usize, reason: &'static str, body: impl Into<String>) -> Self {
        Self {
            status,
            reason,
            content_type: "Content-Type: text/plain; charset=utf-8",
            body: body.into().into_bytes(),
        }
    }

    fn json(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            reason: "OK",
            content_type: "Content-Type: application/json",
            body,
        }
    }
}

#[derive(Clone)]
enum StoreSource {
    Shared(Arc<dyn LedgerStore>),
    Connect(DatabaseConfig),
}

#[derive(Clone)]
pub struct AdminService {
    source: StoreSource,
}

impl AdminService {
    /// Serve from one store shared by every request.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            source: StoreSource::Shared(store),
        }
    }

    /// Open a fresh PostgreSQL store for each request that reads the ledger.
    pub fn connecting(config: DatabaseConfig) -> Self {
        Self {
            source: StoreSource::Connect(config),
        }
    }

    fn store(&self) -> Result<Arc<dyn LedgerStore>, AdminResponse> {
        match &self.source {
            StoreSource::Shared(store) => Ok(Arc::clone(store)),
            StoreSource::Connect(config) => match PgStore::connect(config) {
                Ok(store) => Ok(Arc::new(store)),
                Err(e) => {
                    log::error!("admin: connecting to the ledger database: {e}");
                    Err(AdminResponse::text(
                        503,
                        "Service Unavailable",
                        format!("database unavailable: {e}\n"),
                    ))
                }
            },
        }
    }

    /// Answer one request; `path` may carry a query string.
    pub fn route(&self, method: &str, path: &str) -> AdminResponse {
        if method != "GET" {
            return AdminResponse::text(405, "Method Not Allowed", "method not allowed\n");
        }
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        match path {
            "/health" => AdminResponse::text(200, "OK", "ok\n"),
            "/failures" => self.failures(query.split('&').any(|pair| pair == "all=true")),
            "/metrics" => AdminResponse::text(200, "OK", metrics_body()),
            _ => AdminResponse::text(404, "Not Found", "not found\n"),
        }
    }

    fn failures(&self, all: bool) -> AdminResponse {
        let store = match self.store() {
            Ok(store) => store,
            Err(reply) => return reply,
        };
        // Failure text length does not matter for listing.
        let tracker = FailureTracker::new(store.as_ref(), usize::MAX);
        let listed = if all { tracker.all() } else { tracker.unresolved() };
        match listed.map(|failures| serde_json::to_vec(&failures)) {
            Ok(Ok(body)) => AdminResponse::json(body),
            Ok(Err(e)) => AdminResponse::text(500, "Internal Server Error", format!("{e}\n")),
            Err(e) => {
                log::error!("admin: listing failures: {e}");
                AdminResponse::text(500, "Internal Server Error", format!("{e}\n"))
            }
        }
    }
}

#[cfg(feature = "metrics")]
fn metrics_body() -> String {
    crate::metrics::metrics_text()
}

#[cfg(not(feature = "metrics"))]
fn metrics_body() -> String {
    String::new()
}

impl HttpService for AdminService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let reply = self.route(req.method(), req.path());
        res.status_code(reply.status, reply.reason);
        res.header(reply.content_type);
        res.body_vec(reply.body);
        Ok(())
    }
}

/// Start the admin endpoint on `bind` and return its server handle.
pub fn serve(store: Arc<dyn LedgerStore>, bind: &str) -> io::Result<may::coroutine::JoinHandle<()>> {
    log::info!("admin endpoint listening on http://{bind}");
    HttpServer(AdminService::new(store)).start(bind)
}

/// Start the admin endpoint on `bind`, connecting to `config` per request.
pub fn serve_database(
    config: DatabaseConfig,
    bind: &str,
) -> io::Result<may::coroutine::JoinHandle<()>> {
    log::info!("admin endpoint listening on http://{bind}");
    HttpServer(AdminService::connecting(config)).start(bind)
}
