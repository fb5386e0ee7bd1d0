//! Metrics and tracing helpers
//!
//! With the `metrics` feature, [`METRICS`] holds OpenTelemetry instruments exported through a
//! Prometheus registry ([`metrics_text`] renders it for the operator endpoint). With the
//! `tracing` feature, [`tracing_helpers`] builds the spans used around postings, transactions
//! and queries.

#[cfg(feature = "metrics")]
pub use self::otel::*;

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, MeterProvider as _};
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<LedgerMetrics> = Lazy::new(LedgerMetrics::init);

    pub struct LedgerMetrics {
        pub registry: Registry,
        provider: SdkMeterProvider,
        pub journals_posted: Counter<u64>,
        pub idempotent_hits: Counter<u64>,
        pub posting_failures: Counter<u64>,
        pub posting_duration: Histogram<f64>,
        pub queries_failed: Counter<u64>,
        pub query_duration: Histogram<f64>,
    }

    impl LedgerMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let exporter = opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
                .expect("failed to build prometheus exporter");
            let provider = SdkMeterProvider::builder().with_reader(exporter).build();
            let meter = provider.meter("ledgerguard");

            let journals_posted = meter
                .u64_counter("ledgerguard_journals_posted_total")
                .with_description("Journal entries created")
                .build();
            let idempotent_hits = meter
                .u64_counter("ledgerguard_idempotent_hits_total")
                .with_description("create_or_get calls answered with an existing entry")
                .build();
            let posting_failures = meter
                .u64_counter("ledgerguard_posting_failures_total")
                .with_description("Posting attempts recorded as failures")
                .build();
            let posting_duration = meter
                .f64_histogram("ledgerguard_posting_duration_seconds")
                .with_description("Duration of journal postings")
                .build();
            let queries_failed = meter
                .u64_counter("ledgerguard_query_errors_total")
                .with_description("Failed SQL statements")
                .build();
            let query_duration = meter
                .f64_histogram("ledgerguard_query_duration_seconds")
                .with_description("Duration of SQL statements")
                .build();

            Self {
                registry,
                provider,
                journals_posted,
                idempotent_hits,
                posting_failures,
                posting_duration,
                queries_failed,
                query_duration,
            }
        }

        pub fn record_posting(&self, source_type: &str, elapsed: Duration) {
            let attrs = [KeyValue::new("source_type", source_type.to_string())];
            self.journals_posted.add(1, &attrs);
            self.posting_duration.record(elapsed.as_secs_f64(), &attrs);
        }

        pub fn record_idempotent_hit(&self, source_type: &str) {
            self.idempotent_hits
                .add(1, &[KeyValue::new("source_type", source_type.to_string())]);
        }

        pub fn record_posting_failure(&self, source_type: &str) {
            self.posting_failures
                .add(1, &[KeyValue::new("source_type", source_type.to_string())]);
        }

        pub fn record_query_error(&self) {
            self.queries_failed.add(1, &[]);
        }

        pub fn record_query_duration(&self, elapsed: Duration) {
            self.query_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn provider(&self) -> &SdkMeterProvider {
            &self.provider
        }
    }

    /// Render every instrument in Prometheus text exposition format.
    pub fn metrics_text() -> String {
        let encoder = TextEncoder::new();
        let families = METRICS.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            log::warn!("failed to encode metrics: {e}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    pub fn posting_span(source_type: &str, source_id: i64, event_type: &str) -> Span {
        info_span!(
            "ledgerguard.posting",
            source_type = source_type,
            source_id = source_id,
            event_type = event_type
        )
    }

    pub fn execute_query_span(query: &str) -> Span {
        let statement = query.split_whitespace().next().unwrap_or("").to_string();
        info_span!("ledgerguard.query", statement = %statement)
    }

    pub fn acquire_connection_span() -> Span {
        info_span!("ledgerguard.connect")
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("ledgerguard.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("ledgerguard.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("ledgerguard.transaction.rollback")
    }
}
