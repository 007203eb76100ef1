//! Query metrics and tracing spans.
//!
//! With the `metrics` feature, [`METRICS`] records statement counts,
//! failures, durations and fetched rows through OpenTelemetry instruments
//! exported into a Prometheus registry. With the `tracing` feature,
//! [`tracing_helpers`] creates the spans statement execution and fetching
//! run inside.

#[cfg(feature = "metrics")]
pub use self::prometheus_metrics::{QueryMetrics, METRICS};

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        metrics::{Counter, Histogram, MeterProvider},
        KeyValue,
    };
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<QueryMetrics> = Lazy::new(QueryMetrics::init);

    pub struct QueryMetrics {
        pub registry: Registry,
        provider: SdkMeterProvider,
        pub queries_total: Counter<u64>,
        pub query_errors_total: Counter<u64>,
        pub rows_fetched_total: Counter<u64>,
        pub query_duration: Histogram<f64>,
    }

    impl QueryMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let exporter = opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
                .expect("failed to build prometheus exporter");
            let provider = SdkMeterProvider::builder().with_reader(exporter).build();
            let meter = provider.meter("relquery");

            let queries_total = meter
                .u64_counter("relquery_queries_total")
                .with_description("Total statements executed")
                .build();

            let query_errors_total = meter
                .u64_counter("relquery_query_errors_total")
                .with_description("Statements rejected by the database handle")
                .build();

            let rows_fetched_total = meter
                .u64_counter("relquery_rows_fetched_total")
                .with_description("Rows materialized, by fetch mode")
                .build();

            let query_duration = meter
                .f64_histogram("relquery_query_duration_seconds")
                .with_description("Time to submit a statement and open its cursor")
                .build();

            Self {
                registry,
                provider,
                queries_total,
                query_errors_total,
                rows_fetched_total,
                query_duration,
            }
        }

        pub fn record_query(&self, elapsed: Duration) {
            self.queries_total.add(1, &[]);
            self.query_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_error(&self) {
            self.query_errors_total.add(1, &[]);
        }

        pub fn record_rows(&self, rows: u64, mode: &'static str) {
            self.rows_fetched_total.add(rows, &[KeyValue::new("mode", mode)]);
        }

        /// Prometheus text exposition of every recorded metric
        pub fn render(&self) -> String {
            TextEncoder::new()
                .encode_to_string(&self.registry.gather())
                .unwrap_or_else(|e| {
                    log::warn!("relquery: failed to encode metrics: {e}");
                    String::new()
                })
        }

        pub fn provider(&self) -> &SdkMeterProvider {
            &self.provider
        }
    }

}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{debug_span, Span};

    /// Span around submitting one statement
    pub fn execute_query_span(sql: &str) -> Span {
        debug_span!("relquery.execute", sql = %sql)
    }

    /// Span around pulling rows of one entity
    pub fn fetch_span(entity: &str, mode: &'static str) -> Span {
        debug_span!("relquery.fetch", entity = %entity, mode = mode)
    }
}
