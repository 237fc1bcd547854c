//! Observability: Distributed Tracing, Metrics, and Logging.

use opentelemetry_otlp::WithExportConfig;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the observability stack.
///
/// `RUST_LOG` wins over `default_filter` when set.
pub fn init(
    service_name: &str,
    otlp_endpoint: Option<&str>,
    json: bool,
    default_filter: &str,
) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let telemetry_layer = match otlp_endpoint {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::config()
                        .with_resource(opentelemetry_sdk::Resource::new(vec![
                            opentelemetry::KeyValue::new("service.name", service_name.to_string()),
                        ])),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry_layer)
        .with(fmt_layer)
        .try_init()?;

    metrics::register_metrics();
    Ok(())
}

/// Install the Prometheus exporter on `addr`.
pub fn install_prometheus(addr: SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Shutdown OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Metrics registry and helpers.
pub mod metrics {
    use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

    /// Register all metric descriptions.
    pub fn register_metrics() {
        // Counters
        describe_counter!("popug_events_published_total", "Events written to the broker");
        describe_counter!("popug_events_consumed_total", "Events consumed, labelled by outcome");
        describe_counter!("popug_events_dead_lettered_total", "Events routed to the dead-letter topic");
        describe_counter!("popug_schema_rejections_total", "Events rejected by the schema registry");
        describe_counter!("popug_tasks_created_total", "Tasks created");
        describe_counter!("popug_tasks_completed_total", "Tasks moved to completed");
        describe_counter!("popug_tasks_reassigned_total", "Tasks given a new assignee by a reassignment");
        describe_counter!("popug_ledger_entries_total", "Ledger entries appended");
        describe_counter!("popug_errors_total", "Errors constructed, by code");

        // Gauges
        describe_gauge!("popug_outbox_pending", "Outbox messages awaiting publication");

        // Histograms
        describe_histogram!("popug_handler_duration_seconds", "Event handler latency in seconds");
        describe_histogram!("popug_outbox_relay_batch_size", "Messages published per relay pass");
    }

    pub fn record_published(topic: &str, name: &str) {
        counter!(
            "popug_events_published_total",
            "topic" => topic.to_string(),
            "name" => name.to_string(),
        )
        .increment(1);
    }

    /// `outcome` is one of `ok`, `failed` or `dead_lettered`.
    pub fn record_consumed(topic: &str, outcome: &'static str, duration_secs: f64) {
        counter!(
            "popug_events_consumed_total",
            "topic" => topic.to_string(),
            "outcome" => outcome,
        )
        .increment(1);
        histogram!("popug_handler_duration_seconds", "topic" => topic.to_string()).record(duration_secs);
    }

    pub fn record_dead_lettered(topic: &str) {
        counter!("popug_events_dead_lettered_total", "topic" => topic.to_string()).increment(1);
    }

    pub fn record_schema_rejection(schema_type: &str) {
        counter!("popug_schema_rejections_total", "schema" => schema_type.to_string()).increment(1);
    }

    pub fn record_task_created() {
        counter!("popug_tasks_created_total").increment(1);
    }

    pub fn record_task_completed() {
        counter!("popug_tasks_completed_total").increment(1);
    }

    pub fn record_tasks_reassigned(count: u64) {
        counter!("popug_tasks_reassigned_total").increment(count);
    }

    /// `kind` is `withdrawal` or `payment`.
    pub fn record_ledger_entry(kind: &'static str) {
        counter!("popug_ledger_entries_total", "kind" => kind).increment(1);
    }

    pub fn set_outbox_pending(pending: u64) {
        gauge!("popug_outbox_pending").set(pending as f64);
    }

    pub fn record_relay_batch(published: usize) {
        histogram!("popug_outbox_relay_batch_size").record(published as f64);
    }
}
