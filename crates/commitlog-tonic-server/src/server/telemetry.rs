//! # Telemetry Features
//!
//! Logging through `tracing-subscriber` is always on. OpenTelemetry export of
//! spans and metrics is opt-in through features.
//!
//! ## Feature matrix
//!
//! - `tracing`: Enables OpenTelemetry distributed tracing (via spans).
//! - `metrics`: Enables OpenTelemetry metrics (via counters, histograms, etc.).
//! - `otlp`: Enables the OTLP/gRPC exporter.
//! - `stdout`: Enables the stdout exporter.
//!
//! ## Feature constraints
//!
//! - Exporters require using at least one of: `tracing` or `metrics`.
//! - Both `otlp` and `stdout` exporters can be enabled at the same time.
//!
//! ## OTLP configuration
//!
//! - `OTLP_ENDPOINT` (required): collector URL.
//! - `OTLP_HEADERS`: comma separated `key=value` pairs sent as gRPC metadata,
//!   e.g. `x-honeycomb-team=<api key>,x-honeycomb-dataset=commitlog`.
//! - `OTLP_COMPRESSION`: `gzip` (default) or `zstd`.
//!
//! ## Span behavior
//!
//! - Every call opens a `grpc.call` span named after its gRPC method. Spans
//!   created via `tracing::info_span!` are exported to any enabled telemetry
//!   backend
//! - Produce calls are always sampled, other calls by `TRACE_SAMPLE_RATIO`
//!   (see [`crate::server::sampling`])
//! - Events (`tracing::info!`, etc.) inside a span become span events in
//!   telemetry backends
//! - Events outside of a span are only shown in log output (via
//!   `fmt::layer()`), not exported
//!
//! ## Metrics behavior
//!
//! - Call counts, in-flight calls, errors, and durations are recorded per
//!   `rpc.method`; record throughput is counted by the handlers
//! - Each exporter (OTLP, stdout) gets its own reader
//!
//! ## Example usage
//!
//! Enable tracing and export over OTLP:
//!
//! ```bash
//! OTLP_ENDPOINT=https://collector:4317 cargo run --features tracing,otlp
//! ```
//!
//! Enable tracing and metrics, exported to both OTLP and stdout:
//!
//! ```bash
//! cargo run --features tracing,metrics,otlp,stdout
//! ```
//!
//! Enable only local stdout export (no remote backend):
//!
//! ```bash
//! cargo run --features tracing,stdout
//! ```

// Disallow using `otlp` without `tracing` or `metrics`
#[cfg(all(feature = "otlp", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'otlp' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

// Disallow using `stdout` without `tracing` or `metrics`
#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

// Core imports - always needed
use tonic::Code;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// OTLP-specific imports
#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "otlp", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(feature = "otlp")]
use tonic::metadata::MetadataMap;
#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
use tonic::transport::ClientTlsConfig;

// Metrics-specific imports
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

// Either
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

// Tracing-specific imports
#[cfg(feature = "tracing")]
use crate::server::sampling::ProduceAlwaysSampler;
#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every exporter. Failures are reported on stderr
    /// since the subscriber may already be unusable.
    pub fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

/// Installs the global subscriber and, when enabled, the OpenTelemetry
/// providers.
///
/// `sample_ratio` is the trace-id ratio used for calls that are not always
/// sampled. It is ignored without the `tracing` feature.
pub fn init_telemetry(sample_ratio: f64) -> anyhow::Result<TelemetryProviders> {
    #[cfg(not(feature = "tracing"))]
    let _ = sample_ratio;

    #[cfg(feature = "tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer(sample_ratio)?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder("commitlog")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    // Always subscribe to standard tracing logs printed to the console via
    // `tracing_subscriber::fmt`. This is unrelated to the `opentelemetry_stdout`
    // exporter - it logs spans/events as human-readable output.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// Parses `key=value,key=value` into metadata pairs.
#[cfg(any(test, feature = "otlp"))]
fn parse_headers(raw: &str) -> anyhow::Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("malformed header `{pair}`, expected key=value"))?;
            Ok((key.trim().to_ascii_lowercase(), value.trim().to_owned()))
        })
        .collect()
}

#[cfg(feature = "otlp")]
struct OtlpSettings {
    endpoint: String,
    metadata: MetadataMap,
    compression: Compression,
}

#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
fn otlp_settings() -> anyhow::Result<OtlpSettings> {
    use anyhow::Context;
    use std::str::FromStr;
    use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};

    let endpoint = std::env::var("OTLP_ENDPOINT").context("missing `OTLP_ENDPOINT`")?;

    let mut metadata = MetadataMap::new();
    let headers = std::env::var("OTLP_HEADERS").unwrap_or_default();
    for (key, value) in parse_headers(&headers)? {
        let key = AsciiMetadataKey::from_str(&key)
            .with_context(|| format!("invalid OTLP header name `{key}`"))?;
        let value = AsciiMetadataValue::from_str(&value)
            .with_context(|| format!("invalid value for OTLP header `{key}`"))?;
        metadata.insert(key, value);
    }

    let compression = std::env::var("OTLP_COMPRESSION")
        .unwrap_or_else(|_| "gzip".to_owned())
        .to_ascii_lowercase();
    let compression = Compression::from_str(&compression)?;

    Ok(OtlpSettings {
        endpoint,
        metadata,
        compression,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("commitlog")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let settings = otlp_settings()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "tracing")]
fn init_tracer(sample_ratio: f64) -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder()
        .with_resource(resource())
        .with_sampler(sdktrace::Sampler::ParentBased(Box::new(
            ProduceAlwaysSampler::new(sample_ratio),
        )));

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let settings = otlp_settings()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(settings.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(settings.compression)
            .with_endpoint(settings.endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;

        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();

        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static CALLS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CALLS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CALL_ERRORS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CALL_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static STREAMS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RECORDS_PRODUCED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static RECORDS_CONSUMED: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = CALLS.set(
        meter
            .u64_counter("rpc.server.calls")
            .with_description("Total gRPC calls started")
            .build(),
    );

    let _ = CALLS_INFLIGHT.set(
        meter
            .i64_up_down_counter("rpc.server.calls_inflight")
            .with_description("gRPC calls currently in progress")
            .build(),
    );

    let _ = CALL_ERRORS.set(
        meter
            .u64_counter("rpc.server.errors")
            .with_description("gRPC calls that completed with a non-OK status")
            .build(),
    );

    let _ = CALL_DURATION_MS.set(
        meter
            .f64_histogram("rpc.server.duration")
            .with_unit("ms")
            .with_description("End-to-end call duration")
            .build(),
    );

    let _ = STREAMS_INFLIGHT.set(
        meter
            .i64_up_down_counter("streams_inflight")
            .with_description("Concurrent produce/consume streams")
            .build(),
    );

    let _ = RECORDS_PRODUCED.set(
        meter
            .u64_counter("records_produced")
            .with_description("Records appended to the log")
            .build(),
    );

    let _ = RECORDS_CONSUMED.set(
        meter
            .u64_counter("records_consumed")
            .with_description("Records delivered to consumers")
            .build(),
    );
}

#[cfg(feature = "metrics")]
fn method_attr(method: &str) -> KeyValue {
    KeyValue::new("rpc.method", method.to_owned())
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_calls(method: &str) {
    if let Some(counter) = CALLS.get() {
        counter.add(1, &[method_attr(method)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_calls(_method: &str) {}

#[cfg(feature = "metrics")]
pub fn increment_calls_inflight(method: &str) {
    if let Some(counter) = CALLS_INFLIGHT.get() {
        counter.add(1, &[method_attr(method)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_calls_inflight(_method: &str) {}

#[cfg(feature = "metrics")]
pub fn decrement_calls_inflight(method: &str) {
    if let Some(counter) = CALLS_INFLIGHT.get() {
        counter.add(-1, &[method_attr(method)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_calls_inflight(_method: &str) {}

#[cfg(feature = "metrics")]
pub fn increment_call_errors(method: &str, code: Code) {
    if let Some(counter) = CALL_ERRORS.get() {
        counter.add(
            1,
            &[
                method_attr(method),
                KeyValue::new("rpc.grpc.status_code", code as i64),
            ],
        );
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_call_errors(_method: &str, _code: Code) {}

#[cfg(feature = "metrics")]
pub fn record_call_duration(method: &str, duration_ms: f64) {
    if let Some(histogram) = CALL_DURATION_MS.get() {
        histogram.record(duration_ms, &[method_attr(method)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_call_duration(_method: &str, _duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_streams_inflight() {
    if let Some(counter) = STREAMS_INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_streams_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_streams_inflight() {
    if let Some(counter) = STREAMS_INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_streams_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_records_produced(count: u64) {
    if let Some(counter) = RECORDS_PRODUCED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_records_produced(_count: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_records_consumed(count: u64) {
    if let Some(counter) = RECORDS_CONSUMED.get() {
        counter.add(count, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_records_consumed(_count: u64) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_otlp_headers() {
        let headers = parse_headers(" X-Honeycomb-Team = key ,x-honeycomb-dataset=log,").unwrap();
        assert_eq!(
            headers,
            vec![
                ("x-honeycomb-team".to_owned(), "key".to_owned()),
                ("x-honeycomb-dataset".to_owned(), "log".to_owned()),
            ]
        );
        assert!(parse_headers("").unwrap().is_empty());
        assert!(parse_headers("novalue").is_err());
    }

    #[test]
    fn metric_helpers_are_safe_before_init() {
        increment_calls("Produce");
        increment_calls_inflight("Produce");
        decrement_calls_inflight("Produce");
        increment_call_errors("Produce", Code::Internal);
        record_call_duration("Produce", 1.5);
        increment_records_produced(3);
        increment_records_consumed(3);
    }
}
