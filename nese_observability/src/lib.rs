//! Logging, tracing and metrics setup shared by the provisioner crates.

use std::{borrow::Cow, time::Duration};

use opentelemetry::{InstrumentationScope, global, trace::TracerProvider as _};
use opentelemetry_otlp::{ExporterBuildError, MetricExporter, SpanExporter};
use opentelemetry_sdk::{
    Resource,
    metrics::{MeterProviderBuilder, PeriodicReader},
    trace::SdkTracerProvider,
};
use snafu::{ResultExt, Snafu};
use tracing::Subscriber;
use tracing_opentelemetry::MetricsLayer;
use tracing_subscriber::{EnvFilter, Layer, prelude::*, registry::LookupSpan};

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter},
};

pub use crate::error_kind::ErrorKind;

mod error_kind;

const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";
const RUST_LOG: &str = "RUST_LOG";
const RUST_LOG_FORMAT: &str = "RUST_LOG_FORMAT";
const DEFAULT_LOG_FILTER: &str = "info";
const METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum ObservabilityError {
    #[snafu(display("Failed to build exporter"))]
    Exporter { source: ExporterBuildError },
}

pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Observability settings taken from the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives for logs and exported spans.
    pub log_filter: String,
    pub log_format: LogFormat,
    /// Export spans and metrics over OTLP. Off unless `OTEL_SDK_DISABLED=false`.
    pub export_enabled: bool,
    pub metrics_interval: Duration,
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let log_filter = lookup(RUST_LOG)
            .filter(|filter| !filter.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_format = match lookup(RUST_LOG_FORMAT).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        let export_enabled = lookup(OTEL_SDK_DISABLED).is_some_and(|value| value == "false");

        Self {
            log_filter,
            log_format,
            export_enabled,
            metrics_interval: METRICS_EXPORT_INTERVAL,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log_filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Install the global tracing subscriber configured from the environment.
pub fn init_observability(
    package_name: impl Into<Cow<'static, str>>,
    package_version: impl Into<Cow<'static, str>>,
) -> Result<(), ObservabilityError> {
    init_observability_with_config(package_name, package_version, &ObservabilityConfig::from_env())
}

pub fn init_observability_with_config(
    package_name: impl Into<Cow<'static, str>>,
    package_version: impl Into<Cow<'static, str>>,
    config: &ObservabilityConfig,
) -> Result<(), ObservabilityError> {
    let layers = vec![
        stdout(config),
        otel(package_name.into(), package_version.into(), config)?,
    ];

    tracing_subscriber::registry().with(layers).init();

    Ok(())
}

fn stdout<S>(config: &ObservabilityConfig) -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let filter = config.env_filter();

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .json()
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_target(false)
            .compact()
            .with_filter(filter)
            .boxed(),
    }
}

/// Span and metric layer. Without export the providers are still installed
/// so meters and spans work, they just go nowhere.
fn otel<S>(
    package_name: Cow<'static, str>,
    version: Cow<'static, str>,
    config: &ObservabilityConfig,
) -> Result<BoxedLayer<S>, ObservabilityError>
where
    S: Subscriber + Send + Sync,
    for<'a> S: LookupSpan<'a>,
{
    let resource = Resource::builder()
        .with_service_name(package_name.to_string())
        .build();

    let scope = InstrumentationScope::builder(package_name)
        .with_version(version)
        .build();

    let mut trace_provider = SdkTracerProvider::builder().with_resource(resource.clone());
    let mut meter_provider = MeterProviderBuilder::default().with_resource(resource);

    if config.export_enabled {
        let span_exporter = SpanExporter::builder()
            .with_tonic()
            .build()
            .context(ExporterSnafu)?;
        trace_provider = trace_provider.with_batch_exporter(span_exporter);

        let metric_exporter = MetricExporter::builder()
            .with_tonic()
            .build()
            .context(ExporterSnafu)?;
        meter_provider = meter_provider.with_reader(
            PeriodicReader::builder(metric_exporter)
                .with_interval(config.metrics_interval)
                .build(),
        );
    }

    let tracer = trace_provider.build().tracer_with_scope(scope);
    let meter_provider = meter_provider.build();
    global::set_meter_provider(meter_provider.clone());

    Ok(config
        .env_filter()
        .and_then(MetricsLayer::new(meter_provider))
        .and_then(tracing_opentelemetry::layer().with_tracer(tracer))
        .boxed())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> ObservabilityConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ObservabilityConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.log_format, LogFormat::Compact);
        assert!(!config.export_enabled);
    }

    #[test]
    fn test_export_requires_explicit_opt_in() {
        assert!(!config(&[(OTEL_SDK_DISABLED, "true")]).export_enabled);
        assert!(!config(&[(OTEL_SDK_DISABLED, "")]).export_enabled);
        assert!(config(&[(OTEL_SDK_DISABLED, "false")]).export_enabled);
    }

    #[test]
    fn test_log_settings() {
        let config = config(&[(RUST_LOG, "nese_provisioner=debug"), (RUST_LOG_FORMAT, "json")]);
        assert_eq!(config.log_filter, "nese_provisioner=debug");
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
