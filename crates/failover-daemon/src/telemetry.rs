//! Log output and optional OpenTelemetry span export.

use crate::config::{OtlpProtocol, TelemetrySettings};
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// OpenTelemetry tracer guard
///
/// When dropped, flushes all pending spans and shuts down the tracer
pub struct TelemetryGuard;

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Build the OTLP tracer provider, or `None` when export is disabled.
fn build_tracer_provider(
    settings: &TelemetrySettings,
) -> Result<Option<TracerProvider>, Box<dyn std::error::Error>> {
    if !settings.enabled {
        return Ok(None);
    }

    let exporter = match settings.protocol {
        OtlpProtocol::Grpc => opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&settings.otlp_endpoint)
            .build()?,
        OtlpProtocol::Http => opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(&settings.otlp_endpoint)
            .build()?,
    };

    let resource = Resource::new(vec![
        KeyValue::new("service.name", settings.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
    ]);

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .build();

    Ok(Some(provider))
}

/// Install the global subscriber: env filter, plain or JSON log lines, and the
/// OpenTelemetry layer when enabled.
///
/// `RUST_LOG` takes precedence over `log_level`. Must be called from within a
/// tokio runtime when telemetry is enabled.
///
/// Keep the returned guard alive for the lifetime of the process.
pub fn setup_tracing(
    settings: &TelemetrySettings,
    log_level: &str,
    json: bool,
) -> Result<Option<TelemetryGuard>, Box<dyn std::error::Error>> {
    let provider = build_tracer_provider(settings)?;

    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer("failover-daemon"))
    });

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    let guard = provider.map(|provider| {
        opentelemetry::global::set_tracer_provider(provider);
        TelemetryGuard
    });

    tracing::info!(
        otel = settings.enabled,
        endpoint = %settings.otlp_endpoint,
        protocol = ?settings.protocol,
        "Tracing initialized"
    );

    Ok(guard)
}
