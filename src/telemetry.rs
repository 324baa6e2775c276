//! Structured logging plus, when `OTEL_EXPORTER_OTLP_*` is configured, an
//! OTLP span exporter for the connection- and request-scoped
//! `#[instrument]` spans on the RPC handlers and chain reconciler tasks.
//!
//! Grounded on the teacher's `telemetry.rs`. Unlike the teacher, this only
//! wires a tracer provider, not a meter provider: broker balances,
//! connection counts, and RPC volume are already exported as a direct
//! Prometheus endpoint by [`crate::metrics::Metrics`], so a second,
//! OTLP-metrics pipeline would just duplicate that exposition rather than
//! add anything.

use std::env;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::attribute::{DEPLOYMENT_ENVIRONMENT_NAME, SERVICE_VERSION};
use opentelemetry_semantic_conventions::SCHEMA_URL;
use serde::{Deserialize, Serialize};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// OTLP transport, selected by `OTEL_EXPORTER_OTLP_PROTOCOL`.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum TelemetryProtocol {
    #[serde(rename = "http/protobuf")]
    HTTP,
    #[serde(rename = "grpc")]
    GRPC,
}

impl TelemetryProtocol {
    /// `None` means OTLP export is not configured at all; the caller
    /// falls back to plain stdout logging in that case.
    fn from_env() -> Option<Self> {
        let configured = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok()
            || env::var("OTEL_EXPORTER_OTLP_HEADERS").is_ok()
            || env::var("OTEL_EXPORTER_OTLP_PROTOCOL").is_ok();
        if !configured {
            return None;
        }
        Some(match env::var("OTEL_EXPORTER_OTLP_PROTOCOL") {
            Ok(proto) if proto == "grpc" => TelemetryProtocol::GRPC,
            _ => TelemetryProtocol::HTTP,
        })
    }
}

fn resource() -> Resource {
    let deployment_env = env::var("DEPLOYMENT_ENV").unwrap_or_else(|_| "develop".to_string());
    Resource::builder()
        .with_service_name("clearnode")
        .with_schema_url(
            [
                KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
                KeyValue::new(DEPLOYMENT_ENVIRONMENT_NAME, deployment_env),
            ],
            SCHEMA_URL,
        )
        .build()
}

fn init_tracer_provider(protocol: TelemetryProtocol) -> SdkTracerProvider {
    let exporter = opentelemetry_otlp::SpanExporter::builder();
    let exporter = match protocol {
        TelemetryProtocol::HTTP => exporter.with_http().build(),
        TelemetryProtocol::GRPC => exporter.with_tonic().build(),
    };
    let exporter = exporter.expect("failed to build OTLP span exporter");

    SdkTracerProvider::builder()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(1.0))))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build()
}

/// Holds the tracer provider so it can be flushed on shutdown; `None` when
/// OTLP export isn't configured and logging is stdout-only.
pub struct Telemetry {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Initializes structured logging from `RUST_LOG` (default `info`),
    /// layering in an OTLP tracer when `OTEL_EXPORTER_OTLP_*` is set.
    pub fn new() -> Self {
        let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match TelemetryProtocol::from_env() {
            Some(protocol) => {
                let tracer_provider = init_tracer_provider(protocol);
                let tracer = tracer_provider.tracer("clearnode");

                tracing_subscriber::registry()
                    .with(filter())
                    .with(tracing_subscriber::fmt::layer())
                    .with(OpenTelemetryLayer::new(tracer))
                    .init();

                tracing::info!(?protocol, "OTLP trace export enabled");
                Self { tracer_provider: Some(tracer_provider) }
            }
            None => {
                tracing_subscriber::registry().with(filter()).with(tracing_subscriber::fmt::layer()).init();
                tracing::info!("OTLP trace export not configured, logging to stdout only");
                Self { tracer_provider: None }
            }
        }
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(tracer_provider) = self.tracer_provider.as_ref() {
            if let Err(err) = tracer_provider.shutdown() {
                eprintln!("failed to shut down OTLP tracer provider: {err:?}");
            }
        }
    }
}
