//! OpenTelemetry wiring for the executor process.
//!
//! Every guard decision and dispatch is a `tracing` event; this module turns those
//! events into OTLP spans when an endpoint is configured, and falls back to plain
//! console logging otherwise.
//!
//! Configuration via environment variables:
//! - `OTEL_SERVICE_NAME`
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`
//! - `OTEL_TRACES_SAMPLER_ARG` (0.0–1.0)

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Telemetry configuration, created manually or via `from_env()`.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every span's `service.name` resource attribute.
    pub service_name: String,
    /// OTLP collector endpoint, e.g. "http://localhost:4317" (gRPC). `None` disables
    /// OTLP export and keeps console logging only.
    pub otlp_endpoint: Option<String>,
    /// Trace sampling ratio in [0.0, 1.0].
    pub sampling_ratio: f64,
    pub enable_console_logging: bool,
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "sterling-executor".to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }

        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            config.otlp_endpoint = Some(endpoint);
        }

        if let Ok(ratio) = std::env::var("OTEL_TRACES_SAMPLER_ARG") {
            if let Ok(r) = ratio.parse::<f64>() {
                config.sampling_ratio = r.clamp(0.0, 1.0);
            }
        }

        config
    }
}

/// Sets up `tracing-subscriber` with an OTLP layer when an endpoint is configured,
/// plain console logging otherwise. Must be paired with `shutdown_telemetry` so the
/// batch exporter flushes before process exit.
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<Option<Tracer>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(endpoint) = &config.otlp_endpoint {
        let tracer = init_otlp_tracer(&config.service_name, endpoint, config.sampling_ratio)?;
        let telemetry_layer = OpenTelemetryLayer::new(tracer.clone());

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(telemetry_layer);

        if config.enable_console_logging {
            subscriber
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        } else {
            subscriber.init();
        }

        tracing::info!(
            service_name = %config.service_name,
            endpoint = %endpoint,
            sampling_ratio = config.sampling_ratio,
            "telemetry initialized with OTLP export"
        );

        Ok(Some(tracer))
    } else {
        let subscriber = tracing_subscriber::registry().with(env_filter);

        if config.enable_console_logging {
            subscriber
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        } else {
            subscriber.init();
        }

        tracing::info!("telemetry initialized (console only, no OTLP)");
        Ok(None)
    }
}

fn init_otlp_tracer(
    service_name: &str,
    endpoint: &str,
    sampling_ratio: f64,
) -> anyhow::Result<Tracer> {
    let sampler = if sampling_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if sampling_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(sampling_ratio)
    };

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .build_span_exporter()?,
            Tokio,
        )
        .with_config(
            sdktrace::Config::default()
                .with_sampler(sampler)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    service_name.to_string(),
                )])),
        )
        .build();

    let tracer = tracer_provider.tracer(service_name.to_string());
    global::set_tracer_provider(tracer_provider);

    Ok(tracer)
}

/// Flushes pending spans. Must be called before process exit or the batch
/// exporter's in-memory queue is lost.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
    tracing::info!("telemetry shut down");
}

/// Span-attribute helpers for instrumenting a single executor tick.
#[allow(dead_code)]
pub mod instrumentation {
    use std::time::Instant;

    /// Tracks one guard-pipeline pass over a step, for span attributes.
    #[derive(Debug)]
    pub struct TickSpanContext {
        pub task_id: String,
        pub step_id: String,
        pub leaf: String,
        pub start_time: Instant,
        pub outcome: Option<String>,
        pub duration_ms: Option<u64>,
    }

    impl TickSpanContext {
        pub fn new(task_id: &str, step_id: &str, leaf: &str) -> Self {
            Self {
                task_id: task_id.to_string(),
                step_id: step_id.to_string(),
                leaf: leaf.to_string(),
                start_time: Instant::now(),
                outcome: None,
                duration_ms: None,
            }
        }

        pub fn finish(&mut self, outcome: &str) {
            self.outcome = Some(outcome.to_string());
            self.duration_ms = Some(self.start_time.elapsed().as_millis() as u64);
        }

        pub fn attributes(&self) -> Vec<(&'static str, String)> {
            let mut attrs = vec![
                ("task.id", self.task_id.clone()),
                ("step.id", self.step_id.clone()),
                ("step.leaf", self.leaf.clone()),
            ];

            if let Some(outcome) = &self.outcome {
                attrs.push(("tick.outcome", outcome.clone()));
            }

            if let Some(duration) = self.duration_ms {
                attrs.push(("tick.duration_ms", duration.to_string()));
            }

            attrs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_uses_executor_service_name() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "sterling-executor");
        assert!(config.otlp_endpoint.is_none());
        assert_eq!(config.sampling_ratio, 1.0);
        assert!(config.enable_console_logging);
    }

    #[test]
    fn tick_span_context_tracks_outcome_and_duration() {
        use instrumentation::TickSpanContext;

        let mut ctx = TickSpanContext::new("task-1", "step-1", "craft_recipe");
        assert!(ctx.outcome.is_none());

        ctx.finish("dispatched");

        assert_eq!(ctx.outcome, Some("dispatched".to_string()));
        assert!(ctx.duration_ms.is_some());
    }

    #[test]
    fn tick_span_attributes_include_task_and_leaf() {
        use instrumentation::TickSpanContext;

        let mut ctx = TickSpanContext::new("task-2", "step-3", "acquire_material");
        ctx.finish("blocked");

        let attrs = ctx.attributes();
        assert!(attrs.iter().any(|(k, v)| *k == "task.id" && v == "task-2"));
        assert!(attrs
            .iter()
            .any(|(k, v)| *k == "step.leaf" && v == "acquire_material"));
        assert!(attrs
            .iter()
            .any(|(k, v)| *k == "tick.outcome" && v == "blocked"));
    }
}
