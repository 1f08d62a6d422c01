//! Logging and OpenTelemetry initialization
//!
//! Sets up tracing with optional OTLP export, JSON or human-readable
//! console output and optional rotating file output. Returns a guard that
//! must stay alive for the process duration so buffered spans and file
//! writes are flushed on shutdown.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{Sampler, TracerProvider},
    Resource,
};
use std::fs;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

pub struct TelemetryGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        shutdown_telemetry();
    }
}

pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<TelemetryGuard> {
    let mut otel_init_error: Option<String> = None;
    let tracer_provider = if config.opentelemetry_enabled {
        match init_tracer_provider(config) {
            Ok(provider) => Some(provider),
            Err(e) => {
                otel_init_error = Some(e.to_string());
                None
            }
        }
    } else {
        None
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Keep sqlx/hyper noise down unless RUST_LOG overrides.
        EnvFilter::new(format!(
            "setu={},tower_http=info,sqlx=warn,hyper=warn,reqwest=warn",
            config.level
        ))
    });

    let file_guard = if let Some(provider) = &tracer_provider {
        let tracer = provider.tracer("setu-server");
        let otel_layer = tracing_opentelemetry::layer()
            .with_tracer(tracer)
            .with_tracked_inactivity(true);
        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(otel_layer);
        init_output_layers(subscriber, config)?
    } else {
        let subscriber = tracing_subscriber::registry().with(env_filter);
        init_output_layers(subscriber, config)?
    };

    if let Some(provider) = tracer_provider {
        global::set_tracer_provider(provider);
    }

    if let Some(err) = otel_init_error {
        tracing::warn!(error = %err, "OpenTelemetry init failed, continuing without export");
    }

    tracing::info!(
        otel_enabled = config.opentelemetry_enabled,
        service_name = %config.service_name,
        environment = %config.deployment_environment,
        "Logging initialized"
    );

    Ok(TelemetryGuard {
        _file_guard: file_guard,
    })
}

fn init_tracer_provider(config: &LoggingConfig) -> anyhow::Result<TracerProvider> {
    use opentelemetry_sdk::trace::Config;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(&config.otlp_endpoint)
        .with_timeout(Duration::from_secs(config.otlp_timeout_seconds))
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to create OTLP exporter: {e}"))?;

    let sampler = if config.trace_sample_ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if config.trace_sample_ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            config.trace_sample_ratio,
        )))
    };

    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new(
            "deployment.environment",
            config.deployment_environment.clone(),
        ),
    ]);

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_config(Config::default().with_sampler(sampler).with_resource(resource))
        .build();

    Ok(provider)
}

fn init_output_layers<S>(
    subscriber: S,
    config: &LoggingConfig,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>>
where
    S: SubscriberExt + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    let file_output = if config.file_enabled {
        fs::create_dir_all(&config.file_directory)?;
        let appender = match config.file_rotation.as_str() {
            "hourly" => tracing_appender::rolling::hourly(&config.file_directory, &config.file_prefix),
            "never" => tracing_appender::rolling::never(
                &config.file_directory,
                format!("{}.log", config.file_prefix),
            ),
            _ => tracing_appender::rolling::daily(&config.file_directory, &config.file_prefix),
        };
        Some(tracing_appender::non_blocking(appender))
    } else {
        None
    };

    if config.json {
        let console = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(std::io::stdout);
        match file_output {
            Some((writer, guard)) => {
                let file = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(writer);
                subscriber.with(console).with(file).init();
                Ok(Some(guard))
            }
            None => {
                subscriber.with(console).init();
                Ok(None)
            }
        }
    } else {
        let console = fmt::layer().with_target(true).with_writer(std::io::stdout);
        match file_output {
            Some((writer, guard)) => {
                let file = fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(writer);
                subscriber.with(console).with(file).init();
                Ok(Some(guard))
            }
            None => {
                subscriber.with(console).init();
                Ok(None)
            }
        }
    }
}

pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}
