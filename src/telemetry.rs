use std::{fs, fs::File, path::PathBuf, sync::Mutex};

use opentelemetry::global::shutdown_tracer_provider;
use opentelemetry::{
    sdk::{
        trace::{self, Sampler},
        Resource,
    },
    trace::TracerProvider as _,
    KeyValue,
};
use opentelemetry_otlp::{self, WithExportConfig};
use tracing_subscriber::{
    filter::EnvFilter, filter::LevelFilter, fmt, fmt::writer::BoxMakeWriter, prelude::*,
};

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// OTLP/gRPC collector, e.g. `http://otel-collector:4317`. Spans are
    /// still created without one, they are just never exported.
    pub otlp_endpoint: Option<String>,
    /// Write logs to `<log_dir>/<service_name>.log` instead of stdout.
    pub log_dir: Option<PathBuf>,
    pub json: bool,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> TelemetryConfig {
        TelemetryConfig {
            service_name: service_name.into(),
            otlp_endpoint: None,
            log_dir: None,
            json: false,
        }
    }
}

/// Owns the process tracing pipeline. Spans are flushed and the tracer
/// provider shut down on [`Telemetry::shutdown`] or drop, whichever is first.
pub struct Telemetry {
    active: bool,
}

impl Telemetry {
    pub fn init(config: TelemetryConfig) -> Result<Telemetry> {
        let tracer = install_tracer(&config)?;

        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy();

        let writer = match &config.log_dir {
            Some(dir) => {
                let path = dir.join(format!("{}.log", config.service_name));
                let log_file = fs::create_dir_all(dir)
                    .and_then(|_| File::create(&path))
                    .map_err(|source| Error::LogFile { path, source })?;
                BoxMakeWriter::new(Mutex::new(log_file))
            }
            None => BoxMakeWriter::new(std::io::stdout),
        };

        let builder = tracing_subscriber::fmt()
            .with_writer(writer)
            .with_env_filter(filter)
            .with_span_events(fmt::format::FmtSpan::NONE);
        if config.json {
            builder
                .json()
                .finish()
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
        } else {
            builder
                .finish()
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()?;
        }

        tracing::info!(
            service = %config.service_name,
            otlp_endpoint = ?config.otlp_endpoint,
            "telemetry initialized"
        );

        Ok(Telemetry { active: true })
    }

    pub fn shutdown(mut self) {
        self.flush();
    }

    fn flush(&mut self) {
        if std::mem::take(&mut self.active) {
            shutdown_tracer_provider();
        }
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        self.flush();
    }
}

fn install_tracer(config: &TelemetryConfig) -> Result<trace::Tracer> {
    let tracer_config = trace::config()
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]));

    match &config.otlp_endpoint {
        Some(endpoint) => {
            let tracer_exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint.as_str());

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(tracer_exporter)
                .with_trace_config(tracer_config)
                .install_batch(opentelemetry::runtime::Tokio)?;
            Ok(tracer)
        }
        None => {
            let provider = trace::TracerProvider::builder()
                .with_config(tracer_config)
                .build();
            let tracer = provider.tracer("trace-relay");
            opentelemetry::global::set_tracer_provider(provider);
            Ok(tracer)
        }
    }
}
