use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised while wiring a service up, before it serves traffic.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to install trace pipeline: {0}")]
    TracePipeline(#[from] opentelemetry::trace::TraceError),

    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to install log subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),

    #[error("failed to build peer http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
