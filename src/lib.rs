//! Demonstration services that forward a request at most one hop to a named
//! peer while keeping every hop under the caller's trace.
//!
//! * [`calculator`]: gRPC arithmetic service.
//! * [`bookstore`]: HTTP book list service.
//! * [`forward`]: the single-hop delegation both are built on.
//! * [`propagation`]: W3C trace-context extraction and injection.

pub mod pb {
    tonic::include_proto!("calculator");

    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("calculator_descriptor");
}

pub mod bookstore;
pub mod calculator;
pub mod config;
pub mod error;
pub mod forward;
pub mod propagation;
pub mod telemetry;

pub use error::{Error, Result};
pub use propagation::{TracePropagation, TraceToken};
pub use telemetry::{Telemetry, TelemetryConfig};
