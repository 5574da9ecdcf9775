//! Command-line and environment configuration for the binaries.

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{forward::PeerTemplate, telemetry::TelemetryConfig};

pub const DEFAULT_CALCULATOR_PEER_TEMPLATE: &str = "http://{target}.zk-calc-app.svc.cluster.local:80";
pub const DEFAULT_BOOKSTORE_PEER_TEMPLATE: &str = "http://{target}/books";

#[derive(Args, Clone, Debug)]
pub struct TelemetryArgs {
    /// Name reported as `service.name` on exported spans
    #[arg(long, env = "SERVICE_NAME")]
    pub service_name: Option<String>,

    /// OTLP/gRPC collector endpoint; spans are not exported when unset
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Directory for `<service>.log`; logs go to stdout when unset
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl TelemetryArgs {
    pub fn into_config(self, default_service_name: &str) -> TelemetryConfig {
        TelemetryConfig {
            service_name: self
                .service_name
                .unwrap_or_else(|| default_service_name.to_owned()),
            otlp_endpoint: self.otlp_endpoint,
            log_dir: self.log_dir,
            json: self.log_json,
        }
    }
}

/// gRPC calculator that computes locally or forwards one hop.
#[derive(Parser, Clone, Debug)]
#[command(name = "trace-relay-calculator", version)]
pub struct CalculatorArgs {
    /// Port to listen on
    #[arg(env = "CALCULATOR_PORT", default_value_t = 50051)]
    pub port: u16,

    /// Peer address template; `{target}` is replaced by the forward field
    #[arg(long, env = "CALCULATOR_PEER_TEMPLATE", default_value = DEFAULT_CALCULATOR_PEER_TEMPLATE)]
    pub peer_template: String,

    /// Give up on a forwarded call after this many milliseconds
    #[arg(long, env = "FORWARD_TIMEOUT_MS")]
    pub forward_timeout_ms: Option<u64>,

    #[command(flatten)]
    pub telemetry: TelemetryArgs,
}

impl CalculatorArgs {
    pub fn peer_template(&self) -> PeerTemplate {
        PeerTemplate::new(self.peer_template.clone())
    }

    pub fn forward_timeout(&self) -> Option<Duration> {
        self.forward_timeout_ms.map(Duration::from_millis)
    }
}

/// HTTP bookstore that serves its catalog or a peer's.
#[derive(Parser, Clone, Debug)]
#[command(name = "trace-relay-bookstore", version)]
pub struct BookstoreArgs {
    #[arg(long, env = "BOOKSTORE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Peer URL template; `{target}` is replaced by the requested target
    #[arg(long, env = "BOOKSTORE_PEER_TEMPLATE", default_value = DEFAULT_BOOKSTORE_PEER_TEMPLATE)]
    pub peer_template: String,

    #[arg(long, env = "FORWARD_TIMEOUT_MS")]
    pub forward_timeout_ms: Option<u64>,

    /// Title appended to every list fetched from a peer
    #[arg(long, env = "BOOKSTORE_APPENDED_TITLE", default_value = crate::bookstore::APPENDED_TITLE)]
    pub appended_title: String,

    #[command(flatten)]
    pub telemetry: TelemetryArgs,
}

impl BookstoreArgs {
    pub fn forward_timeout(&self) -> Option<Duration> {
        self.forward_timeout_ms.map(Duration::from_millis)
    }
}

/// Calls one calculator operation under a fresh trace.
#[derive(Parser, Clone, Debug)]
#[command(name = "trace-relay-client", version)]
pub struct ClientArgs {
    /// Calculator to call
    #[arg(long, env = "CALCULATOR_URL", default_value = "http://[::1]:50051")]
    pub server: String,

    /// Ask the server to forward the call to this peer
    #[arg(long, default_value = "")]
    pub forward: String,

    #[command(subcommand)]
    pub operation: ClientOperation,

    #[command(flatten)]
    pub telemetry: TelemetryArgs,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum ClientOperation {
    Add {
        #[arg(allow_negative_numbers = true)]
        a: i32,
        #[arg(allow_negative_numbers = true)]
        b: i32,
    },
    Subtract {
        #[arg(allow_negative_numbers = true)]
        a: i32,
        #[arg(allow_negative_numbers = true)]
        b: i32,
    },
    Divide {
        #[arg(allow_negative_numbers = true)]
        a: i32,
        #[arg(allow_negative_numbers = true)]
        b: i32,
    },
    Restricted {
        #[arg(allow_negative_numbers = true)]
        a: i32,
    },
    /// Fail with the given gRPC status code
    Error { code: u32 },
}
