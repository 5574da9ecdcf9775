use std::net::SocketAddr;

use clap::Parser;
use tonic::transport::Server;
use tracing::info;

use trace_relay::calculator::{grpc_request_span, CalculatorPeer, CalculatorService};
use trace_relay::config::CalculatorArgs;
use trace_relay::{pb, Telemetry, TracePropagation};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CalculatorArgs::parse();
    let telemetry = Telemetry::init(args.telemetry.clone().into_config("calculator"))?;

    let propagation = TracePropagation::new();
    let peer = CalculatorPeer::new(args.peer_template(), propagation.clone())
        .with_timeout(args.forward_timeout());
    let service = CalculatorService::new(peer, propagation.clone());

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(pb::FILE_DESCRIPTOR_SET)
        .build()?;

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(%addr, peer_template = %args.peer_template, "calculator gRPC server started");

    Server::builder()
        .trace_fn(move |request| grpc_request_span(&propagation, request))
        .add_service(reflection)
        .add_service(service.into_server())
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    telemetry.shutdown();
    Ok(())
}
