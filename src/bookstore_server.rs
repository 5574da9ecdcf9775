use std::net::SocketAddr;

use clap::Parser;
use tracing::info;

use trace_relay::bookstore::{self, BookstoreConfig, BookstoreState};
use trace_relay::config::BookstoreArgs;
use trace_relay::forward::PeerTemplate;
use trace_relay::{Telemetry, TracePropagation};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = BookstoreArgs::parse();
    let telemetry = Telemetry::init(args.telemetry.clone().into_config("bookstore"))?;

    let config = BookstoreConfig {
        appended_title: args.appended_title.clone(),
        peer_template: PeerTemplate::new(args.peer_template.clone()),
        forward_timeout: args.forward_timeout(),
        ..BookstoreConfig::default()
    };
    let state = BookstoreState::new(config, TracePropagation::new())?;

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(%addr, "bookstore HTTP server started");

    axum::Server::bind(&addr)
        .serve(bookstore::router(state).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    telemetry.shutdown();
    Ok(())
}
