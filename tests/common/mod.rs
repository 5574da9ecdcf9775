#![allow(dead_code)]

use std::{net::SocketAddr, time::Duration};

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};

use trace_relay::bookstore::{self, BookstoreConfig, BookstoreState};
use trace_relay::calculator::{CalculatorPeer, CalculatorService};
use trace_relay::forward::PeerTemplate;
use trace_relay::pb::calculator_client::CalculatorClient;
use trace_relay::pb::calculator_server::{Calculator, CalculatorServer};
use trace_relay::TracePropagation;

pub const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

/// Peers are addressed by their `host:port`, so tests can forward to any
/// server they spawned.
pub const LOCAL_TEMPLATE: &str = "http://{target}";

/// An address nothing listens on: bound, then released.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub async fn spawn_grpc<S: Calculator>(service: S) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        Server::builder()
            .add_service(CalculatorServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });
    addr
}

pub async fn spawn_calculator() -> SocketAddr {
    spawn_calculator_with(None).await
}

pub async fn spawn_calculator_with(forward_timeout: Option<Duration>) -> SocketAddr {
    let propagation = TracePropagation::new();
    let peer = CalculatorPeer::new(PeerTemplate::new(LOCAL_TEMPLATE), propagation.clone())
        .with_timeout(forward_timeout);
    spawn_grpc(CalculatorService::new(peer, propagation)).await
}

pub async fn calculator_client(addr: SocketAddr) -> CalculatorClient<Channel> {
    CalculatorClient::connect(format!("http://{addr}")).await.unwrap()
}

pub fn spawn_http(router: axum::Router) -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(router.into_make_service());
    tokio::spawn(async move { server.await.unwrap() });
    addr
}

pub fn spawn_bookstore() -> SocketAddr {
    spawn_bookstore_with(None)
}

pub fn spawn_bookstore_with(forward_timeout: Option<Duration>) -> SocketAddr {
    let config = BookstoreConfig {
        peer_template: PeerTemplate::new("http://{target}/books"),
        forward_timeout,
        ..BookstoreConfig::default()
    };
    let state = BookstoreState::new(config, TracePropagation::new()).unwrap();
    spawn_http(bookstore::router(state))
}
