mod common;

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::{http::HeaderMap, http::StatusCode, routing::get, Router};

use common::{spawn_bookstore, spawn_bookstore_with, spawn_http, TRACEPARENT};
use trace_relay::bookstore::{default_catalog, Book, APPENDED_TITLE};

async fn get_books(url: String) -> (reqwest::StatusCode, Vec<u8>) {
    let response = reqwest::Client::new()
        .get(url)
        .header("traceparent", TRACEPARENT)
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.bytes().await.unwrap().to_vec())
}

/// Propagation headers a peer saw on one call.
#[derive(Clone, Debug, PartialEq)]
struct Seen {
    traceparent: Option<String>,
    baggage: Option<String>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Stub peer serving a fixed list and recording inbound propagation headers.
fn recording_peer(seen: Arc<Mutex<Vec<Seen>>>) -> Router {
    Router::new().route(
        "/books",
        get(move |headers: HeaderMap| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(Seen {
                    traceparent: header(&headers, "traceparent"),
                    baggage: header(&headers, "baggage"),
                });
                axum::Json(vec![Book::new("The Rust Programming Language")])
            }
        }),
    )
}

#[tokio::test]
async fn lists_local_books() {
    let store = spawn_bookstore();

    let (status, body) = get_books(format!("http://{store}/books")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let books: Vec<Book> = serde_json::from_slice(&body).unwrap();
    assert_eq!(books, default_catalog());
}

#[tokio::test]
async fn relays_peer_list_with_one_appended_entry() {
    let peer = spawn_bookstore();
    let store = spawn_bookstore();

    for url in [
        format!("http://{store}/books/from?target={peer}"),
        format!("http://{store}/books/from/{peer}"),
    ] {
        let (status, body) = get_books(url).await;
        assert_eq!(status, reqwest::StatusCode::OK);

        let books: Vec<Book> = serde_json::from_slice(&body).unwrap();
        let mut expected = default_catalog();
        assert_eq!(books.len(), expected.len() + 1);
        expected.push(Book::new(APPENDED_TITLE));
        assert_eq!(books, expected);
    }
}

#[tokio::test]
async fn peer_receives_caller_trace() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let peer = spawn_http(recording_peer(seen.clone()));
    let store = spawn_bookstore();

    let (status, body) = get_books(format!("http://{store}/books/from?target={peer}")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let books: Vec<Book> = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        books,
        vec![
            Book::new("The Rust Programming Language"),
            Book::new(APPENDED_TITLE)
        ]
    );

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Seen {
            traceparent: Some(TRACEPARENT.to_owned()),
            baggage: Some("username=donuts".to_owned()),
        }]
    );
}

#[tokio::test]
async fn repeated_target_forwards_to_the_first() {
    let peer = spawn_bookstore();
    let store = spawn_bookstore();
    let nowhere = common::closed_addr().await;

    let (status, body) =
        get_books(format!("http://{store}/books/from?target={peer}&target={nowhere}")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let books: Vec<Book> = serde_json::from_slice(&body).unwrap();
    assert_eq!(books.len(), default_catalog().len() + 1);
}

#[tokio::test]
async fn query_without_target_is_bad_request_with_empty_body() {
    let store = spawn_bookstore();

    for query in ["?target=", "?other=peer", "?target"] {
        let (status, body) = get_books(format!("http://{store}/books/from{query}")).await;
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST, "{query}");
        assert!(body.is_empty(), "{query}");
    }
}

#[tokio::test]
async fn null_peer_list_relays_only_the_appended_entry() {
    let peer = spawn_http(Router::new().route(
        "/books",
        get(|| async { ([("content-type", "application/json")], "null") }),
    ));
    let store = spawn_bookstore();

    let (status, body) = get_books(format!("http://{store}/books/from?target={peer}")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let books: Vec<Book> = serde_json::from_slice(&body).unwrap();
    assert_eq!(books, vec![Book::new(APPENDED_TITLE)]);
}

#[tokio::test]
async fn untitled_peer_entries_relay_with_empty_titles() {
    let peer = spawn_http(Router::new().route("/books", get(|| async { "[{}]" })));
    let store = spawn_bookstore();

    let (status, body) = get_books(format!("http://{store}/books/from?target={peer}")).await;
    assert_eq!(status, reqwest::StatusCode::OK);
    let books: Vec<Book> = serde_json::from_slice(&body).unwrap();
    assert_eq!(books, vec![Book::new(""), Book::new(APPENDED_TITLE)]);
}

#[tokio::test]
async fn hung_peer_times_out_as_bad_gateway() {
    let peer = spawn_http(Router::new().route(
        "/books",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "[]"
        }),
    ));
    let store = spawn_bookstore_with(Some(Duration::from_millis(200)));

    let started = Instant::now();
    let (status, body) = get_books(format!("http://{store}/books/from?target={peer}")).await;
    assert_eq!(status, reqwest::StatusCode::BAD_GATEWAY);
    assert!(body.is_empty());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn missing_target_is_bad_request_with_empty_body() {
    let store = spawn_bookstore();

    let (status, body) = get_books(format!("http://{store}/books/from")).await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert!(body.is_empty());
}

#[tokio::test]
async fn unreachable_peer_is_bad_gateway() {
    let store = spawn_bookstore();
    let nowhere = common::closed_addr().await;

    let (status, body) = get_books(format!("http://{store}/books/from?target={nowhere}")).await;
    assert_eq!(status, reqwest::StatusCode::BAD_GATEWAY);
    assert!(body.is_empty());
}

#[tokio::test]
async fn failing_peer_is_bad_gateway() {
    let peer = spawn_http(Router::new().route(
        "/books",
        get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    ));
    let store = spawn_bookstore();

    let (status, body) = get_books(format!("http://{store}/books/from?target={peer}")).await;
    assert_eq!(status, reqwest::StatusCode::BAD_GATEWAY);
    assert!(body.is_empty());
}

#[tokio::test]
async fn malformed_peer_body_is_internal_error() {
    let peer = spawn_http(Router::new().route("/books", get(|| async { "not a book list" })));
    let store = spawn_bookstore();

    let (status, body) = get_books(format!("http://{store}/books/from?target={peer}")).await;
    assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());
}
