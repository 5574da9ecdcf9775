use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use opentelemetry::{baggage::BaggageExt, KeyValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, info_span, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::config::DEFAULT_BOOKSTORE_PEER_TEMPLATE;
use crate::forward::{forward_or_local, Forwardable, Peer, PeerTemplate};
use crate::propagation::{TracePropagation, TraceToken};

/// Entry appended to every list relayed from a peer.
pub const APPENDED_TITLE: &str = "Go Go Go";

/// Baggage entry attached to every outbound peer call, next to the caller's
/// unchanged trace context.
pub const PEER_BAGGAGE: (&str, &str) = ("username", "donuts");

/// A book list entry. A peer entry without a title reads as an empty one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    #[serde(default)]
    pub title: String,
}

impl Book {
    pub fn new(title: impl Into<String>) -> Book {
        Book {
            title: title.into(),
        }
    }
}

pub fn default_catalog() -> Vec<Book> {
    vec![
        Book::new("Mastering Concurrency in Go"),
        Book::new("Go Design Patterns"),
        Book::new("Black Hat Go"),
    ]
}

#[derive(Debug, Error)]
pub enum BookstoreError {
    #[error("target not specified")]
    MissingTarget,

    #[error("peer {target} unreachable: {source}")]
    PeerUnavailable {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("peer {target} answered {status}")]
    PeerStatus {
        target: String,
        status: reqwest::StatusCode,
    },

    #[error("peer {target} sent a malformed book list: {source}")]
    MalformedBody {
        target: String,
        #[source]
        source: serde_json::Error,
    },
}

impl BookstoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            BookstoreError::MissingTarget => StatusCode::BAD_REQUEST,
            BookstoreError::PeerUnavailable { .. } | BookstoreError::PeerStatus { .. } => {
                StatusCode::BAD_GATEWAY
            }
            BookstoreError::MalformedBody { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BookstoreError {
    /// Status only; failures never carry a body.
    fn into_response(self) -> Response {
        warn!(error = %self, "books request failed");
        self.status().into_response()
    }
}

#[derive(Clone, Debug)]
pub struct BookstoreConfig {
    pub catalog: Vec<Book>,
    pub appended_title: String,
    pub peer_template: PeerTemplate,
    pub forward_timeout: Option<Duration>,
}

impl Default for BookstoreConfig {
    fn default() -> Self {
        BookstoreConfig {
            catalog: default_catalog(),
            appended_title: APPENDED_TITLE.to_owned(),
            peer_template: PeerTemplate::new(DEFAULT_BOOKSTORE_PEER_TEMPLATE),
            forward_timeout: None,
        }
    }
}

/// A request for a book list, delegated when `forward` names a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BooksRequest {
    pub forward: String,
}

impl Forwardable for BooksRequest {
    fn forward_target(&self) -> &str {
        &self.forward
    }

    fn clear_forward(&mut self) {
        self.forward.clear();
    }
}

/// Fetches a peer's `/books` over plain HTTP, one connection per call.
#[derive(Clone, Debug)]
pub struct BookstorePeer {
    client: reqwest::Client,
    template: PeerTemplate,
    propagation: TracePropagation,
}

impl BookstorePeer {
    pub fn new(
        template: PeerTemplate,
        propagation: TracePropagation,
        timeout: Option<Duration>,
    ) -> Result<BookstorePeer, reqwest::Error> {
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(0);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(BookstorePeer {
            client: builder.build()?,
            template,
            propagation,
        })
    }
}

#[tonic::async_trait]
impl Peer<BooksRequest> for BookstorePeer {
    type Output = Vec<Book>;
    type Error = BookstoreError;

    async fn call(
        &self,
        target: &str,
        _request: BooksRequest,
        trace: &TraceToken,
    ) -> Result<Vec<Book>, BookstoreError> {
        let url = self.template.resolve(target);
        let (key, value) = PEER_BAGGAGE;
        let outbound = TraceToken::from_context(
            trace
                .context()
                .with_baggage(vec![KeyValue::new(key, value)]),
        );
        let mut headers = HeaderMap::new();
        self.propagation.inject_headers(&outbound, &mut headers);

        let unavailable = |source: reqwest::Error| BookstoreError::PeerUnavailable {
            target: target.to_owned(),
            source,
        };
        info!(%url, "sending request");
        let response = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(BookstoreError::PeerStatus {
                target: target.to_owned(),
                status,
            });
        }

        // A `null` list is an empty one.
        let body = response.bytes().await.map_err(unavailable)?;
        serde_json::from_slice::<Option<Vec<Book>>>(&body)
            .map(Option::unwrap_or_default)
            .map_err(|source| BookstoreError::MalformedBody {
                target: target.to_owned(),
                source,
            })
    }
}

#[derive(Clone)]
pub struct BookstoreState {
    catalog: Arc<[Book]>,
    appended: Book,
    peer: BookstorePeer,
    propagation: TracePropagation,
}

impl BookstoreState {
    pub fn new(config: BookstoreConfig, propagation: TracePropagation) -> crate::Result<BookstoreState> {
        let peer = BookstorePeer::new(
            config.peer_template,
            propagation.clone(),
            config.forward_timeout,
        )?;
        Ok(BookstoreState {
            catalog: config.catalog.into(),
            appended: Book::new(config.appended_title),
            peer,
            propagation,
        })
    }
}

/// `GET /books`, `GET /books/from?target=<host>` and `GET /books/from/<host>`.
pub fn router(state: BookstoreState) -> Router {
    let propagation = state.propagation.clone();
    let trace_layer = TraceLayer::new_for_http().make_span_with(move |request: &http::Request<Body>| {
        let span = info_span!(
            "http request",
            http.method = %request.method(),
            http.path = %request.uri().path(),
        );
        span.set_parent(propagation.extract_headers(request.headers()).into_context());
        span
    });

    Router::new()
        .route("/books", get(list_books))
        .route("/books/from", get(books_from_query))
        .route("/books/from/:target", get(books_from_path))
        .layer(ServiceBuilder::new().layer(trace_layer))
        .with_state(state)
}

async fn list_books(
    State(state): State<BookstoreState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Book>>, BookstoreError> {
    log_headers("/books", &headers);
    let trace = state.propagation.extract_headers(&headers);
    info!(trace_parent = %trace, "listing local catalog");

    let books = fetch_books(&state, &trace, String::new()).await?;
    Ok(Json(books))
}

/// Repeated `target`s resolve to the first one; a query that cannot be read
/// names no target.
async fn books_from_query(
    State(state): State<BookstoreState>,
    headers: HeaderMap,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Result<Json<Vec<Book>>, BookstoreError> {
    let target = query
        .ok()
        .and_then(|Query(pairs)| {
            pairs
                .into_iter()
                .find_map(|(key, value)| (key == "target").then_some(value))
        })
        .unwrap_or_default();
    books_from(&state, &headers, target).await
}

async fn books_from_path(
    State(state): State<BookstoreState>,
    headers: HeaderMap,
    Path(target): Path<String>,
) -> Result<Json<Vec<Book>>, BookstoreError> {
    books_from(&state, &headers, target).await
}

async fn books_from(
    state: &BookstoreState,
    headers: &HeaderMap,
    target: String,
) -> Result<Json<Vec<Book>>, BookstoreError> {
    log_headers("/books/from", headers);
    if target.is_empty() {
        return Err(BookstoreError::MissingTarget);
    }
    let trace = state.propagation.extract_headers(headers);
    info!(trace_parent = %trace, %target, "fetching books from peer");

    let mut books = fetch_books(state, &trace, target).await?;
    books.push(state.appended.clone());
    Ok(Json(books))
}

/// The local catalog, or the peer's list when `target` is set.
async fn fetch_books(
    state: &BookstoreState,
    trace: &TraceToken,
    target: String,
) -> Result<Vec<Book>, BookstoreError> {
    let request = BooksRequest { forward: target };
    forward_or_local(&state.peer, trace, request, |_| Ok(state.catalog.to_vec())).await
}

fn log_headers(endpoint: &str, headers: &HeaderMap) {
    for (name, value) in headers {
        debug!(endpoint, header = %name, value = ?value, "request header");
    }
}
