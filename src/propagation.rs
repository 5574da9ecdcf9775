use std::{collections::HashMap, fmt, sync::Arc};

use opentelemetry::{
    propagation::{Extractor, Injector, TextMapPropagator},
    sdk::propagation::{BaggagePropagator, TextMapCompositePropagator, TraceContextPropagator},
    trace::TraceContextExt,
    Context,
};
use tracing_opentelemetry::OpenTelemetrySpanExt;

const TRACEPARENT: &str = "traceparent";

/// Correlation token read from an inbound call and attached, unchanged, to
/// every outbound call made on its behalf.
#[derive(Clone, Debug)]
pub struct TraceToken {
    cx: Context,
}

impl TraceToken {
    pub fn absent() -> TraceToken {
        TraceToken { cx: Context::new() }
    }

    /// Token of the current `tracing` span, as seen by the OpenTelemetry layer.
    pub fn current() -> TraceToken {
        TraceToken {
            cx: tracing::Span::current().context(),
        }
    }

    pub fn from_context(cx: Context) -> TraceToken {
        TraceToken { cx }
    }

    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn into_context(self) -> Context {
        self.cx
    }

    pub fn is_present(&self) -> bool {
        self.cx.span().span_context().is_valid()
    }

    /// The W3C `traceparent` value this token is written as on the wire.
    pub fn traceparent(&self) -> Option<String> {
        if !self.is_present() {
            return None;
        }
        let mut carrier: HashMap<String, String> = HashMap::new();
        TraceContextPropagator::new().inject_context(&self.cx, &mut carrier);
        carrier.remove(TRACEPARENT)
    }
}

impl fmt::Display for TraceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.traceparent() {
            Some(traceparent) => f.write_str(&traceparent),
            None => f.write_str("absent"),
        }
    }
}

/// Reads and writes trace tokens on gRPC metadata and HTTP headers.
///
/// Constructed once per process and handed to every service that needs it;
/// nothing here touches the global propagator.
#[derive(Clone)]
pub struct TracePropagation {
    propagator: Arc<TextMapCompositePropagator>,
}

impl TracePropagation {
    pub fn new() -> TracePropagation {
        let propagator = TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]);
        TracePropagation {
            propagator: Arc::new(propagator),
        }
    }

    pub fn extract_metadata(&self, metadata: &tonic::metadata::MetadataMap) -> TraceToken {
        TraceToken::from_context(self.propagator.extract(&MetadataExtractor(metadata)))
    }

    pub fn extract_headers(&self, headers: &http::HeaderMap) -> TraceToken {
        TraceToken::from_context(self.propagator.extract(&HeaderExtractor(headers)))
    }

    pub fn inject_metadata(&self, token: &TraceToken, metadata: &mut tonic::metadata::MetadataMap) {
        self.propagator
            .inject_context(token.context(), &mut MetadataInjector(metadata));
    }

    pub fn inject_headers(&self, token: &TraceToken, headers: &mut http::HeaderMap) {
        self.propagator
            .inject_context(token.context(), &mut HeaderInjector(headers));
    }
}

impl Default for TracePropagation {
    fn default() -> Self {
        TracePropagation::new()
    }
}

impl fmt::Debug for TracePropagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracePropagation")
            .field("fields", &self.propagator.fields().collect::<Vec<_>>())
            .finish()
    }
}

/// Writes propagation fields into outbound gRPC metadata. Fields that are not
/// valid ASCII metadata are skipped.
struct MetadataInjector<'a>(&'a mut tonic::metadata::MetadataMap);

impl<'a> Injector for MetadataInjector<'a> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(key) = tonic::metadata::MetadataKey::from_bytes(key.as_bytes()) {
            if let Ok(val) = value.parse::<tonic::metadata::MetadataValue<tonic::metadata::Ascii>>() {
                self.0.insert(key, val);
            }
        }
    }
}

/// Reads propagation fields from inbound gRPC metadata; non-ASCII values read
/// as missing.
struct MetadataExtractor<'a>(&'a tonic::metadata::MetadataMap);

impl<'a> Extractor for MetadataExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|metadata| metadata.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .map(|key| match key {
                tonic::metadata::KeyRef::Ascii(v) => v.as_str(),
                tonic::metadata::KeyRef::Binary(v) => v.as_str(),
            })
            .collect::<Vec<_>>()
    }
}

/// Writes propagation fields into outbound HTTP headers, skipping invalid ones.
struct HeaderInjector<'a>(&'a mut http::HeaderMap);

impl<'a> Injector for HeaderInjector<'a> {
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(val) = http::header::HeaderValue::from_str(&value) {
                self.0.insert(name, val);
            }
        }
    }
}

/// Reads propagation fields from inbound HTTP headers; non-ASCII values read
/// as missing.
struct HeaderExtractor<'a>(&'a http::HeaderMap);

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}
