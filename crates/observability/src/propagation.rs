//! W3C trace context propagation over header maps
//!
//! Correlation ids and `traceparent`/`tracestate` headers travel with every
//! message and HTTP request so that traces stitch across services.

use opentelemetry::Context;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::collections::HashMap;

/// Header carrying the application-level correlation id.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
/// W3C traceparent header.
pub const TRACE_PARENT_HEADER: &str = "traceparent";
/// W3C tracestate header.
pub const TRACE_STATE_HEADER: &str = "tracestate";

/// Returns the W3C trace context propagator.
pub fn w3c_trace_context_propagator() -> impl TextMapPropagator {
    TraceContextPropagator::new()
}

/// Extracts a trace context from header key/value pairs.
pub fn extract_trace_context<'a, I>(headers: I) -> Context
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    let propagator = w3c_trace_context_propagator();
    let carrier = HeaderCarrier::new(headers);
    propagator.extract(&carrier)
}

/// Injects the given trace context into a header map.
pub fn inject_trace_context(context: &Context, headers: &mut HashMap<String, String>) {
    let propagator = w3c_trace_context_propagator();
    propagator.inject_context(context, headers);
}

/// Case-insensitive extractor over borrowed header pairs.
struct HeaderCarrier<'a> {
    headers: Vec<(&'a str, &'a str)>,
}

impl<'a> HeaderCarrier<'a> {
    fn new<I>(headers: I) -> Self
    where
        I: Iterator<Item = (&'a str, &'a str)>,
    {
        Self {
            headers: headers.collect(),
        }
    }
}

impl opentelemetry::propagation::Extractor for HeaderCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| *v)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.iter().map(|(k, _)| *k).collect()
    }
}
