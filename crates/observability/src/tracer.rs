//! Tracer capability - span creation and lifecycle
//!
//! A [`Tracer`] hands out [`SpanHandle`]s that follow scoped acquisition:
//! dropping the handle closes the span. The engines never depend on a concrete
//! backend; [`NoopTracer`] keeps them fully functional without one.

use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// Role of a span relative to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// Span internal to the process
    Internal,
    /// Outbound request to a remote collaborator
    Client,
    /// Inbound request handled by this process
    Server,
    /// Message published to the bus
    Producer,
    /// Message consumed from the bus
    Consumer,
}

impl SpanKind {
    /// Returns the kind as a lowercase string
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Internal => "internal",
            SpanKind::Client => "client",
            SpanKind::Server => "server",
            SpanKind::Producer => "producer",
            SpanKind::Consumer => "consumer",
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal status of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanStatus {
    /// No status recorded
    #[default]
    Unset,
    /// Operation completed successfully
    Ok,
    /// Operation failed
    Error,
}

impl SpanStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Unset => "unset",
            SpanStatus::Ok => "ok",
            SpanStatus::Error => "error",
        }
    }
}

/// Handle to an open span.
///
/// The span closes when the handle is dropped, on every exit path.
pub trait SpanHandle: Send {
    /// Attaches a key/value tag to the span
    fn add_tag(&mut self, key: &str, value: &str);

    /// Records a point-in-time event within the span
    fn add_event(&mut self, name: &str, tags: &[(&str, &str)]);

    /// Sets the terminal status of the span
    fn set_status(&mut self, status: SpanStatus, description: Option<&str>);

    /// Returns the trace id as a hex string
    fn trace_id(&self) -> String;

    /// Returns the span id as a hex string
    fn span_id(&self) -> String;
}

/// Span factory injected into the engines.
pub trait Tracer: Send + Sync {
    /// Starts a new span; the returned handle closes it on drop
    fn start_span(&self, name: &str, kind: SpanKind) -> Box<dyn SpanHandle>;
}

// ============================================================================
// No-op implementation
// ============================================================================

/// Tracer that discards everything. Default wiring.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

struct NoopSpan;

impl SpanHandle for NoopSpan {
    fn add_tag(&mut self, _key: &str, _value: &str) {}
    fn add_event(&mut self, _name: &str, _tags: &[(&str, &str)]) {}
    fn set_status(&mut self, _status: SpanStatus, _description: Option<&str>) {}
    fn trace_id(&self) -> String {
        String::new()
    }
    fn span_id(&self) -> String {
        String::new()
    }
}

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str, _kind: SpanKind) -> Box<dyn SpanHandle> {
        Box::new(NoopSpan)
    }
}

// ============================================================================
// tracing-subscriber bridge
// ============================================================================

/// Tracer that bridges spans onto the `tracing` ecosystem.
///
/// Span open/close and events become structured `tracing` records carrying the
/// generated trace/span ids, so any installed subscriber (fmt, OTLP exporter,
/// test collector) sees them.
#[derive(Debug, Clone, Default)]
pub struct SubscriberTracer;

impl SubscriberTracer {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

struct SubscriberSpan {
    name: String,
    span: tracing::Span,
    trace_id: String,
    span_id: String,
    status: SpanStatus,
    description: Option<String>,
    started_at: Instant,
}

impl SpanHandle for SubscriberSpan {
    fn add_tag(&mut self, key: &str, value: &str) {
        tracing::debug!(parent: &self.span, tag.key = key, tag.value = value, "span tag");
    }

    fn add_event(&mut self, name: &str, tags: &[(&str, &str)]) {
        tracing::info!(parent: &self.span, event = name, tags = ?tags, "span event");
    }

    fn set_status(&mut self, status: SpanStatus, description: Option<&str>) {
        self.status = status;
        self.description = description.map(str::to_string);
    }

    fn trace_id(&self) -> String {
        self.trace_id.clone()
    }

    fn span_id(&self) -> String {
        self.span_id.clone()
    }
}

impl Drop for SubscriberSpan {
    fn drop(&mut self) {
        let elapsed = self.started_at.elapsed();
        match self.status {
            SpanStatus::Error => tracing::warn!(
                parent: &self.span,
                span = %self.name,
                status = self.status.as_str(),
                description = self.description.as_deref().unwrap_or(""),
                duration_ms = elapsed.as_millis() as u64,
                "span closed"
            ),
            _ => tracing::debug!(
                parent: &self.span,
                span = %self.name,
                status = self.status.as_str(),
                duration_ms = elapsed.as_millis() as u64,
                "span closed"
            ),
        }
    }
}

impl Tracer for SubscriberTracer {
    fn start_span(&self, name: &str, kind: SpanKind) -> Box<dyn SpanHandle> {
        let trace_id = Uuid::new_v4().simple().to_string();
        let span_id = Uuid::new_v4().simple().to_string()[..16].to_string();
        let span = tracing::info_span!(
            "sarea.span",
            span.name = %name,
            span.kind = %kind,
            trace_id = %trace_id,
            span_id = %span_id,
        );
        Box::new(SubscriberSpan {
            name: name.to_string(),
            span,
            trace_id,
            span_id,
            status: SpanStatus::Unset,
            description: None,
            started_at: Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_span_is_inert() {
        let tracer = NoopTracer;
        let mut span = tracer.start_span("test", SpanKind::Internal);
        span.add_tag("k", "v");
        span.add_event("event", &[("a", "b")]);
        span.set_status(SpanStatus::Ok, None);
        assert!(span.trace_id().is_empty());
        assert!(span.span_id().is_empty());
    }

    #[test]
    fn test_subscriber_span_ids_are_unique() {
        let tracer = SubscriberTracer::new();
        let one = tracer.start_span("a", SpanKind::Client);
        let two = tracer.start_span("b", SpanKind::Server);
        assert_ne!(one.trace_id(), two.trace_id());
        assert_ne!(one.span_id(), two.span_id());
        assert_eq!(one.span_id().len(), 16);
        assert_eq!(one.trace_id().len(), 32);
    }

    #[test]
    fn test_span_kind_strings() {
        assert_eq!(SpanKind::Producer.as_str(), "producer");
        assert_eq!(SpanKind::Consumer.as_str(), "consumer");
        assert_eq!(format!("{}", SpanKind::Internal), "internal");
    }

    #[test]
    fn test_span_status_defaults_to_unset() {
        assert_eq!(SpanStatus::default(), SpanStatus::Unset);
    }
}
