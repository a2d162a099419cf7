//! Observability sinks for the sarea stack.
//!
//! Two small capability traits — [`Tracer`] and [`Metrics`] — are consumed by
//! every other crate in the workspace. Both ship with no-op implementations so
//! that a caller that wires no backend still runs, plus real backends on
//! `tracing`/`tracing-subscriber` and `prometheus`.

pub mod metrics;
pub mod propagation;
pub mod tracer;
pub mod tracing_setup;

pub use metrics::{Metrics, MetricsError, NoopMetrics, PrometheusMetrics, names, tags};
pub use propagation::{extract_trace_context, inject_trace_context};
pub use tracer::{NoopTracer, SpanHandle, SpanKind, SpanStatus, SubscriberTracer, Tracer};
pub use tracing_setup::{TracingConfig, init_tracing};
