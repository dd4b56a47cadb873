//! Tracing seam. Distributed-tracing exporter setup is explicitly out of
//! scope; this module only exists so a future exporter has somewhere to
//! attach without threading a concrete tracing crate through the batch
//! writer's flush path.

/// A span recorder the batch writer invokes around a flush. The default
/// implementation does nothing; a real exporter would implement this trait
/// and be handed to `batch::run` in its place.
pub trait SpanRecorder: Send + Sync {
    fn on_flush(&self, shard: usize, len: usize) {
        let _ = (shard, len);
    }
}

/// No-op tracer used when no exporter is configured.
pub struct NullTracer;

impl SpanRecorder for NullTracer {}
