//! Trace sampling policy.
//!
//! Writes are always traced; everything else is sampled by trace-id ratio.
//! The tracer provider wraps [`ProduceAlwaysSampler`] in a parent-based
//! sampler, so the decision applies to root spans and children follow their
//! parent.

/// Spans whose name contains this are always sampled.
pub const ALWAYS_SAMPLED_MARKER: &str = "Produce";

/// Whether a span is sampled regardless of the configured ratio.
pub fn always_sampled(span_name: &str) -> bool {
    span_name.contains(ALWAYS_SAMPLED_MARKER)
}

#[cfg(feature = "tracing")]
pub use sampler::ProduceAlwaysSampler;

#[cfg(feature = "tracing")]
mod sampler {
    use super::always_sampled;
    use opentelemetry::{
        Context, KeyValue,
        trace::{Link, SamplingResult, SpanKind, TraceId},
    };
    use opentelemetry_sdk::trace::{Sampler, ShouldSample};

    #[derive(Debug, Clone)]
    pub struct ProduceAlwaysSampler {
        ratio: Sampler,
    }

    impl ProduceAlwaysSampler {
        /// `ratio` is clamped to `[0, 1]`.
        pub fn new(ratio: f64) -> Self {
            Self {
                ratio: Sampler::TraceIdRatioBased(ratio.clamp(0.0, 1.0)),
            }
        }
    }

    impl ShouldSample for ProduceAlwaysSampler {
        fn should_sample(
            &self,
            parent_context: Option<&Context>,
            trace_id: TraceId,
            name: &str,
            span_kind: &SpanKind,
            attributes: &[KeyValue],
            links: &[Link],
        ) -> SamplingResult {
            if always_sampled(name) {
                Sampler::AlwaysOn.should_sample(
                    parent_context,
                    trace_id,
                    name,
                    span_kind,
                    attributes,
                    links,
                )
            } else {
                self.ratio.should_sample(
                    parent_context,
                    trace_id,
                    name,
                    span_kind,
                    attributes,
                    links,
                )
            }
        }
    }

}
