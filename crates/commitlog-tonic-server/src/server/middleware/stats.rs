use super::{
    observe::{CallObservation, Observer},
    tags::CallTags,
};
use crate::server::telemetry::{
    decrement_calls_inflight, increment_call_errors, increment_calls, increment_calls_inflight,
    record_call_duration,
};
use http::Request;
use tokio::time::Instant;
use tonic::Code;
use tracing::Span;

/// Records call counts, in-flight calls, errors, and durations per method.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallStats;

impl Observer for CallStats {
    fn begin<B>(&self, request: &Request<B>) -> CallObservation {
        let tags = CallTags::of(request);
        increment_calls(&tags.method);
        increment_calls_inflight(&tags.method);

        let start = Instant::now();
        CallObservation::new(Span::none(), move |code| {
            decrement_calls_inflight(&tags.method);
            record_call_duration(&tags.method, start.elapsed().as_secs_f64() * 1000.0);
            if code != Code::Ok {
                increment_call_errors(&tags.method, code);
            }
        })
    }
}
