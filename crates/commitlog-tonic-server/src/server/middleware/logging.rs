use super::{
    observe::{CallObservation, Observer},
    tags::CallTags,
};
use http::Request;
use tokio::time::Instant;
use tonic::Code;
use tracing::{Level, field};

/// Opens the `grpc.call` span and logs one entry when the call completes.
///
/// Later stages record into the span: the authentication stage fills in
/// `subject`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallLogger;

impl Observer for CallLogger {
    fn begin<B>(&self, request: &Request<B>) -> CallObservation {
        let tags = CallTags::of(request);
        let span = tracing::info_span!(
            "grpc.call",
            otel.name = %tags.full_method(),
            otel.kind = "server",
            rpc.system = "grpc",
            rpc.service = %tags.service,
            rpc.method = %tags.method,
            request_id = %tags.request_id,
            peer = field::Empty,
            subject = field::Empty,
        );
        if let Some(peer) = tags.peer {
            span.record("peer", field::display(peer));
        }

        let start = Instant::now();
        let call_span = span.clone();
        CallObservation::new(span, move |code| {
            let _entered = call_span.enter();
            let time_ns = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
            let level = code_to_level(code);
            if level == Level::ERROR {
                tracing::error!(grpc.code = ?code, grpc.time_ns = time_ns, "finished call");
            } else if level == Level::WARN {
                tracing::warn!(grpc.code = ?code, grpc.time_ns = time_ns, "finished call");
            } else {
                tracing::info!(grpc.code = ?code, grpc.time_ns = time_ns, "finished call");
            }
        })
    }
}

/// Log level for a call that completed with `code`.
pub const fn code_to_level(code: Code) -> Level {
    match code {
        Code::Ok
        | Code::Cancelled
        | Code::InvalidArgument
        | Code::NotFound
        | Code::AlreadyExists
        | Code::Unauthenticated => Level::INFO,
        Code::DeadlineExceeded
        | Code::PermissionDenied
        | Code::ResourceExhausted
        | Code::FailedPrecondition
        | Code::Aborted
        | Code::OutOfRange
        | Code::Unavailable => Level::WARN,
        Code::Unknown | Code::Unimplemented | Code::Internal | Code::DataLoss => Level::ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_side_outcomes_log_at_info() {
        for code in [
            Code::Ok,
            Code::Cancelled,
            Code::InvalidArgument,
            Code::NotFound,
            Code::AlreadyExists,
            Code::Unauthenticated,
        ] {
            assert_eq!(code_to_level(code), Level::INFO, "{code:?}");
        }
    }

    #[test]
    fn refusals_log_at_warn() {
        for code in [
            Code::DeadlineExceeded,
            Code::PermissionDenied,
            Code::ResourceExhausted,
            Code::FailedPrecondition,
            Code::Aborted,
            Code::OutOfRange,
            Code::Unavailable,
        ] {
            assert_eq!(code_to_level(code), Level::WARN, "{code:?}");
        }
    }

    #[test]
    fn server_faults_log_at_error() {
        for code in [
            Code::Unknown,
            Code::Unimplemented,
            Code::Internal,
            Code::DataLoss,
        ] {
            assert_eq!(code_to_level(code), Level::ERROR, "{code:?}");
        }
    }
}
