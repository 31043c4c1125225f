//! Request pipeline applied to every gRPC call.
//!
//! Stages run outermost first:
//!
//! 1. [`tags::RequestTagsLayer`] - request id, service/method, peer address.
//! 2. [`logging::CallLogger`] - the `grpc.call` span and a completion entry.
//! 3. [`auth::AuthenticateLayer`] - transport session to [`Subject`].
//! 4. [`stats::CallStats`] - call metrics.
//!
//! Each stage wraps the next as its inner service, so a call rejected by
//! authentication is still logged but never reaches the stats stage or a
//! handler.
//!
//! [`Subject`]: commitlog_tonic_core::types::Subject

pub mod auth;
pub mod logging;
pub mod observe;
pub mod stats;
pub mod tags;

use auth::AuthenticateLayer;
use logging::CallLogger;
use observe::ObserveLayer;
use stats::CallStats;
use tags::RequestTagsLayer;
use tower::{
    ServiceBuilder,
    layer::util::{Identity, Stack},
};

pub type Pipeline = ServiceBuilder<
    Stack<
        ObserveLayer<CallStats>,
        Stack<AuthenticateLayer, Stack<ObserveLayer<CallLogger>, Stack<RequestTagsLayer, Identity>>>,
    >,
>;

/// The full pipeline, ready for `Server::builder().layer(..)`.
pub fn pipeline() -> Pipeline {
    ServiceBuilder::new()
        .layer(RequestTagsLayer)
        .layer(ObserveLayer::new(CallLogger))
        .layer(AuthenticateLayer)
        .layer(ObserveLayer::new(CallStats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::middleware::observe::{grpc_code, tests::Frames};
    use commitlog_tonic_core::types::Subject;
    use http::{Request, Response};
    use std::convert::Infallible;
    use tonic::{Code, transport::server::TcpConnectInfo};
    use tower::ServiceExt;

    #[tokio::test]
    async fn stages_hand_subject_and_tags_to_the_handler() {
        let handler = tower::service_fn(|req: Request<()>| async move {
            let tags = req.extensions().get::<std::sync::Arc<tags::CallTags>>().cloned();
            let subject = req.extensions().get::<Subject>().cloned();
            assert_eq!(tags.unwrap().method, "Produce");
            assert!(subject.unwrap().is_anonymous());
            Ok::<_, Infallible>(Response::new(Frames::default()))
        });
        let svc = pipeline().service(handler);

        let mut request = Request::builder()
            .uri("/log.v1.Log/Produce")
            .body(())
            .unwrap();
        request.extensions_mut().insert(TcpConnectInfo {
            local_addr: None,
            remote_addr: None,
        });
        svc.oneshot(request).await.unwrap();
    }

    #[tokio::test]
    async fn unauthenticated_calls_stop_before_the_handler() {
        let reached = std::sync::Arc::new(portable_atomic::AtomicBool::new(false));
        let flag = std::sync::Arc::clone(&reached);
        let handler = tower::service_fn(move |_req: Request<()>| {
            flag.store(true, portable_atomic::Ordering::Relaxed);
            async move { Ok::<_, Infallible>(Response::new(Frames::default())) }
        });
        let svc = pipeline().service(handler);

        let request = Request::builder()
            .uri("/log.v1.Log/Consume")
            .body(())
            .unwrap();
        let response = svc.oneshot(request).await.unwrap();
        assert_eq!(grpc_code(response.headers()), Some(Code::Unknown));
        assert!(!reached.load(portable_atomic::Ordering::Relaxed));
    }
}
