//! Call observation shared by the logging and stats stages.
//!
//! An [`Observer`] is told when a call starts and receives exactly one
//! completion code when it ends. Completion is the first of:
//!
//! - a `grpc-status` in the response headers (trailers-only responses, e.g.
//!   errors returned before any message),
//! - a `grpc-status` in the trailers, after the last message of a unary or
//!   streaming response,
//! - the response future or body being dropped early, reported as
//!   `Cancelled`.

use http::{HeaderMap, Request, Response};
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::{
    pin::Pin,
    task::{Context, Poll, ready},
};
use tonic::Code;
use tower::{Layer, Service};
use tracing::Span;

const GRPC_STATUS_HEADER: &str = "grpc-status";

/// Extracts the gRPC status code from headers or trailers, if present.
pub fn grpc_code(headers: &HeaderMap) -> Option<Code> {
    headers
        .get(GRPC_STATUS_HEADER)
        .map(|value| Code::from_bytes(value.as_bytes()))
}

type OnFinish = Box<dyn FnOnce(Code) + Send>;

/// What an observer wants to happen for one call.
pub struct CallObservation {
    span: Span,
    on_finish: OnFinish,
}

impl CallObservation {
    /// `span` is entered while the rest of the pipeline handles the call and
    /// while the response body is polled. `on_finish` runs once, with the
    /// call's final code.
    pub fn new(span: Span, on_finish: impl FnOnce(Code) + Send + 'static) -> Self {
        Self {
            span,
            on_finish: Box::new(on_finish),
        }
    }
}

pub trait Observer: Clone {
    fn begin<B>(&self, request: &Request<B>) -> CallObservation;
}

/// Runs the completion callback at most once; dropping an unfinished
/// completion reports `Cancelled`.
#[derive(Default)]
struct Completion(Option<OnFinish>);

impl Completion {
    fn finish(&mut self, code: Code) {
        if let Some(on_finish) = self.0.take() {
            on_finish(code);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.finish(Code::Cancelled);
    }
}

#[derive(Debug, Clone)]
pub struct ObserveLayer<O> {
    observer: O,
}

impl<O> ObserveLayer<O> {
    pub const fn new(observer: O) -> Self {
        Self { observer }
    }
}

impl<S, O: Clone> Layer<S> for ObserveLayer<O> {
    type Service = Observe<S, O>;

    fn layer(&self, inner: S) -> Self::Service {
        Observe {
            inner,
            observer: self.observer.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Observe<S, O> {
    inner: S,
    observer: O,
}

impl<S, O, ReqBody, ResBody> Service<Request<ReqBody>> for Observe<S, O>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    O: Observer,
{
    type Response = Response<ObservedBody<ResBody>>;
    type Error = S::Error;
    type Future = ObserveFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let CallObservation { span, on_finish } = self.observer.begin(&request);
        let inner = {
            let _entered = span.enter();
            self.inner.call(request)
        };
        ObserveFuture {
            inner,
            completion: Completion(Some(on_finish)),
            span,
        }
    }
}

pin_project! {
    pub struct ObserveFuture<F> {
        #[pin]
        inner: F,
        completion: Completion,
        span: Span,
    }
}

impl<F, B, E> Future for ObserveFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<ObservedBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = {
            let _entered = this.span.enter();
            ready!(this.inner.poll(cx))
        };

        let mut completion = core::mem::take(this.completion);
        Poll::Ready(match result {
            Ok(response) => {
                if let Some(code) = grpc_code(response.headers()) {
                    completion.finish(code);
                }
                let span = this.span.clone();
                Ok(response.map(|inner| ObservedBody {
                    inner,
                    completion,
                    span,
                }))
            }
            Err(err) => {
                completion.finish(Code::Internal);
                Err(err)
            }
        })
    }
}

pin_project! {
    /// Response body that reports the call's completion to an observer.
    pub struct ObservedBody<B> {
        #[pin]
        inner: B,
        completion: Completion,
        span: Span,
    }
}

impl<B: Default> Default for ObservedBody<B> {
    fn default() -> Self {
        Self {
            inner: B::default(),
            completion: Completion::default(),
            span: Span::none(),
        }
    }
}

impl<B: Body> Body for ObservedBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let _entered = this.span.enter();
        let polled = this.inner.poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(trailers) = frame.trailers_ref() {
                    this.completion
                        .finish(grpc_code(trailers).unwrap_or(Code::Unknown));
                }
            }
            Poll::Ready(Some(Err(_))) => this.completion.finish(Code::Internal),
            Poll::Ready(None) => this.completion.finish(Code::Unknown),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::Bytes;
    use core::convert::Infallible;
    use http::HeaderValue;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Observer that records every completion code.
    #[derive(Clone, Default)]
    pub(crate) struct Recorder(pub(crate) Arc<Mutex<Vec<Code>>>);

    impl Observer for Recorder {
        fn begin<B>(&self, _request: &Request<B>) -> CallObservation {
            let codes = Arc::clone(&self.0);
            CallObservation::new(Span::none(), move |code| codes.lock().push(code))
        }
    }

    /// Body yielding a fixed list of frames.
    #[derive(Default)]
    pub(crate) struct Frames(pub(crate) VecDeque<Frame<Bytes>>);

    impl Body for Frames {
        type Data = Bytes;
        type Error = Infallible;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
            Poll::Ready(self.0.pop_front().map(Ok))
        }
    }

    fn trailers(code: Code) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(
            GRPC_STATUS_HEADER,
            HeaderValue::from_str(&(code as i32).to_string()).unwrap(),
        );
        map
    }

    async fn drain(mut body: ObservedBody<Frames>) {
        while let Some(frame) =
            futures::future::poll_fn(|cx| Pin::new(&mut body).poll_frame(cx)).await
        {
            frame.unwrap();
        }
    }

    /// Serves `chunks` followed by optional `trailers`, with optional
    /// response headers.
    fn respond(
        chunks: Vec<&'static [u8]>,
        trailers: Option<HeaderMap>,
        headers: Option<HeaderMap>,
    ) -> impl Service<Request<()>, Response = Response<Frames>, Error = Infallible> + Clone {
        tower::service_fn(move |_req: Request<()>| {
            let mut frames: VecDeque<Frame<Bytes>> = chunks
                .iter()
                .copied()
                .map(|chunk| Frame::data(Bytes::from_static(chunk)))
                .collect();
            if let Some(trailers) = trailers.clone() {
                frames.push_back(Frame::trailers(trailers));
            }
            let mut response = Response::new(Frames(frames));
            if let Some(headers) = headers.clone() {
                *response.headers_mut() = headers;
            }
            async move { Ok::<_, Infallible>(response) }
        })
    }

    #[tokio::test]
    async fn completes_from_trailers() {
        let recorder = Recorder::default();
        let svc = ObserveLayer::new(recorder.clone()).layer(respond(
            vec![&b"msg"[..]],
            Some(trailers(Code::Ok)),
            None,
        ));

        let response = svc.oneshot(Request::new(())).await.unwrap();
        assert!(recorder.0.lock().is_empty(), "not complete before body ends");
        drain(response.into_body()).await;
        assert_eq!(*recorder.0.lock(), vec![Code::Ok]);
    }

    #[tokio::test]
    async fn completes_from_trailers_only_response() {
        let recorder = Recorder::default();
        let svc = ObserveLayer::new(recorder.clone())
            .layer(respond(vec![], None, Some(trailers(Code::PermissionDenied))));

        let response = svc.oneshot(Request::new(())).await.unwrap();
        assert_eq!(*recorder.0.lock(), vec![Code::PermissionDenied]);
        drain(response.into_body()).await;
        assert_eq!(recorder.0.lock().len(), 1, "reported exactly once");
    }

    #[tokio::test]
    async fn dropped_body_reports_cancelled() {
        let recorder = Recorder::default();
        let svc =
            ObserveLayer::new(recorder.clone()).layer(respond(vec![&b"msg"[..]], None, None));

        let response = svc.oneshot(Request::new(())).await.unwrap();
        drop(response);
        assert_eq!(*recorder.0.lock(), vec![Code::Cancelled]);
    }

    #[test]
    fn reads_status_codes() {
        assert_eq!(grpc_code(&trailers(Code::OutOfRange)), Some(Code::OutOfRange));
        assert_eq!(grpc_code(&HeaderMap::new()), None);
    }
}
