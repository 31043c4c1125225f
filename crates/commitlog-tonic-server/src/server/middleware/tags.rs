use http::Request;
use std::{
    net::SocketAddr,
    sync::Arc,
    task::{Context, Poll},
};
use tonic::transport::server::{TcpConnectInfo, TlsConnectInfo};
use tower::{Layer, Service};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 128;

/// Per-call metadata shared by the later pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTags {
    pub request_id: String,
    pub service: String,
    pub method: String,
    pub peer: Option<SocketAddr>,
}

impl CallTags {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let (service, method) = split_path(request.uri().path());
        Self {
            request_id: request_id(request),
            service: service.to_owned(),
            method: method.to_owned(),
            peer: peer_addr(request.extensions()),
        }
    }

    /// Tags inserted by [`RequestTagsLayer`], or freshly computed when the
    /// layer is not installed.
    pub fn of<B>(request: &Request<B>) -> Arc<Self> {
        request
            .extensions()
            .get::<Arc<Self>>()
            .cloned()
            .unwrap_or_else(|| Arc::new(Self::from_request(request)))
    }

    /// `package.Service/Method`, the conventional gRPC span name.
    pub fn full_method(&self) -> String {
        format!("{}/{}", self.service, self.method)
    }
}

/// Splits `/package.Service/Method` into its service and method parts.
///
/// Paths that do not have that shape yield an empty service and the whole
/// path (minus the leading slash) as the method.
pub fn split_path(path: &str) -> (&str, &str) {
    let path = path.strip_prefix('/').unwrap_or(path);
    path.split_once('/').unwrap_or(("", path))
}

fn request_id<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map_or_else(|| format!("{:016x}", rand::random::<u64>()), str::to_owned)
}

fn peer_addr(extensions: &http::Extensions) -> Option<SocketAddr> {
    if let Some(info) = extensions.get::<TcpConnectInfo>() {
        return info.remote_addr();
    }
    extensions
        .get::<TlsConnectInfo<TcpConnectInfo>>()
        .and_then(|info| info.get_ref().remote_addr())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestTagsLayer;

impl<S> Layer<S> for RequestTagsLayer {
    type Service = RequestTags<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestTags { inner }
    }
}

#[derive(Debug, Clone)]
pub struct RequestTags<S> {
    inner: S,
}

impl<S, B> Service<Request<B>> for RequestTags<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let tags = Arc::new(CallTags::from_request(&request));
        request.extensions_mut().insert(tags);
        self.inner.call(request)
    }
}
