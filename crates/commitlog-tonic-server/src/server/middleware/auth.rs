//! Transport session to subject.
//!
//! The caller's identity is the Common Name of the first (leaf) certificate
//! of the verified client chain. A connection without a client certificate,
//! plaintext or TLS with optional client auth, is the anonymous subject `""`.
//! The subject is stored in the request extensions for the handlers and
//! recorded on the current call span.

use commitlog_tonic_core::{Error, types::Subject};
use futures::future::{self, Either, Ready};
use http::{Extensions, Request, Response};
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tonic::{
    Status,
    transport::server::{TcpConnectInfo, TlsConnectInfo},
};
use tower::{Layer, Service};

/// What the transport knows about the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    /// No client certificate was presented.
    Unverified,
    /// DER of the leaf certificate of a chain the TLS layer verified.
    Verified(Vec<u8>),
}

/// Reads the transport session tonic attached to the request, if any.
pub fn session(extensions: &Extensions) -> Option<Session> {
    if let Some(tls) = extensions.get::<TlsConnectInfo<TcpConnectInfo>>() {
        return Some(leaf(tls.peer_certs()));
    }
    if extensions.get::<TcpConnectInfo>().is_some() {
        return Some(Session::Unverified);
    }
    #[cfg(unix)]
    if extensions
        .get::<tonic::transport::server::UdsConnectInfo>()
        .is_some()
    {
        return Some(Session::Unverified);
    }
    None
}

fn leaf<C: AsRef<[u8]>>(certs: Option<Arc<Vec<C>>>) -> Session {
    match certs.as_deref().and_then(|chain| chain.first()) {
        Some(cert) => Session::Verified(cert.as_ref().to_vec()),
        None => Session::Unverified,
    }
}

/// Resolves the caller's subject from its session.
///
/// # Errors
///
/// - [`Error::SessionUnavailable`] if there is no session at all.
/// - [`Error::InvalidPeerCertificate`] if the leaf certificate cannot be
///   decoded.
pub fn authenticate(session: Option<Session>) -> commitlog_tonic_core::Result<Subject> {
    match session.ok_or(Error::SessionUnavailable)? {
        Session::Unverified => Ok(Subject::anonymous()),
        Session::Verified(der) => common_name(&der).map(Subject::new),
    }
}

/// Common Name of a DER certificate's subject; `""` if it has none.
pub fn common_name(der: &[u8]) -> commitlog_tonic_core::Result<String> {
    let (_, cert) =
        x509_parser::parse_x509_certificate(der).map_err(|e| Error::InvalidPeerCertificate {
            reason: e.to_string(),
        })?;
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or_default();
    Ok(cn.to_owned())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticateLayer;

impl<S> Layer<S> for AuthenticateLayer {
    type Service = Authenticate<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Authenticate { inner }
    }
}

#[derive(Debug, Clone)]
pub struct Authenticate<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for Authenticate<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Default,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = Either<S::Future, Ready<Result<Response<ResBody>, S::Error>>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        match authenticate(session(request.extensions())) {
            Ok(subject) => {
                tracing::Span::current().record("subject", subject.as_str());
                request.extensions_mut().insert(subject);
                Either::Left(self.inner.call(request))
            }
            Err(err) => {
                tracing::debug!(error = %err, "rejecting call");
                Either::Right(future::ready(Ok(Status::from(err).into_http())))
            }
        }
    }
}
