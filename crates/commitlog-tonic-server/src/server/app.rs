//! Service assembly shared by the binary and the integration tests.

use crate::server::{
    capability::{
        Authorizer,
        acl::{AclAuthorizer, AllowAll},
        membership::StaticMembership,
        memory::MemoryLog,
    },
    config::ServerConfig,
    middleware::pipeline,
    service::handler::LogService,
};
use anyhow::Context;
use commitlog_tonic_core::proto::{FILE_DESCRIPTOR_SET, log_server::LogServer};
use core::time::Duration;
use futures::Stream;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tonic::{
    codec::CompressionEncoding,
    transport::{Server, ServerTlsConfig, server::Connected},
};
use tonic_reflection::server::Builder;

/// Builds the log service with the reference capabilities selected by
/// `config`.
pub fn build_service(config: &ServerConfig) -> anyhow::Result<LogService> {
    let authorizer: Arc<dyn Authorizer> = match &config.acl_policy {
        Some(path) => {
            let acl = AclAuthorizer::from_file(path)?;
            tracing::info!(rules = acl.len(), path = %path.display(), "Loaded ACL policy");
            Arc::new(acl)
        }
        None => {
            tracing::warn!("No ACL policy configured; every call is permitted");
            Arc::new(AllowAll)
        }
    };

    let membership =
        StaticMembership::new(&config.node_id, &config.advertise_addr, &config.peers);

    Ok(LogService::new(
        Arc::new(MemoryLog::new()),
        authorizer,
        Arc::new(membership),
        config.stream,
    ))
}

pub fn log_server(service: LogService) -> LogServer<LogService> {
    LogServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

/// Serves the log, health, and reflection services on `incoming` until
/// `signal` resolves.
///
/// On `signal` the log service is reported as not serving, open streams are
/// cancelled and given `drain_timeout` to finish, and then the server stops.
pub async fn serve_with_incoming<I, IO, IE, F>(
    service: LogService,
    tls: Option<ServerTlsConfig>,
    incoming: I,
    signal: F,
    drain_timeout: Duration,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
    F: Future<Output = ()>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<LogServer<LogService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let mut builder = Server::builder();
    if let Some(tls) = tls {
        builder = builder
            .tls_config(tls)
            .context("invalid TLS configuration")?;
    }

    let shutdown = async {
        signal.await;
        health_reporter
            .set_not_serving::<LogServer<LogService>>()
            .await;
        service.shutdown(drain_timeout).await;
    };

    builder
        .http2_adaptive_window(Some(true))
        .layer(pipeline())
        .add_service(health_service)
        .add_service(reflection)
        .add_service(log_server(service.clone()))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?;

    tracing::info!("Service shut down successfully");
    Ok(())
}
