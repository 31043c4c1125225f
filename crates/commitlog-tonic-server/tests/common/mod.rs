#![allow(dead_code)]

use commitlog_tonic_core::proto::{ProduceRequest, Record, log_client::LogClient};
use commitlog_tonic_server::server::{
    app::serve_with_incoming,
    capability::{
        Authorizer,
        acl::{AclAuthorizer, AllowAll},
        membership::StaticMembership,
        memory::MemoryLog,
    },
    service::handler::LogService,
    streaming::StreamOptions,
};
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity, ServerTlsConfig};

pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    /// Serves `service` with the full pipeline on an ephemeral port.
    pub async fn start(service: LogService, tls: Option<ServerTlsConfig>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(serve_with_incoming(
            service,
            tls,
            TcpListenerStream::new(listener),
            async {
                let _ = rx.await;
            },
            DRAIN_TIMEOUT,
        ));

        Self {
            addr,
            shutdown: Some(tx),
            handle,
        }
    }

    /// Signals shutdown and waits for the server to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), &mut self.handle)
            .await
            .expect("server did not shut down")
            .expect("server task panicked")
            .expect("server failed");
    }
}

/// A service over an in-memory log. `None` permits everything.
pub fn service(policy: Option<&str>) -> LogService {
    let authorizer: Arc<dyn Authorizer> = match policy {
        Some(policy) => Arc::new(AclAuthorizer::parse(policy).expect("policy")),
        None => Arc::new(AllowAll),
    };
    LogService::new(
        Arc::new(MemoryLog::new()),
        authorizer,
        Arc::new(StaticMembership::new(
            "node-0",
            "127.0.0.1:8400",
            &[("node-1".to_owned(), "127.0.0.1:8401".to_owned())],
        )),
        StreamOptions::default(),
    )
}

pub async fn plaintext_client(addr: SocketAddr) -> LogClient<Channel> {
    LogClient::connect(format!("http://{addr}"))
        .await
        .expect("connect")
}

pub fn produce_req(value: &'static str) -> ProduceRequest {
    ProduceRequest {
        record: Some(Record {
            value: value.into(),
            offset: 0,
        }),
    }
}

pub struct TestPki {
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub ca_cert_pem: String,
    ca_cert: rcgen::Certificate,
    ca_key: KeyPair,
}

impl TestPki {
    pub fn generate() -> Self {
        let mut ca_dn = DistinguishedName::new();
        ca_dn.push(DnType::CommonName, "commitlog-test-ca");
        let mut ca_params = CertificateParams::default();
        ca_params.distinguished_name = ca_dn;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_key = KeyPair::generate().expect("ca key");
        let ca_cert = ca_params.self_signed(&ca_key).expect("ca cert");

        let mut server_dn = DistinguishedName::new();
        server_dn.push(DnType::CommonName, "localhost");
        let mut server_params =
            CertificateParams::new(vec!["localhost".to_owned()]).expect("server params");
        server_params.distinguished_name = server_dn;
        let server_key = KeyPair::generate().expect("server key");
        let server_cert = server_params
            .signed_by(&server_key, &ca_cert, &ca_key)
            .expect("server cert");

        Self {
            server_cert_pem: server_cert.pem(),
            server_key_pem: server_key.serialize_pem(),
            ca_cert_pem: ca_cert.pem(),
            ca_cert,
            ca_key,
        }
    }

    /// Issues a client certificate with the given Common Name.
    pub fn client_identity(&self, common_name: &str) -> Identity {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        let mut params = CertificateParams::new(Vec::<String>::new()).expect("client params");
        params.distinguished_name = dn;
        let key = KeyPair::generate().expect("client key");
        let cert = params
            .signed_by(&key, &self.ca_cert, &self.ca_key)
            .expect("client cert");
        Identity::from_pem(cert.pem(), key.serialize_pem())
    }

    pub fn server_tls(&self, client_auth_optional: bool) -> ServerTlsConfig {
        ServerTlsConfig::new()
            .identity(Identity::from_pem(
                self.server_cert_pem.clone(),
                self.server_key_pem.clone(),
            ))
            .client_ca_root(Certificate::from_pem(self.ca_cert_pem.clone()))
            .client_auth_optional(client_auth_optional)
    }

    pub fn client_tls(&self, identity: Option<Identity>) -> ClientTlsConfig {
        let config = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(self.ca_cert_pem.clone()))
            .domain_name("localhost");
        match identity {
            Some(identity) => config.identity(identity),
            None => config,
        }
    }
}

pub async fn tls_client(
    addr: SocketAddr,
    tls: ClientTlsConfig,
) -> Result<LogClient<Channel>, tonic::transport::Error> {
    let channel = Channel::from_shared(format!("https://{addr}"))
        .expect("endpoint")
        .tls_config(tls)?
        .connect()
        .await?;
    Ok(LogClient::new(channel))
}
