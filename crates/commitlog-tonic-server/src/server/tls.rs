use crate::server::config::TlsFiles;
use anyhow::Context;
use std::path::Path;
use tonic::transport::{Certificate, Identity, ServerTlsConfig};

/// Builds the server TLS configuration from PEM files.
///
/// With a client CA the server requests a client certificate and verifies it
/// against that CA; the certificate is then required unless
/// `client_auth_optional` is set.
pub fn load_server_tls(files: &TlsFiles) -> anyhow::Result<ServerTlsConfig> {
    let cert = read_pem(&files.cert, "server certificate")?;
    let key = read_pem(&files.key, "server key")?;
    let mut config = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));

    if let Some(ca) = &files.client_ca {
        let ca = read_pem(ca, "client CA")?;
        config = config
            .client_ca_root(Certificate::from_pem(ca))
            .client_auth_optional(files.client_auth_optional);
    }

    Ok(config)
}

fn read_pem(path: &Path, what: &str) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {what} from {}", path.display()))
}
