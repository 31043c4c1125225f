use crate::server::streaming::{StreamOptions, backoff::BackoffConfig};
use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `commitlog-tonic-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for a single local
/// node without TLS.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "commitlog-tonic-server",
    version,
    about = "A gRPC front-end for an append-only commit log"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:8400" or "/tmp/commitlog.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8400"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Identifier of this node as reported by `GetServers`.
    ///
    /// Environment variable: `NODE_ID`
    #[arg(long, env = "NODE_ID", default_value_t = String::from("node-0"))]
    pub node_id: String,

    /// RPC address reported for this node by `GetServers`. Defaults to
    /// `SERVER_ADDR`.
    ///
    /// Environment variable: `ADVERTISE_ADDR`
    #[arg(long, env = "ADVERTISE_ADDR")]
    pub advertise_addr: Option<String>,

    /// Followers reported by `GetServers`, as a comma separated list of
    /// `id=addr` pairs.
    ///
    /// Example: "node-1=10.0.0.2:8400,node-2=10.0.0.3:8400"
    ///
    /// Environment variable: `PEERS`
    #[arg(long, env = "PEERS", value_delimiter = ',')]
    pub peers: Vec<String>,

    /// PEM certificate chain presented by the server. Enables TLS.
    ///
    /// Environment variable: `TLS_CERT_FILE`
    #[arg(long, env = "TLS_CERT_FILE")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for `--tls-cert`.
    ///
    /// Environment variable: `TLS_KEY_FILE`
    #[arg(long, env = "TLS_KEY_FILE")]
    pub tls_key: Option<PathBuf>,

    /// PEM CA bundle used to verify client certificates. Enables mutual TLS;
    /// the subject of a call is the Common Name of the client certificate.
    ///
    /// Environment variable: `TLS_CLIENT_CA_FILE`
    #[arg(long, env = "TLS_CLIENT_CA_FILE")]
    pub tls_client_ca: Option<PathBuf>,

    /// Accept TLS clients that present no certificate. They are served as the
    /// anonymous subject.
    ///
    /// Environment variable: `TLS_CLIENT_AUTH_OPTIONAL`
    #[arg(long, env = "TLS_CLIENT_AUTH_OPTIONAL", default_value_t = false)]
    pub tls_client_auth_optional: bool,

    /// ACL policy file with `p, subject, object, action` lines. Without it
    /// every call is permitted.
    ///
    /// Environment variable: `ACL_POLICY_FILE`
    #[arg(long, env = "ACL_POLICY_FILE")]
    pub acl_policy: Option<PathBuf>,

    /// Capacity of the response buffer of each produce/consume stream.
    ///
    /// Lower values increase backpressure responsiveness; higher values let a
    /// fast reader run further ahead of a slow client.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// First delay, in milliseconds, before a tailing consumer re-reads past
    /// the end of the log.
    ///
    /// Environment variable: `TAIL_BACKOFF_MIN_MS`
    #[arg(long, env = "TAIL_BACKOFF_MIN_MS", default_value_t = 1)]
    pub tail_backoff_min_ms: u64,

    /// Ceiling, in milliseconds, of the tailing consumer's retry delay.
    ///
    /// Environment variable: `TAIL_BACKOFF_MAX_MS`
    #[arg(long, env = "TAIL_BACKOFF_MAX_MS", default_value_t = 250)]
    pub tail_backoff_max_ms: u64,

    /// Probability in `[0, 1]` that a non-produce call is traced. Produce
    /// calls are always traced.
    ///
    /// Environment variable: `TRACE_SAMPLE_RATIO`
    #[arg(long, env = "TRACE_SAMPLE_RATIO", default_value_t = 0.5)]
    pub trace_sample_ratio: f64,

    /// Seconds to wait for open streams to finish after a shutdown signal.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

/// Certificate files for the server side of (m)TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub client_ca: Option<PathBuf>,
    pub client_auth_optional: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub node_id: String,
    pub advertise_addr: String,
    pub peers: Vec<(String, String)>,
    pub tls: Option<TlsFiles>,
    pub acl_policy: Option<PathBuf>,
    pub stream: StreamOptions,
    pub trace_sample_ratio: f64,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.node_id.trim().is_empty() {
            bail!("NODE_ID must not be empty");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.tail_backoff_min_ms == 0 {
            bail!("TAIL_BACKOFF_MIN_MS must be greater than 0");
        }

        if args.tail_backoff_max_ms < args.tail_backoff_min_ms {
            bail!(
                "TAIL_BACKOFF_MAX_MS ({}) must be at least TAIL_BACKOFF_MIN_MS ({})",
                args.tail_backoff_max_ms,
                args.tail_backoff_min_ms
            );
        }

        if !(0.0..=1.0).contains(&args.trace_sample_ratio) {
            bail!(
                "TRACE_SAMPLE_RATIO ({}) must be within [0, 1]",
                args.trace_sample_ratio
            );
        }

        let peers = args
            .peers
            .iter()
            .map(String::as_str)
            .filter(|peer| !peer.trim().is_empty())
            .map(parse_peer)
            .collect::<anyhow::Result<Vec<_>>>()
            .context("invalid PEERS")?;
        if let Some((id, _)) = peers.iter().find(|(id, _)| *id == args.node_id) {
            bail!("PEERS lists this node's own id `{id}`");
        }

        let tls = match (args.tls_cert, args.tls_key) {
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert,
                key,
                client_ca: args.tls_client_ca,
                client_auth_optional: args.tls_client_auth_optional,
            }),
            (None, None) => {
                if args.tls_client_ca.is_some() {
                    bail!("TLS_CLIENT_CA_FILE requires TLS_CERT_FILE and TLS_KEY_FILE");
                }
                None
            }
            _ => bail!("TLS_CERT_FILE and TLS_KEY_FILE must be set together"),
        };

        if let Some(tls) = &tls {
            if tls.client_auth_optional && tls.client_ca.is_none() {
                bail!("TLS_CLIENT_AUTH_OPTIONAL requires TLS_CLIENT_CA_FILE");
            }
            if args.uds {
                bail!("TLS is only supported on TCP listeners");
            }
        }

        let advertise_addr = args
            .advertise_addr
            .unwrap_or_else(|| args.server_addr.clone());

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            node_id: args.node_id,
            advertise_addr,
            peers,
            tls,
            acl_policy: args.acl_policy,
            stream: StreamOptions {
                buffer_size: args.stream_buffer_size,
                backoff: BackoffConfig {
                    min: Duration::from_millis(args.tail_backoff_min_ms),
                    max: Duration::from_millis(args.tail_backoff_max_ms),
                },
            },
            trace_sample_ratio: args.trace_sample_ratio,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}

fn parse_peer(raw: &str) -> anyhow::Result<(String, String)> {
    let (id, addr) = raw
        .split_once('=')
        .with_context(|| format!("`{raw}` is not of the form id=addr"))?;
    let (id, addr) = (id.trim(), addr.trim());
    if id.is_empty() || addr.is_empty() {
        bail!("`{raw}` has an empty id or address");
    }
    Ok((id.to_owned(), addr.to_owned()))
}
