use commitlog_tonic_core::proto::{ProduceRequest, Record, log_client::LogClient};
use commitlog_tonic_server::server::{
    app::{build_service, serve_with_incoming},
    config::{CliArgs, ServerConfig},
};
use clap::Parser;
use core::{fmt, hint::black_box};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::stream::FuturesUnordered;
use std::time::{Duration, Instant};
use tokio::{net::TcpListener, runtime::Builder};
use tokio_stream::{StreamExt, wrappers::TcpListenerStream};
use tonic::{
    codec::CompressionEncoding,
    transport::{Channel, Uri},
};

#[derive(Clone, Copy, Debug)]
enum Compression {
    None,
    Deflate,
    Gzip,
    Zstd,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Deflate => write!(f, "deflate"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

impl From<Compression> for Option<CompressionEncoding> {
    fn from(value: Compression) -> Self {
        match value {
            Compression::None => None,
            Compression::Deflate => Some(CompressionEncoding::Deflate),
            Compression::Gzip => Some(CompressionEncoding::Gzip),
            Compression::Zstd => Some(CompressionEncoding::Zstd),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct ProduceBenchParams {
    records_per_stream: u64,
    record_size: usize,
    concurrency: usize,
    compression: Compression,
}

/// Starts an in-process server on an ephemeral port and returns its URI.
async fn start_server() -> Uri {
    let config = ServerConfig::try_from(CliArgs::parse_from(["bench"])).expect("config");
    let service = build_service(&config).expect("service");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(serve_with_incoming(
        service,
        None,
        TcpListenerStream::new(listener),
        std::future::pending(),
        Duration::from_secs(1),
    ));
    Uri::try_from(format!("http://{addr}")).expect("Invalid URI")
}

fn grpc_bench(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let uri = rt.block_on(start_server());

    let records_per_stream_cases = [1_000, 10_000];
    let record_size_cases = [64, 1024];
    let concurrency_cases = [1, 4, 16];
    let compression_cases = [
        Compression::None,
        Compression::Zstd,
        Compression::Gzip,
        Compression::Deflate,
    ];

    // Generate cartesian product of all param combinations
    let mut cases = Vec::new();
    for &records_per_stream in &records_per_stream_cases {
        for &record_size in &record_size_cases {
            for &concurrency in &concurrency_cases {
                for &compression in &compression_cases {
                    cases.push(ProduceBenchParams {
                        records_per_stream,
                        record_size,
                        concurrency,
                        compression,
                    });
                }
            }
        }
    }

    for params in &cases {
        let mut group = c.benchmark_group("grpc/produce_stream");
        group.throughput(Throughput::Elements(
            params.records_per_stream * params.concurrency as u64,
        ));

        group.bench_function(
            format!(
                "records/{}/size/{}/conc/{}/comp/{}",
                params.records_per_stream,
                params.record_size,
                params.concurrency,
                params.compression,
            ),
            |b| {
                b.to_async(&rt).iter_custom(|iters| {
                    let uri = uri.clone();
                    async move {
                        let channel = Channel::builder(uri)
                            .connect()
                            .await
                            .expect("Failed to connect to server");

                        let start = Instant::now();

                        for _ in 0..iters {
                            run_produce_bench(&channel, params).await;
                        }

                        start.elapsed()
                    }
                });
            },
        );

        group.finish();
    }
}

async fn run_produce_bench(channel: &Channel, params: &ProduceBenchParams) {
    let mut tasks = FuturesUnordered::new();

    for _ in 0..params.concurrency {
        let channel = channel.clone();
        let params = *params;

        tasks.push(tokio::spawn(async move {
            let mut client = LogClient::new(channel);
            if let Some(encoding) = params.compression.into() {
                client = client.accept_compressed(encoding).send_compressed(encoding)
            }

            let value = bytes::Bytes::from(vec![0xAB; params.record_size]);
            let requests = tokio_stream::iter(0..params.records_per_stream).map(move |_| {
                ProduceRequest {
                    record: Some(Record {
                        value: value.clone(),
                        offset: 0,
                    }),
                }
            });

            let mut responses = client
                .produce_stream(requests)
                .await
                .expect("stream call failed")
                .into_inner();

            let mut received = 0;
            while let Some(resp) = responses.next().await {
                black_box(resp.expect("resp").offset);
                received += 1;
            }
            assert_eq!(received, params.records_per_stream);
        }));
    }

    // Wait for all tasks to complete
    while let Some(res) = tasks.next().await {
        res.unwrap();
    }
}

criterion_group!(grpc_benches, grpc_bench);
criterion_main!(grpc_benches);
