//! gRPC service implementation for the commit log.
//!
//! This module defines [`LogService`], the concrete implementation of the
//! [`Log`] gRPC service defined in `log.proto`. It owns no
//! business state of its own: it holds shared references to the injected log,
//! authorizer, and membership capabilities and turns each call into a
//! [`CallContext`] plus a dispatcher or streaming-loop invocation.
//!
//! ## Responsibilities
//!
//! - Build the per-call context from the subject the pipeline attached.
//! - Serve the unary `Produce`, `Consume`, and `GetServers` calls.
//! - Spawn one task per `ProduceStream` / `ConsumeStream` and expose its
//!   output as the response stream.
//! - Cancel open streams and wait for them to drain on shutdown.

use crate::server::{
    capability::{Authorizer, CommitLog, ServerLister},
    service::{context::CallContext, dispatch::Dispatcher},
    streaming::{
        StreamEnd, StreamOptions, StreamSummary, consume::consume_loop, produce::produce_loop,
    },
    telemetry::{
        decrement_streams_inflight, increment_records_consumed, increment_records_produced,
        increment_streams_inflight,
    },
};
use commitlog_tonic_core::proto::{
    ConsumeRequest, ConsumeResponse, GetServersRequest, GetServersResponse, ProduceRequest,
    ProduceResponse, log_server::Log,
};
use core::{pin::Pin, time::Duration};
use futures::TryStreamExt;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::Instrument;

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// gRPC front-end for an append-only commit log.
///
/// Cloning is cheap; clones share the capabilities, the shutdown token, and
/// the in-flight stream count.
#[derive(Clone)]
pub struct LogService {
    dispatcher: Dispatcher,
    membership: Arc<dyn ServerLister>,
    options: StreamOptions,
    shutdown: CancellationToken,
    streams_inflight: Arc<AtomicUsize>,
}

impl LogService {
    /// A zero `options.buffer_size` is raised to 1; stream channels need
    /// capacity for at least one response.
    pub fn new(
        log: Arc<dyn CommitLog>,
        authorizer: Arc<dyn Authorizer>,
        membership: Arc<dyn ServerLister>,
        mut options: StreamOptions,
    ) -> Self {
        if options.buffer_size == 0 {
            tracing::warn!("Stream buffer size of 0 raised to 1");
            options.buffer_size = 1;
        }
        Self {
            dispatcher: Dispatcher::new(log, authorizer),
            membership,
            options,
            shutdown: CancellationToken::new(),
            streams_inflight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of produce/consume streams currently running.
    pub fn streams_inflight(&self) -> usize {
        self.streams_inflight.load(Ordering::Acquire)
    }

    /// Cancels every open stream and waits up to `drain_timeout` for their
    /// tasks to finish.
    ///
    /// Streams opened after this call end immediately. Unary calls are
    /// unaffected.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        tracing::info!(
            "Cancelling in-flight streams ({} active)",
            self.streams_inflight()
        );
        self.shutdown.cancel();

        let drained = tokio::time::timeout(drain_timeout, async {
            while self.streams_inflight() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("All in-flight streams drained"),
            Err(_) => tracing::warn!(
                "Stream drain timed out ({} streams still active)",
                self.streams_inflight()
            ),
        }
    }

    fn spawn_stream<F>(&self, span: tracing::Span, fut: F)
    where
        F: Future<Output = StreamSummary> + Send + 'static,
    {
        let guard = InflightGuard::new(Arc::clone(&self.streams_inflight));
        let fut = async move {
            let _guard = guard;
            let summary = fut.await;
            match summary.end {
                StreamEnd::Failed(code) => {
                    tracing::debug!(?code, records = summary.records, "stream failed");
                }
                end => tracing::debug!(?end, records = summary.records, "stream closed"),
            }
        };
        tokio::spawn(fut.instrument(span));
    }
}

/// Tracks one running stream task in the shared counter and the metrics.
struct InflightGuard(Arc<AtomicUsize>);

impl InflightGuard {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        increment_streams_inflight();
        Self(count)
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
    }
}

#[tonic::async_trait]
impl Log for LogService {
    type ConsumeStreamStream = ResponseStream<ConsumeResponse>;
    type ProduceStreamStream = ResponseStream<ProduceResponse>;

    #[tracing::instrument(skip_all)]
    async fn produce(
        &self,
        req: Request<ProduceRequest>,
    ) -> Result<Response<ProduceResponse>, Status> {
        let ctx = CallContext::from_request(&req, &self.shutdown)?;
        let offset = self
            .dispatcher
            .append(&ctx, req.into_inner().record)
            .await?;
        increment_records_produced(1);
        Ok(Response::new(ProduceResponse { offset }))
    }

    #[tracing::instrument(skip_all, fields(offset = req.get_ref().offset))]
    async fn consume(
        &self,
        req: Request<ConsumeRequest>,
    ) -> Result<Response<ConsumeResponse>, Status> {
        let ctx = CallContext::from_request(&req, &self.shutdown)?;
        let record = self.dispatcher.read(&ctx, req.get_ref().offset).await?;
        increment_records_consumed(1);
        Ok(Response::new(ConsumeResponse {
            record: Some(record),
        }))
    }

    /// Tails the log from the requested offset.
    ///
    /// The stream stays open while the caller waits for records that have not
    /// been produced yet, and closes without error when the caller cancels,
    /// its deadline passes, or the server shuts down.
    #[tracing::instrument(skip_all, fields(offset = req.get_ref().offset))]
    async fn consume_stream(
        &self,
        req: Request<ConsumeRequest>,
    ) -> Result<Response<Self::ConsumeStreamStream>, Status> {
        let ctx = CallContext::from_request(&req, &self.shutdown)?;
        let start = req.get_ref().offset;
        let (resp_tx, resp_rx) = mpsc::channel(self.options.buffer_size);

        self.spawn_stream(
            tracing::info_span!("consume_stream", start),
            consume_loop(
                self.dispatcher.clone(),
                ctx,
                start,
                resp_tx,
                self.options.backoff,
            ),
        );

        let stream =
            ReceiverStream::new(resp_rx).inspect_ok(|_| increment_records_consumed(1));
        Ok(Response::new(Box::pin(stream)))
    }

    /// Appends each inbound record in order, replying with its offset.
    #[tracing::instrument(skip_all)]
    async fn produce_stream(
        &self,
        req: Request<Streaming<ProduceRequest>>,
    ) -> Result<Response<Self::ProduceStreamStream>, Status> {
        let ctx = CallContext::from_request(&req, &self.shutdown)?;
        let inbound = req.into_inner();
        let (resp_tx, resp_rx) = mpsc::channel(self.options.buffer_size);

        self.spawn_stream(
            tracing::info_span!("produce_stream"),
            produce_loop(self.dispatcher.clone(), ctx, inbound, resp_tx),
        );

        let stream =
            ReceiverStream::new(resp_rx).inspect_ok(|_| increment_records_produced(1));
        Ok(Response::new(Box::pin(stream)))
    }

    /// Relays the membership capability's view of the cluster. Not subject to
    /// the produce/consume policy.
    #[tracing::instrument(skip_all)]
    async fn get_servers(
        &self,
        _req: Request<GetServersRequest>,
    ) -> Result<Response<GetServersResponse>, Status> {
        let servers = self.membership.servers().await?;
        Ok(Response::new(GetServersResponse { servers }))
    }
}
