//! Streaming protocol loops.
//!
//! Both loops run as their own task per stream and push responses into a
//! bounded channel that backs the gRPC response stream, in the same way for
//! produce and consume:
//!
//! - [`produce::produce_loop`] - strict one request, one response appends.
//! - [`consume::consume_loop`] - tailing reads that wait for new records.
//! - [`backoff`] - delay schedule used while a tailing read waits.
//!
//! Every blocking point (receive, send, wait) is raced against the call's
//! cancellation, and a closed response channel is treated as the client
//! going away.

pub mod backoff;
pub mod consume;
pub mod produce;

use crate::server::service::context::CallContext;
use backoff::BackoffConfig;
use tokio::sync::mpsc;
use tonic::{Code, Status};

/// Tunables shared by the streaming handlers.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// Capacity of the per-stream response channel.
    pub buffer_size: usize,
    /// Wait schedule for tailing reads that reached the end of the log.
    pub backoff: BackoffConfig,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            buffer_size: 8,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Why a stream loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The client finished sending (produce only).
    Finished,
    /// The call was cancelled, hit its deadline, or the client went away.
    Cancelled,
    /// A terminal error was sent to the client with this code.
    Failed(Code),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub end: StreamEnd,
    /// Responses successfully handed to the response channel.
    pub records: u64,
}

/// Sends `item` to the response channel unless the call is cancelled first.
///
/// Returns `false` if the item was not delivered.
pub(crate) async fn forward<T>(
    ctx: &CallContext,
    resp_tx: &mpsc::Sender<Result<T, Status>>,
    item: Result<T, Status>,
) -> bool {
    tokio::select! {
        biased;
        () = ctx.cancelled() => false,
        sent = resp_tx.send(item) => sent.is_ok(),
    }
}

/// Sends a terminal error and reports the stream as failed.
pub(crate) async fn fail<T>(
    ctx: &CallContext,
    resp_tx: &mpsc::Sender<Result<T, Status>>,
    status: Status,
) -> StreamEnd {
    let code = status.code();
    tracing::debug!(?code, message = status.message(), "terminating stream");
    if !forward(ctx, resp_tx, Err(status)).await {
        tracing::debug!("client gone before terminal status was sent");
    }
    StreamEnd::Failed(code)
}
