use super::{
    StreamEnd, StreamSummary,
    backoff::{Backoff, BackoffConfig},
    fail, forward,
};
use crate::server::service::{context::CallContext, dispatch::Dispatcher};
use commitlog_tonic_core::{proto::ConsumeResponse, types::Offset};
use tokio::sync::{mpsc, watch};
use tonic::Status;

/// Drives a tailing consume stream starting at `start`.
///
/// Reads `start`, `start + 1`, ... through the unary read path (authorization
/// included) and hands each record to `resp_tx`. The offset advances only
/// after the record was handed off; a record that could not be sent is not
/// retried.
///
/// # Behavior
///
/// - `OffsetOutOfRange` means the tail has not reached the offset yet: the
///   loop suspends until the log publishes a larger tail (or, for logs
///   without a tail watch, for the next backoff delay) and reads again.
/// - Any other error is sent as the terminal status.
/// - Cancellation, deadline, or the client going away ends the stream with no
///   error. It is checked before every read and raced against every wait and
///   send.
pub async fn consume_loop(
    dispatcher: Dispatcher,
    ctx: CallContext,
    start: Offset,
    resp_tx: mpsc::Sender<Result<ConsumeResponse, Status>>,
    backoff: BackoffConfig,
) -> StreamSummary {
    let mut offset = start;
    let mut records = 0;
    let mut tail = dispatcher.log().watch_tail();
    let mut backoff = Backoff::new(backoff);

    let end = loop {
        if ctx.is_cancelled() || resp_tx.is_closed() {
            break StreamEnd::Cancelled;
        }

        match dispatcher.read(&ctx, offset).await {
            Ok(record) => {
                let response = ConsumeResponse {
                    record: Some(record),
                };
                if !forward(&ctx, &resp_tx, Ok(response)).await {
                    break StreamEnd::Cancelled;
                }
                records += 1;
                backoff.reset();
                match offset.checked_add(1) {
                    Some(next) => offset = next,
                    None => break StreamEnd::Finished,
                }
            }
            Err(err) if err.is_offset_out_of_range() => {
                if !wait_for_tail(&ctx, &resp_tx, &mut tail, &mut backoff, offset).await {
                    break StreamEnd::Cancelled;
                }
            }
            Err(err) => break fail(&ctx, &resp_tx, err.into()).await,
        }
    };

    StreamSummary { end, records }
}

/// Suspends until `offset` may have been written.
///
/// Returns `false` if the call was cancelled or the client went away while
/// waiting.
async fn wait_for_tail<T>(
    ctx: &CallContext,
    resp_tx: &mpsc::Sender<T>,
    tail: &mut Option<watch::Receiver<Offset>>,
    backoff: &mut Backoff,
    offset: Offset,
) -> bool {
    let wait = async {
        match tail {
            Some(rx) => {
                // Bounded so a log that stops publishing is still re-read.
                let closed = matches!(
                    tokio::time::timeout(backoff.ceiling(), rx.wait_for(|next| *next > offset))
                        .await,
                    Ok(Err(_))
                );
                if closed {
                    *tail = None;
                }
            }
            None => tokio::time::sleep(backoff.next_delay()).await,
        }
    };

    tokio::select! {
        biased;
        () = ctx.cancelled() => false,
        () = resp_tx.closed() => false,
        () = wait => true,
    }
}
