use super::{StreamEnd, StreamSummary, fail, forward};
use crate::server::service::{context::CallContext, dispatch::Dispatcher};
use commitlog_tonic_core::proto::{ProduceRequest, ProduceResponse};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tonic::Status;

/// Drives a bidirectional produce stream.
///
/// Each inbound request runs the unary append path (authorization included)
/// and its response is handed to `resp_tx` before the next request is read,
/// so responses pair 1:1 with requests in order.
///
/// # Behavior
///
/// - Ends cleanly when the client half-closes its side.
/// - Ends with the error as terminal status on the first inbound transport
///   error, authorization failure, or append failure. Offsets already sent
///   stay valid.
/// - Ends without error if the call is cancelled or the client goes away.
pub async fn produce_loop<S>(
    dispatcher: Dispatcher,
    ctx: CallContext,
    mut inbound: S,
    resp_tx: mpsc::Sender<Result<ProduceResponse, Status>>,
) -> StreamSummary
where
    S: Stream<Item = Result<ProduceRequest, Status>> + Unpin,
{
    let mut records = 0;

    let end = loop {
        let next = tokio::select! {
            biased;
            () = ctx.cancelled() => break StreamEnd::Cancelled,
            () = resp_tx.closed() => break StreamEnd::Cancelled,
            next = inbound.next() => next,
        };

        let req = match next {
            None => break StreamEnd::Finished,
            Some(Ok(req)) => req,
            Some(Err(status)) => break fail(&ctx, &resp_tx, status).await,
        };

        match dispatcher.append(&ctx, req.record).await {
            Ok(offset) => {
                if !forward(&ctx, &resp_tx, Ok(ProduceResponse { offset })).await {
                    break StreamEnd::Cancelled;
                }
                records += 1;
            }
            Err(err) => break fail(&ctx, &resp_tx, err.into()).await,
        }
    };

    StreamSummary { end, records }
}
