//! Per-call execution context.
//!
//! A [`CallContext`] is built once at handler entry from what the middleware
//! pipeline attached to the request, and then passed by reference into the
//! dispatcher and the streaming loops. Nothing downstream re-derives the
//! caller identity.

use commitlog_tonic_core::{Error, Result, types::Subject};
use core::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::Request;

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

#[derive(Debug, Clone)]
pub struct CallContext {
    subject: Subject,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new(subject: Subject, cancel: CancellationToken, deadline: Option<Instant>) -> Self {
        Self {
            subject,
            cancel,
            deadline,
        }
    }

    /// Builds the context for an inbound call.
    ///
    /// The subject must already have been attached by the authentication
    /// stage. The returned context is cancelled when `shutdown` is cancelled
    /// or when the client's `grpc-timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionUnavailable`] if no subject is attached.
    pub fn from_request<T>(req: &Request<T>, shutdown: &CancellationToken) -> Result<Self> {
        let subject = req
            .extensions()
            .get::<Subject>()
            .cloned()
            .ok_or(Error::SessionUnavailable)?;

        let deadline = req
            .metadata()
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout)
            .map(|timeout| Instant::now() + timeout);

        Ok(Self::new(subject, shutdown.child_token(), deadline))
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Requests cancellation of this call and everything derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the call is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

/// Parses a gRPC `grpc-timeout` header value (`<1-8 digits><unit>`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (amount, unit) = value.split_at(value.len() - 1);
    if !amount.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = amount.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}
