//! Error types for the commit-log service.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure of the service core and of the capabilities it calls.
//! It implements `From<Error>` for `tonic::Status` so handlers can propagate
//! failures to clients with `?` and a stable status code.
//!
//! ## Error Cases
//! - `SessionUnavailable`: The transport exposed no peer/session information.
//! - `InvalidPeerCertificate`: A verified client certificate could not be
//!   decoded.
//! - `PermissionDenied`: The authorizer refused a (subject, object, action).
//! - `OffsetOutOfRange`: No record has been written at the offset yet.
//! - `InvalidRequest`: The client request was malformed.
//! - `Storage`: The log capability failed.
//! - `Membership`: The membership capability failed.
//! - `ChannelError`: A stream's response channel closed mid-flight.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the commit-log service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The call carries no peer metadata. This is an environment fault, not a
    /// security decision.
    #[error("couldn't find peer info")]
    SessionUnavailable,

    /// The peer presented a verified certificate that could not be parsed.
    #[error("invalid peer certificate: {reason}")]
    InvalidPeerCertificate { reason: String },

    /// The authorizer refused the request.
    #[error("{subject} not permitted to {action} to {object}")]
    PermissionDenied {
        subject: String,
        object: String,
        action: String,
    },

    /// Nothing has been written at `offset` yet.
    #[error("offset out of range: {offset}")]
    OffsetOutOfRange { offset: u64 },

    /// The client request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The log capability failed to append or read.
    #[error("Storage error: {context}")]
    Storage { context: String },

    /// The membership capability failed to list servers.
    #[error("Membership error: {context}")]
    Membership { context: String },

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },
}

impl Error {
    /// Returns `true` when the error only means "nothing to read yet".
    ///
    /// The tailing consumer keeps waiting on this kind instead of ending the
    /// stream; every other kind is terminal.
    pub const fn is_offset_out_of_range(&self) -> bool {
        matches!(self, Self::OffsetOutOfRange { .. })
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::SessionUnavailable => Status::unknown(message),
            Error::InvalidPeerCertificate { .. } => Status::unauthenticated(message),
            Error::PermissionDenied { .. } => Status::permission_denied(message),
            Error::OffsetOutOfRange { .. } => Status::out_of_range(message),
            Error::InvalidRequest { .. } => Status::invalid_argument(message),
            Error::Storage { .. } | Error::ChannelError { .. } => Status::internal(message),
            Error::Membership { .. } => Status::unavailable(message),
        }
    }
}
