//! Narrow interfaces to the collaborators the service depends on.
//!
//! The service never names a concrete log, policy engine, or membership
//! implementation. It is handed one of each at construction time as an
//! `Arc<dyn …>` and only ever calls through these traits. Every
//! implementation must be safe to call from arbitrarily many concurrent
//! calls.
//!
//! ## Structure
//!
//! - [`CommitLog`] - append/read by offset, plus an optional tail watch.
//! - [`Authorizer`] - policy decision for (subject, object, action).
//! - [`ServerLister`] - current cluster membership.
//! - [`memory`], [`acl`], [`membership`] - reference implementations used
//!   by the binary and the tests.

pub mod acl;
pub mod membership;
pub mod memory;

use commitlog_tonic_core::{
    Result,
    proto::{Record, Server},
    types::Offset,
};
use tokio::sync::watch;

/// An append-only log of records addressed by offset.
#[tonic::async_trait]
pub trait CommitLog: Send + Sync + 'static {
    /// Appends `record` and returns the offset the log assigned to it.
    ///
    /// Offsets are unique and increase with append order. Any offset carried
    /// by `record` is ignored.
    async fn append(&self, record: Record) -> Result<Offset>;

    /// Reads the record stored at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OffsetOutOfRange`] when nothing has been written at
    /// `offset` yet.
    ///
    /// [`Error::OffsetOutOfRange`]: commitlog_tonic_core::Error::OffsetOutOfRange
    async fn read(&self, offset: Offset) -> Result<Record>;

    /// Subscribes to the next offset the log will assign.
    ///
    /// Logs that can publish their tail let tailing readers suspend until new
    /// data arrives. The default returns `None` and readers fall back to
    /// polling with backoff.
    fn watch_tail(&self) -> Option<watch::Receiver<Offset>> {
        None
    }
}

/// Policy decision point for log access.
pub trait Authorizer: Send + Sync + 'static {
    /// Returns `Ok(())` if `subject` may perform `action` on `object`.
    fn authorize(&self, subject: &str, object: &str, action: &str) -> Result<()>;
}

/// Source of the current cluster membership.
#[tonic::async_trait]
pub trait ServerLister: Send + Sync + 'static {
    async fn servers(&self) -> Result<Vec<Server>>;
}
