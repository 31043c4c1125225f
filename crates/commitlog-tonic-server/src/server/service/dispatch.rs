//! Authorization gate and unary record dispatch.
//!
//! Every log operation goes through [`Dispatcher`]: the gate is evaluated for
//! the caller's subject first and the log is only touched when it allows the
//! call. The streaming handlers reuse these same two methods for every
//! message, so unary and streamed records follow one code path.

use crate::server::capability::{Authorizer, CommitLog};
use crate::server::service::context::CallContext;
use commitlog_tonic_core::{
    Error, Result,
    proto::Record,
    types::{Action, OBJECT_WILDCARD, Offset},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Dispatcher {
    log: Arc<dyn CommitLog>,
    authorizer: Arc<dyn Authorizer>,
}

impl Dispatcher {
    pub fn new(log: Arc<dyn CommitLog>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { log, authorizer }
    }

    pub fn log(&self) -> &Arc<dyn CommitLog> {
        &self.log
    }

    /// Evaluates the policy for `action` on the whole log.
    ///
    /// Any refusal or evaluation failure from the authorizer is reported as
    /// [`Error::PermissionDenied`] and never retried.
    pub fn authorize(&self, ctx: &CallContext, action: Action) -> Result<()> {
        let subject = ctx.subject().as_str();
        match self
            .authorizer
            .authorize(subject, OBJECT_WILDCARD, action.as_str())
        {
            Ok(()) => Ok(()),
            Err(err @ Error::PermissionDenied { .. }) => Err(err),
            Err(err) => {
                tracing::debug!(subject, error = %err, "authorizer evaluation failed");
                Err(Error::PermissionDenied {
                    subject: subject.to_string(),
                    object: OBJECT_WILDCARD.to_string(),
                    action: action.as_str().to_string(),
                })
            }
        }
    }

    /// Authorizes `produce` and appends `record`, returning its offset.
    ///
    /// A request without a record is rejected before the log is touched.
    pub async fn append(&self, ctx: &CallContext, record: Option<Record>) -> Result<Offset> {
        self.authorize(ctx, Action::Produce)?;
        let record = record.ok_or_else(|| Error::InvalidRequest {
            reason: "ProduceRequest.record is required".to_string(),
        })?;
        self.log.append(record).await
    }

    /// Authorizes `consume` and reads the record at `offset`.
    pub async fn read(&self, ctx: &CallContext, offset: Offset) -> Result<Record> {
        self.authorize(ctx, Action::Consume)?;
        self.log.read(offset).await
    }
}
