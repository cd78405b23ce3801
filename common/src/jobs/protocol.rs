// Submit-then-poll shape shared by remote operations

use crate::errors::{JobError, PollError};
use crate::poller::{PollDecision, PollOutcome, RemoteOperationPoller};
use async_trait::async_trait;
use std::fmt;

/// A server-side operation that is submitted once and polled to completion
#[async_trait]
pub trait RemoteOperation: Send + Sync {
    type Status: fmt::Display + Send;

    /// Start the operation and return its execution id
    async fn submit(&self) -> Result<String, JobError>;

    async fn poll_status(&self, execution_id: &str) -> Result<Self::Status, JobError>;

    fn classify(&self, status: &Self::Status) -> PollDecision;

    /// Called once polling stops on a success or unrecognized status
    async fn on_terminal(
        &self,
        execution_id: &str,
        outcome: PollOutcome<Self::Status>,
    ) -> Result<(), JobError>;
}

/// Submit `operation`, poll it until it leaves the continue set, then hand the
/// outcome to [`RemoteOperation::on_terminal`]. A failure status ends the run.
pub async fn drive<O: RemoteOperation>(
    operation: &O,
    poller: &RemoteOperationPoller,
) -> Result<(), JobError> {
    let execution_id = operation.submit().await?;

    let outcome = poller
        .poll(
            &execution_id,
            |_| operation.poll_status(&execution_id),
            |status| operation.classify(status),
        )
        .await
        .map_err(|e| match e {
            PollError::Failed { status, .. } => JobError::ExecutionFailed { status },
            PollError::Fetch(inner) => *inner,
            other => JobError::Poll(other),
        })?;

    operation.on_terminal(&execution_id, outcome).await
}
