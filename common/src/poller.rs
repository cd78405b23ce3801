// Bounded polling of asynchronous remote operations

use crate::errors::{JobError, PollError};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Attempt ceiling used for status and package URL checks
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 100;

/// Classification of one observed status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    Continue,
    Success,
    Failure,
    Unrecognized,
}

/// Status strings grouped by outcome
#[derive(Debug, Clone, Copy)]
pub struct StatusTable {
    pub continue_on: &'static [&'static str],
    pub success: &'static [&'static str],
    pub failure: &'static [&'static str],
}

impl StatusTable {
    pub fn classify(&self, status: &str) -> PollDecision {
        if self.continue_on.contains(&status) {
            PollDecision::Continue
        } else if self.success.contains(&status) {
            PollDecision::Success
        } else if self.failure.contains(&status) {
            PollDecision::Failure
        } else {
            PollDecision::Unrecognized
        }
    }
}

/// Execution summary statuses of package import/export.
/// "Bad request" is polled again, not treated as a failure.
pub const EXECUTION_STATUS_TABLE: StatusTable = StatusTable {
    continue_on: &["NotRun", "Executing", "Bad request"],
    success: &["Succeeded", "PartiallySucceeded"],
    failure: &["Unknown", "Failed", "Canceled"],
};

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(Duration::ZERO, DEFAULT_MAX_POLL_ATTEMPTS)
    }
}

/// In-memory progress of one poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOperationHandle {
    pub execution_id: String,
    pub attempt: u32,
    pub last_status: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<S> {
    /// The status reached the success set
    Completed {
        status: S,
        handle: RemoteOperationHandle,
    },
    /// The status is in no set; polling stops without raising
    Unrecognized {
        status: S,
        handle: RemoteOperationHandle,
    },
}

impl<S> PollOutcome<S> {
    pub fn handle(&self) -> &RemoteOperationHandle {
        match self {
            PollOutcome::Completed { handle, .. } | PollOutcome::Unrecognized { handle, .. } => {
                handle
            }
        }
    }
}

pub struct RemoteOperationPoller {
    config: PollConfig,
    cancel: CancellationToken,
    job_key: String,
}

impl RemoteOperationPoller {
    pub fn new(config: PollConfig, job_key: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            config,
            cancel,
            job_key: job_key.into(),
        }
    }

    /// Fetch the status until it leaves the continue set.
    ///
    /// The first fetch is immediate; every later one waits `delay` first.
    /// `fetch` receives the zero-based attempt index. A status that is still
    /// in the continue set after `max_attempts` fetches exhausts the poll.
    pub async fn poll<S, F, Fut, C>(
        &self,
        execution_id: &str,
        mut fetch: F,
        classify: C,
    ) -> Result<PollOutcome<S>, PollError>
    where
        S: fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<S, JobError>>,
        C: Fn(&S) -> PollDecision,
    {
        let mut handle = RemoteOperationHandle {
            execution_id: execution_id.to_string(),
            attempt: 0,
            last_status: String::new(),
        };

        loop {
            if handle.attempt > 0 && !self.config.delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(PollError::Cancelled),
                    _ = tokio::time::sleep(self.config.delay) => {}
                }
            }
            if self.cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }

            let status = fetch(handle.attempt).await.map_err(|e| {
                if e.is_cancelled() {
                    PollError::Cancelled
                } else {
                    PollError::Fetch(Box::new(e))
                }
            })?;
            handle.attempt += 1;
            handle.last_status = status.to_string();

            debug!(
                job_key = %self.job_key,
                execution_id = %handle.execution_id,
                attempt = handle.attempt,
                status = %handle.last_status,
                "Checked remote operation status"
            );

            match classify(&status) {
                PollDecision::Continue => {
                    if handle.attempt >= self.config.max_attempts {
                        return Err(PollError::Exhausted {
                            attempts: handle.attempt,
                            last_status: handle.last_status,
                        });
                    }
                }
                PollDecision::Success => {
                    info!(
                        job_key = %self.job_key,
                        execution_id = %handle.execution_id,
                        attempts = handle.attempt,
                        status = %handle.last_status,
                        "Remote operation completed"
                    );
                    return Ok(PollOutcome::Completed { status, handle });
                }
                PollDecision::Failure => {
                    return Err(PollError::Failed {
                        status: handle.last_status,
                        attempts: handle.attempt,
                    });
                }
                PollDecision::Unrecognized => {
                    return Ok(PollOutcome::Unrecognized { status, handle });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn poller(max_attempts: u32) -> RemoteOperationPoller {
        RemoteOperationPoller::new(
            PollConfig::new(Duration::ZERO, max_attempts),
            "export-test",
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_execution_status_table() {
        let table = EXECUTION_STATUS_TABLE;
        assert_eq!(table.classify("Executing"), PollDecision::Continue);
        assert_eq!(table.classify("Bad request"), PollDecision::Continue);
        assert_eq!(table.classify("PartiallySucceeded"), PollDecision::Success);
        assert_eq!(table.classify("Canceled"), PollDecision::Failure);
        assert_eq!(table.classify("Whatever"), PollDecision::Unrecognized);
    }

    #[tokio::test]
    async fn test_exhausts_after_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let result = poller(100)
            .poll(
                "exec-1",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, JobError>("Executing".to_string()) }
                },
                |s: &String| EXECUTION_STATUS_TABLE.classify(s),
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 100);
        match result {
            Err(PollError::Exhausted {
                attempts,
                last_status,
            }) => {
                assert_eq!(attempts, 100);
                assert_eq!(last_status, "Executing");
            }
            other => panic!("unexpected result: {:?}", other.map(|o| o.handle().clone())),
        }
    }

    #[tokio::test]
    async fn test_completes_on_success_status() {
        let statuses = ["NotRun", "Executing", "Succeeded"];
        let result = poller(10)
            .poll(
                "exec-2",
                |attempt| async move { Ok::<_, JobError>(statuses[attempt as usize].to_string()) },
                |s: &String| EXECUTION_STATUS_TABLE.classify(s),
            )
            .await
            .unwrap();

        assert_eq!(result.handle().attempt, 3);
        assert!(matches!(result, PollOutcome::Completed { ref status, .. } if status == "Succeeded"));
    }

    #[tokio::test]
    async fn test_failure_status_surfaces_error() {
        let result = poller(10)
            .poll(
                "exec-3",
                |_| async { Ok::<_, JobError>("Failed".to_string()) },
                |s: &String| EXECUTION_STATUS_TABLE.classify(s),
            )
            .await;
        assert!(matches!(result, Err(PollError::Failed { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_unrecognized_status_stops_without_error() {
        let result = poller(10)
            .poll(
                "exec-4",
                |_| async { Ok::<_, JobError>("Mystery".to_string()) },
                |s: &String| EXECUTION_STATUS_TABLE.classify(s),
            )
            .await
            .unwrap();
        assert!(matches!(result, PollOutcome::Unrecognized { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_during_delay() {
        let cancel = CancellationToken::new();
        let poller = RemoteOperationPoller::new(
            PollConfig::new(Duration::from_secs(3600), 5),
            "export-test",
            cancel.clone(),
        );
        let calls = AtomicU32::new(0);
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            }
        });

        let result = poller
            .poll(
                "exec-5",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, JobError>("Executing".to_string()) }
                },
                |s: &String| EXECUTION_STATUS_TABLE.classify(s),
            )
            .await;
        handle.await.unwrap();

        assert!(matches!(result, Err(PollError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
