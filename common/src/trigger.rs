// Contract between job runners and whatever invokes them on a schedule

use async_trait::async_trait;

/// Scheduler name under which failures are logged instead of surfaced
pub const PRIVATE_SCHEDULER_NAME: &str = "Private";

/// Name of the hosted scheduler service
pub const SERVICE_SCHEDULER_NAME: &str = "IntegrationScheduler";

/// The external trigger that invoked a job run
#[async_trait]
pub trait JobTrigger: Send + Sync {
    fn scheduler_name(&self) -> &str;

    /// Stop scheduling `job_key` until it is resumed
    async fn pause_job(&self, job_key: &str);

    fn is_private(&self) -> bool {
        self.scheduler_name() == PRIVATE_SCHEDULER_NAME
    }
}
