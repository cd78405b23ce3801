// Scheduler engine implementation
// Fires each enabled job on its cron schedule; one sequential loop per job.

use crate::config::{JobDefinition, SchedulerConfig};
use crate::errors::{JobExecutionError, ValidationError};
use crate::jobs::{JobOutcome, JobRunner};
use crate::schedule::JobSchedule;
use crate::trigger::JobTrigger;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Scheduler trait for job scheduling operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run every job loop until the scheduler is stopped
    async fn start(&self) -> Result<(), ValidationError>;

    /// Signal shutdown; in-flight runs observe cancellation
    async fn stop(&self);
}

/// Main scheduler engine implementation
pub struct SchedulerEngine {
    name: String,
    runner: JobRunner,
    jobs: Vec<JobDefinition>,
    paused: RwLock<HashSet<String>>,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
}

impl SchedulerEngine {
    /// Disabled jobs are dropped here and never scheduled
    pub fn new(config: &SchedulerConfig, jobs: Vec<JobDefinition>, runner: JobRunner) -> Self {
        Self {
            name: config.name.clone(),
            runner,
            jobs: jobs.into_iter().filter(|j| j.enabled).collect(),
            paused: RwLock::new(HashSet::new()),
            shutdown: CancellationToken::new(),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_seconds),
        }
    }

    /// Token cancelled by [`Scheduler::stop`]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn job_keys(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.key.as_str()).collect()
    }

    pub async fn is_paused(&self, job_key: &str) -> bool {
        self.paused.read().await.contains(job_key)
    }

    /// Resume a paused job; false when it was not paused
    pub async fn resume_job(&self, job_key: &str) -> bool {
        let resumed = self.paused.write().await.remove(job_key);
        if resumed {
            info!(job_key = job_key, scheduler = %self.name, "Job resumed");
        }
        resumed
    }

    /// Run `job_key` once, outside its schedule
    pub async fn trigger_now(
        &self,
        job_key: &str,
    ) -> Option<Result<JobOutcome, JobExecutionError>> {
        let job = self.jobs.iter().find(|j| j.key == job_key)?;
        Some(self.fire(job).await)
    }

    async fn fire(&self, job: &JobDefinition) -> Result<JobOutcome, JobExecutionError> {
        let result = self
            .runner
            .execute(job, self, self.shutdown.child_token())
            .await;
        match &result {
            Ok(outcome) => debug!(job_key = %job.key, outcome = outcome.as_str(), "Job run finished"),
            Err(e) => error!(job_key = %e.job_key, error = %e.source, "Job execution failed"),
        }
        result
    }

    #[instrument(skip_all, fields(job_key = %job.key, cron = %schedule.expression()))]
    async fn job_loop(&self, job: &JobDefinition, schedule: JobSchedule) {
        loop {
            let Some((next, wait)) = schedule.next_fire(Utc::now()) else {
                info!(job_key = %job.key, "Schedule has no further fire times");
                break;
            };
            debug!(job_key = %job.key, next_fire = %next, "Waiting for next fire time");

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }

            if self.is_paused(&job.key).await {
                debug!(job_key = %job.key, "Job is paused, skipping fire time");
                continue;
            }
            // Fire times missed while this run is in flight are skipped
            let _ = self.fire(job).await;
        }
    }
}

#[async_trait]
impl JobTrigger for SchedulerEngine {
    fn scheduler_name(&self) -> &str {
        &self.name
    }

    async fn pause_job(&self, job_key: &str) {
        if self.paused.write().await.insert(job_key.to_string()) {
            warn!(job_key = job_key, scheduler = %self.name, "Job paused");
        }
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    #[instrument(skip(self), fields(scheduler = %self.name))]
    async fn start(&self) -> Result<(), ValidationError> {
        let mut loops = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            let schedule = JobSchedule::parse(&job.cron)?;
            loops.push(self.job_loop(job, schedule));
        }

        info!(jobs = loops.len(), "Starting scheduler engine");
        join_all(loops).await;
        info!("Scheduler engine stopped");
        Ok(())
    }

    async fn stop(&self) {
        info!(scheduler = %self.name, "Stopping scheduler engine");
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{test_support, JobServices};
    use crate::trigger::{PRIVATE_SCHEDULER_NAME, SERVICE_SCHEDULER_NAME};
    use std::sync::Arc;

    fn runner() -> JobRunner {
        JobRunner::new(JobServices {
            api_factory: Arc::new(test_support::NoopFactory),
            sftp: Arc::new(test_support::NoopSftp),
            secrets: Arc::new(crate::secrets::DefaultSecretProvider),
        })
    }

    fn job(key: &str, cron: &str, enabled: bool) -> JobDefinition {
        serde_json::from_value(serde_json::json!({
            "key": key,
            "cron": cron,
            "enabled": enabled,
            "settings": {
                "pause_job_on_exception": true,
                "connection": { "aos_uri": "" }
            },
            "kind": {
                "download": {
                    "activity_id": "A1",
                    "download_success_dir": "/tmp/integration-engine-test/ok",
                    "download_errors_dir": "/tmp/integration-engine-test/err"
                }
            }
        }))
        .unwrap()
    }

    fn config(name: &str) -> SchedulerConfig {
        SchedulerConfig {
            name: name.to_string(),
            shutdown_timeout_seconds: 5,
        }
    }

    #[test]
    fn test_disabled_jobs_are_not_scheduled() {
        let engine = SchedulerEngine::new(
            &config(SERVICE_SCHEDULER_NAME),
            vec![job("a", "0 * * * * *", true), job("b", "0 * * * * *", false)],
            runner(),
        );
        assert_eq!(engine.job_keys(), vec!["a"]);
        assert!(!engine.is_private());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let engine = SchedulerEngine::new(&config(PRIVATE_SCHEDULER_NAME), Vec::new(), runner());
        assert!(engine.is_private());

        engine.pause_job("upload").await;
        assert!(engine.is_paused("upload").await);
        assert!(engine.resume_job("upload").await);
        assert!(!engine.is_paused("upload").await);
        assert!(!engine.resume_job("upload").await);
    }

    #[tokio::test]
    async fn test_start_returns_after_stop() {
        let engine = SchedulerEngine::new(
            &config(SERVICE_SCHEDULER_NAME),
            vec![job("a", "0 0 0 1 1 * 2099", true)],
            runner(),
        );
        engine.stop().await;
        let result = tokio::time::timeout(Duration::from_secs(5), engine.start()).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_cron() {
        let engine = SchedulerEngine::new(
            &config(SERVICE_SCHEDULER_NAME),
            vec![job("a", "every minute", true)],
            runner(),
        );
        assert!(matches!(
            engine.start().await,
            Err(ValidationError::InvalidCronExpression { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_run_pauses_job_and_surfaces_error() {
        let engine = SchedulerEngine::new(
            &config(SERVICE_SCHEDULER_NAME),
            vec![job("download", "0 * * * * *", true)],
            runner(),
        );
        let result = engine.trigger_now("download").await.unwrap();
        assert_eq!(result.unwrap_err().job_key, "download");
        assert!(engine.is_paused("download").await);
        assert!(engine.trigger_now("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_run_is_logged_under_private_scheduler() {
        let engine = SchedulerEngine::new(
            &config(PRIVATE_SCHEDULER_NAME),
            vec![job("download", "0 * * * * *", true)],
            runner(),
        );
        let result = engine.trigger_now("download").await.unwrap();
        assert_eq!(result.unwrap(), JobOutcome::Failed);
    }
}
