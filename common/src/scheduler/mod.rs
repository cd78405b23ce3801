// Scheduler host: cron-driven trigger for the job runners

pub mod engine;

pub use engine::{Scheduler, SchedulerEngine};
