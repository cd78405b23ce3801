// Common library: everything the scheduler binary hosts

pub mod client;
pub mod config;
pub mod errors;
pub mod file_store;
pub mod jobs;
pub mod models;
pub mod poller;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod secrets;
pub mod sftp;
pub mod telemetry;
pub mod transport;
pub mod trigger;
