//! Video styling worker.
//!
//! This crate provides:
//! - The job runner (chunk planning, encoding, concatenation, whole-job retry)
//! - The in-memory progress store and its background sweeper
//! - The persistence collaborator trait and an in-memory implementation
//! - Status queries and the health report

pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod runner;
pub mod status;
pub mod store;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use health::{HealthLevel, HealthReport};
pub use logging::JobLogger;
pub use progress::{spawn_sweeper, ProgressStore};
pub use retry::RetryPolicy;
pub use runner::{JobReport, JobRunner};
pub use status::{SnapshotSource, StatusService, StatusSnapshot};
pub use store::{InMemoryJobStore, JobStore, StatusUpdate};
