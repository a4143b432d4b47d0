//! Build orchestration engine for Shipyard CI.
//!
//! Decides which commits need a build, drives each build through an agent
//! invocation, and recovers in-flight work after a restart:
//!
//! - [`TaskQueue`] runs build tasks with bounded concurrency
//! - [`BuildRunner`] drives one agent invocation and its state machine
//! - [`BuildRunnerService`] admits at most one runner per (project, commit)
//! - [`WorkerService`] polls providers, one loop per (project, credential)
//! - [`ReconciliationOrchestrator`] re-enqueues lost work at startup

pub mod error;
pub mod queue;
pub mod reconcile;
pub mod runner;
pub mod service;
pub mod worker;

pub use error::{SchedulerError, SchedulerResult};
pub use queue::{TaskOutcome, TaskQueue, TaskResult};
pub use reconcile::{ReconcileReport, ReconciliationOrchestrator};
pub use runner::{BuildOutput, BuildRunner, RunOutcome, RunnerFactory, RunnerParams};
pub use service::{Admission, BuildRunnerService, RunnerKey, RunnerSnapshot};
pub use worker::{WorkerService, WorkerSnapshot};
