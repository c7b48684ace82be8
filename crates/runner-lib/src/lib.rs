//! Experiment runner library for disk-wear measurements
//!
//! This crate provides the core functionality for:
//! - Supervising a disk-intensive workload and its telemetry collectors
//! - Block-device counter snapshots and deltas
//! - Normalizing pidstat, iotop, Scaphandre and wattmeter data into
//!   canonical bytes and joules
//! - The run summary, health and observability

pub mod config;
pub mod error;
pub mod experiment;
pub mod health;
pub mod launcher;
pub mod models;
pub mod normalizer;
pub mod observability;
pub mod report;
pub mod sampler;
pub mod supervisor;

pub use config::ExperimentConfig;
pub use error::{Result, RunnerError};
pub use experiment::{Experiment, RunOutcome};
pub use health::{ComponentHealth, ComponentStatus};
pub use models::*;
pub use normalizer::{Normalizer, SourceReport};
pub use observability::{RunMetrics, StructuredLogger};
pub use report::{ExperimentSummary, RunExit, SummaryReporter};
