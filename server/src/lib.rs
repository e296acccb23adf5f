//! Driver library for the `relay` binary: configuration, telemetry, plan
//! ingestion and the subprocess agent runner.

pub mod config;
pub mod ingest;
pub mod runner;
pub mod telemetry;

pub use config::Config;
pub use ingest::{ingest_plan, load_plan, IngestSummary, PlanPayload};
pub use runner::ProcessRunner;
