//! Fleet monitor: liveness tracking, bulk sensor ingestion and telemetry
//! aggregation for a rover fleet dashboard.

pub mod aggregate;
pub mod alerts;
pub mod batching;
pub mod config;
pub mod db;
pub mod errors;
pub mod ingest;
pub mod liveness;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod pg_store;
pub mod rest;
pub mod store;
pub mod validate;

pub use errors::{Error, Result};
pub use store::FleetStore;
