// Public API - runner is the primary entry point, component modules are
// exposed for callers that manage their own batching.
pub mod batch;
pub mod client;
pub mod config;
pub mod encode;
pub mod error;
pub mod label;
pub mod rows;
pub mod runner;
pub mod telemetry;

#[cfg(test)]
mod integ_tests;
