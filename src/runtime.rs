//! Runtime glue: validated options, error types, telemetry and the
//! process-level runner.

pub mod config;
pub mod error;
pub mod runner;
pub mod telemetry;
