//! scanforge - Security tool orchestration engine
//!
//! Installs, updates and runs external security CLI tools against a single
//! target with bounded parallelism, tracking every tool's lifecycle in a
//! persisted status store.
//!
//! # Architecture
//!
//! - **tools**: registry, installation manager, parallel executor, runtime
//! - **status**: thread-safe, disk-backed operation records
//! - **telemetry**: batch lifecycle events and counters
//! - **cli / logging / display**: binary-facing configuration and output

pub mod errors;
pub mod status;
pub mod tools;
pub mod telemetry;

// Re-export commonly used types
pub use errors::{Result, ScanError};

// Binary-facing layers
pub mod cli;
pub mod logging;
pub mod display;
