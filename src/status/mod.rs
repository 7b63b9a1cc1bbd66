//! Operation status tracking
//!
//! Thread-safe record of each tool's lifecycle, persisted to disk after
//! every mutation so another process can answer "what happened".

pub mod store;
pub mod types;

pub use store::{StatusStore, DEFAULT_STATUS_FILE};
pub use types::{OperationResult, OperationState, OperationStatus, StatusSummary};
