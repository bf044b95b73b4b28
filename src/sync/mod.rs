//! Batch sync: retry policy and the per-user orchestration pipeline.

pub mod orchestrator;
pub mod retry;

pub use orchestrator::{BatchSummary, Orchestrator, SyncSettings, SyncStatus, UserSyncReport};
pub use retry::{with_retry, RetryPolicy};
