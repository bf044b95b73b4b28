//! Cadence - mastery progression and habit-service sync engine
//!
//! Cadence tracks a learner's progress across ordered curriculum units,
//! derives a gamified state (unlock levels, daily goals) from
//! spaced-repetition review counts, and pushes the daily verdict to a
//! third-party habit service, while protecting the per-user credentials
//! those services require.
//!
//! ## Services
//!
//! - **Progression**: pure unit-status and level derivation from mastery counts
//! - **Outcome**: pure daily pass/fail verdict and quantized scoring signal
//! - **Vault**: encrypted, versioned credential storage with key rotation
//! - **Tokens**: digest-only bearer token lifecycle for programmatic access
//! - **Sync**: per-user batch orchestration with isolation, dry-run, and retry
//! - **State**: crash-safe JSON snapshot per learner

pub mod clients;
pub mod config;
pub mod db;
pub mod outcome;
pub mod progression;
pub mod state;
pub mod sync;
pub mod tokens;
pub mod types;
pub mod vault;

pub use config::Args;
pub use sync::{BatchSummary, Orchestrator};
pub use types::{CadenceError, Result};
