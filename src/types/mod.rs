//! Shared types for Cadence

mod error;
mod extension;

pub use error::{CadenceError, Result};
pub use extension::Extension;
