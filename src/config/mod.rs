//! Database configuration module
//!
//! Resolves the target database from environment variables and assembles
//! connection URLs and engine options.

mod constants;
mod settings;

pub use constants::*;
pub use settings::{DatabaseConfig, DbKind, EngineOptions};
