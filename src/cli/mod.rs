//! CLI module - Command-line interface for the data-access layer.
//!
//! Provides commands for:
//! - `config` - Show the resolved database configuration
//! - `ping` - Check connectivity through a transaction scope

pub mod args;

pub use args::{Cli, Commands};
