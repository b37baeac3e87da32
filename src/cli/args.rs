//! CLI argument definitions.
//!
//! Uses clap derive macros for type-safe argument parsing.

use clap::{Parser, Subcommand};

/// txscope - transaction scopes and repositories over SeaORM
#[derive(Parser, Debug)]
#[command(name = "txscope")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the database configuration resolved from the environment
    Config(ConfigArgs),

    /// Run `SELECT 1` inside a transaction scope
    Ping(PingArgs),
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Also print engine pool options
    #[arg(long)]
    pub options: bool,
}

/// Arguments for the ping command
#[derive(Parser, Debug)]
pub struct PingArgs {
    /// Run the query a second time inside a savepoint
    #[arg(long)]
    pub nested: bool,
}
