//! Config command - show the resolved database configuration.

use crate::cli::args::ConfigArgs;
use crate::config::{DatabaseConfig, EngineOptions};
use crate::errors::DataResult;

/// Execute the config command
pub async fn execute(args: ConfigArgs) -> DataResult<()> {
    let config = DatabaseConfig::from_env()?;
    tracing::debug!(?config, "Configuration resolved");

    println!("kind: {}", config.kind);
    println!("url:  {}", config.redacted_url());

    if args.options {
        let options = EngineOptions::from_env();
        println!("options: {:?}", options);
    }
    Ok(())
}
