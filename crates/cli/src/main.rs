use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::Parser;

use toolgate_cli::Cli;
use toolgate_core::config::AppConfig;

fn init_logging(config: &AppConfig) -> Result<()> {
    use toolgate_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    match config.logging.format {
        Compact => builder.compact().try_init(),
        Pretty => builder.pretty().try_init(),
        Json => builder.json().try_init(),
    }
    .map_err(|error| anyhow!("failed to initialize logging: {error}"))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Commands report config problems themselves; logging just stays off.
    if let Ok(config) = AppConfig::load(cli.load_options()) {
        init_logging(&config)?;
    }

    let result = toolgate_cli::execute(cli);
    println!("{}", result.output);
    Ok(ExitCode::from(result.exit_code))
}
