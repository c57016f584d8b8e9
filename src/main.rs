use anyhow::Result;
use clap::Parser;
use leave_tracker::cli::Cli;
use leave_tracker::config::AppConfig;
use leave_tracker::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    cli.run(config).await
}
