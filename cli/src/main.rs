use anyhow::Result;
use clap::Parser;
use covhub_cli::Cli;
use covhub_cli::run_command;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    run_command(cli.command).await
}
