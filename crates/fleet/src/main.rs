use clap::Parser;
use eyre::Result;
use tracing::debug;

use fleet::FleetConfig;
use fleet::cli::{Cli, Commands};
use fleet::commands::{Command, agent::AgentCommand, coordinator::CoordinatorCommand};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // .env first, so FLEET_* variables from it reach the argument parser
    fleet::cli::config::load_env()?;
    let cli = Cli::parse();

    fleet::utils::tracing::init_tracing(cli.log_dir.as_deref())?;

    let file_config = match &cli.config {
        Some(path) => {
            debug!(path = %path.display(), "Loading config file");
            FleetConfig::load(path)?
        }
        None => FleetConfig::default(),
    };

    match cli.command {
        Commands::Coordinator(args) => {
            let config = file_config.coordinator.overlay(args.into()).host_config()?;
            CoordinatorCommand { config }.execute().await
        }
        Commands::Agent(args) => {
            let config = file_config.agent.overlay(args.into()).agent_config()?;
            AgentCommand { config }.execute().await
        }
    }
}
