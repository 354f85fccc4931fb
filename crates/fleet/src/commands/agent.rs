use async_trait::async_trait;
use eyre::{Result, eyre};
use tracing::{info, warn};

use super::Command;
use fleet_grpc::{AgentConfig, AgentRuntime};

pub struct AgentCommand {
    pub config: AgentConfig,
}

#[async_trait]
impl Command for AgentCommand {
    async fn execute(&self) -> Result<()> {
        let runtime = AgentRuntime::new(self.config.clone())
            .map_err(|e| eyre!("Failed to create agent: {}", e))?;

        let shutdown = runtime.shutdown_token();
        let _signal_task: tokio::task::JoinHandle<()> = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
            }
            shutdown.cancel();
        });

        info!(
            agent_id = runtime.agent_id(),
            coordinator = %self.config.coordinator_url,
            tick_interval = ?self.config.tick_interval,
            "Starting agent"
        );

        runtime
            .run()
            .await
            .map_err(|e| eyre!("Agent stopped: {}", e))?;

        let stats = runtime.stats();
        info!(
            connections = stats.connections(),
            sent = stats.sent(),
            received = stats.received(),
            "Agent shutdown complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentSection;
    use std::time::Duration;

    #[tokio::test]
    async fn gives_up_when_coordinator_is_unreachable() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = AgentSection {
            coordinator: Some(format!("http://127.0.0.1:{port}")),
            id: Some("edge-1".to_string()),
            max_attempts: Some(1),
            ..AgentSection::default()
        }
        .agent_config()
        .unwrap();

        let command = AgentCommand { config };
        let run = tokio::spawn(async move { command.execute().await });

        let err = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("Agent stopped"));
    }
}
