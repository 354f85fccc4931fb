use async_trait::async_trait;
use eyre::{Result, eyre};
use std::future::Future;
use tracing::{info, warn};

use super::Command;
use fleet_grpc::{CoordinatorHost, CoordinatorHostConfig};

pub struct CoordinatorCommand {
    pub config: CoordinatorHostConfig,
}

impl CoordinatorCommand {
    /// Serve until `shutdown` resolves, then shut the host down gracefully.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let mut host = CoordinatorHost::new(self.config.clone())
            .map_err(|e| eyre!("Failed to create coordinator: {}", e))?;
        let addr = host
            .start()
            .await
            .map_err(|e| eyre!("Failed to start coordinator: {}", e))?;

        info!(
            coordinator_id = %self.config.coordinator.coordinator_id,
            push_schedule = ?self.config.coordinator.push_schedule,
            "Coordinator listening on {}; press Ctrl+C to shut down", addr
        );

        tokio::select! {
            () = shutdown => {}
            result = host.wait() => {
                result.map_err(|e| eyre!("Coordinator server failed: {}", e))?;
                info!("Coordinator server exited");
                return Ok(());
            }
        }

        let live_sessions = host.registry().len().await;
        info!(live_sessions, "Shutdown signal received");

        host.shutdown()
            .await
            .map_err(|e| eyre!("Failed to shut down coordinator: {}", e))?;
        info!("Coordinator shutdown complete");

        Ok(())
    }
}

#[async_trait]
impl Command for CoordinatorCommand {
    async fn execute(&self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await
    }
}
