use crate::grpc::error::GrpcError;
type Result<T> = std::result::Result<T, GrpcError>;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info};

use crate::grpc::coordinator_server::{CoordinatorConfig, CoordinatorServer};
use crate::session::SessionRegistry;
use fleet_proto::agent::v1::coordinator_service_server::CoordinatorServiceServer;

#[derive(Debug, Clone)]
pub struct CoordinatorHostConfig {
    pub bind_addr: SocketAddr,
    pub coordinator: CoordinatorConfig,
}

impl CoordinatorHostConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            coordinator: CoordinatorConfig::default(),
        }
    }
}

/// Owns the listening socket and the server task for one coordinator.
pub struct CoordinatorHost {
    registry: Arc<SessionRegistry>,
    server_handle: Option<JoinHandle<Result<()>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    sessions_shutdown: CancellationToken,
    local_addr: Option<SocketAddr>,
    config: CoordinatorHostConfig,
}

impl CoordinatorHost {
    pub fn new(config: CoordinatorHostConfig) -> Result<Self> {
        Self::with_registry(config, Arc::new(SessionRegistry::new()))
    }

    pub fn with_registry(
        config: CoordinatorHostConfig,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self> {
        config.coordinator.validate()?;

        info!(
            "CoordinatorHost initialized as {:?}",
            config.coordinator.coordinator_id
        );

        Ok(Self {
            registry,
            server_handle: None,
            shutdown_tx: None,
            sessions_shutdown: CancellationToken::new(),
            local_addr: None,
            config,
        })
    }

    /// Bind and start serving. Returns the bound address, which differs from
    /// the configured one when port 0 was requested.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.server_handle.is_some() {
            return Err(GrpcError::InvalidState {
                reason: "Server is already running".to_string(),
            });
        }

        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GrpcError::BindFailed { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| GrpcError::BindFailed { addr, source })?;

        let service = CoordinatorServer::with_shutdown(
            self.registry.clone(),
            self.config.coordinator.clone(),
            self.sessions_shutdown.clone(),
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        info!("Starting gRPC server on {}", local_addr);

        let server_handle = tokio::spawn(async move {
            Server::builder()
                .add_service(CoordinatorServiceServer::new(service))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    shutdown_rx.await.ok();
                    info!("gRPC server shutdown signal received");
                })
                .await
                .map_err(GrpcError::ConnectionFailed)
        });

        self.server_handle = Some(server_handle);
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        info!("gRPC server listening on {}", local_addr);
        Ok(local_addr)
    }

    pub async fn shutdown(mut self) -> Result<()> {
        info!("Initiating CoordinatorHost shutdown");

        // Agent streams are long-lived; end them so graceful shutdown can finish.
        self.sessions_shutdown.cancel();

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(server_handle) = self.server_handle.take() {
            match server_handle.await {
                Ok(Ok(())) => info!("gRPC server shut down successfully"),
                Ok(Err(e)) => error!("gRPC server error during shutdown: {}", e),
                Err(e) => error!("Failed to join server task: {}", e),
            }
        }

        info!("CoordinatorHost shutdown complete");
        Ok(())
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub async fn wait(&mut self) -> Result<()> {
        if let Some(server_handle) = &mut self.server_handle {
            match server_handle.await {
                Ok(result) => result,
                Err(e) => Err(GrpcError::StreamError(format!("Server task panicked: {e}"))),
            }
        } else {
            Err(GrpcError::InvalidState {
                reason: "Server is not running".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> CoordinatorHostConfig {
        CoordinatorHostConfig::new("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn test_coordinator_host_creation() {
        let host = CoordinatorHost::new(create_test_config()).unwrap();
        assert!(host.registry().is_empty().await);
        assert!(host.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_coordinator_host_lifecycle() {
        let mut host = CoordinatorHost::new(create_test_config()).unwrap();

        let addr = host.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(host.local_addr(), Some(addr));

        let err = host.start().await.unwrap_err();
        assert!(matches!(err, GrpcError::InvalidState { .. }));

        host.shutdown().await.unwrap();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = create_test_config();
        config.coordinator.outbound_buffer = 0;
        assert!(matches!(
            CoordinatorHost::new(config),
            Err(GrpcError::InvalidConfig { .. })
        ));
    }
}
