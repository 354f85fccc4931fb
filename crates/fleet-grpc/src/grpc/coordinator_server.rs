use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info};

use crate::grpc::error::GrpcError;
use crate::grpc::proto::{MessageEnvelope, coordinator_service_server};
use crate::protocol::{DispatchTable, coordinator_table};
use crate::session::{PushSchedule, SessionRegistry, SessionWorker};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Identity stamped on every envelope the coordinator sends.
    pub coordinator_id: String,
    pub push_schedule: PushSchedule,
    /// Upper bound on queueing one outbound envelope for a session.
    pub push_write_timeout: Duration,
    /// Capacity of each session's outbound queue.
    pub outbound_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            coordinator_id: "coordinator".to_string(),
            push_schedule: PushSchedule::default(),
            push_write_timeout: Duration::from_secs(5),
            outbound_buffer: 100,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), GrpcError> {
        if self.coordinator_id.is_empty() {
            return Err(GrpcError::InvalidConfig {
                reason: "coordinator_id must not be empty".to_string(),
            });
        }
        if self.outbound_buffer == 0 {
            return Err(GrpcError::InvalidConfig {
                reason: "outbound_buffer must be at least 1".to_string(),
            });
        }
        match self.push_schedule {
            PushSchedule::Every(period) if period.is_zero() => Err(GrpcError::InvalidConfig {
                reason: "push interval must be greater than zero".to_string(),
            }),
            PushSchedule::WallClockAligned { period_secs: 0 } => Err(GrpcError::InvalidConfig {
                reason: "push period must be at least one second".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// `CoordinatorService` implementation: one [`SessionWorker`] per stream.
///
/// The registry is supplied by the caller so several coordinators can run
/// side by side without sharing state.
pub struct CoordinatorServer {
    registry: Arc<SessionRegistry>,
    table: Arc<DispatchTable>,
    config: Arc<CoordinatorConfig>,
    shutdown: CancellationToken,
}

impl CoordinatorServer {
    /// Cancelling `shutdown` closes every live session.
    pub fn with_shutdown(
        registry: Arc<SessionRegistry>,
        config: CoordinatorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let table = Arc::new(coordinator_table(config.coordinator_id.clone()));
        Self {
            registry,
            table,
            config: Arc::new(config),
            shutdown,
        }
    }
}

#[tonic::async_trait]
impl coordinator_service_server::CoordinatorService for CoordinatorServer {
    type ConnectStream = ReceiverStream<Result<MessageEnvelope, Status>>;

    async fn connect(
        &self,
        request: Request<Streaming<MessageEnvelope>>,
    ) -> Result<Response<Self::ConnectStream>, Status> {
        let remote_addr = request.remote_addr();
        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));

        info!(?remote_addr, "Agent stream opened");

        let worker = SessionWorker::new(
            self.registry.clone(),
            self.table.clone(),
            self.config.clone(),
            tx,
            self.shutdown.child_token(),
        );
        let _worker_task: tokio::task::JoinHandle<()> = tokio::spawn(async move {
            let state = worker.run(inbound).await;
            debug!(?remote_addr, ?state, "Session worker exited");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
