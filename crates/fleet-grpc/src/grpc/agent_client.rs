use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::transport::Endpoint;
use tonic::{Request, Status};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::grpc::conversions::{envelope_to_proto, proto_to_envelope};
use crate::grpc::error::GrpcError;
use crate::grpc::proto::{self, coordinator_service_client::CoordinatorServiceClient};
use crate::protocol::{DispatchTable, Envelope, MessageType, agent_table};

type GrpcResult<T> = std::result::Result<T, GrpcError>;

/// Sent in this order, once per connection, before any periodic message.
pub const STARTUP_SEQUENCE: [MessageType; 5] = [
    MessageType::Connect,
    MessageType::Init,
    MessageType::Register,
    MessageType::ConfigRequest,
    MessageType::StatusReport,
];

/// Periodic message kinds; tick `n` (starting at 1) sends `ROTATION[(n - 1) % 6]`.
pub const ROTATION: [MessageType; 6] = [
    MessageType::Ping,
    MessageType::Heartbeat,
    MessageType::Log,
    MessageType::Metric,
    MessageType::Event,
    MessageType::Alert,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
    /// Consecutive failed connections before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    /// e.g. `http://127.0.0.1:50051`
    pub coordinator_url: String,
    pub tick_interval: Duration,
    pub outbound_buffer: usize,
    pub reconnect: ReconnectPolicy,
}

impl AgentConfig {
    pub fn new(agent_id: impl Into<String>, coordinator_url: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            coordinator_url: coordinator_url.into(),
            tick_interval: Duration::from_secs(10),
            outbound_buffer: 32,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn generated_agent_id() -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("agent-{}", &id[..8])
    }

    pub fn validate(&self) -> GrpcResult<()> {
        if self.agent_id.is_empty() {
            return Err(GrpcError::InvalidConfig {
                reason: "agent_id must not be empty".to_string(),
            });
        }
        if self.tick_interval.is_zero() {
            return Err(GrpcError::InvalidConfig {
                reason: "tick_interval must be greater than zero".to_string(),
            });
        }
        if self.outbound_buffer == 0 {
            return Err(GrpcError::InvalidConfig {
                reason: "outbound_buffer must be at least 1".to_string(),
            });
        }
        Endpoint::from_shared(self.coordinator_url.clone()).map_err(|e| {
            GrpcError::InvalidConfig {
                reason: format!("invalid coordinator url {:?}: {e}", self.coordinator_url),
            }
        })?;
        Ok(())
    }
}

pub fn startup_envelope(agent_id: &str, message_type: MessageType) -> Envelope {
    let content = match message_type {
        MessageType::Connect => format!("agent {agent_id} connecting"),
        MessageType::Init => "initialization complete".to_string(),
        MessageType::Register => format!(
            "agent_type=cloud,version={}",
            env!("CARGO_PKG_VERSION")
        ),
        MessageType::ConfigRequest => "requesting configuration".to_string(),
        MessageType::StatusReport => "running".to_string(),
        ref other => other.as_str().to_string(),
    };
    Envelope::new(agent_id, message_type, content)
}

pub fn periodic_kind(counter: u64) -> MessageType {
    let index = (counter.saturating_sub(1) % ROTATION.len() as u64) as usize;
    ROTATION[index].clone()
}

/// Envelope for periodic tick `counter`, with a payload derived from it.
pub fn periodic_envelope(agent_id: &str, counter: u64) -> Envelope {
    let kind = periodic_kind(counter);
    let content = match kind {
        MessageType::Ping => "ping".to_string(),
        MessageType::Heartbeat => "heartbeat".to_string(),
        MessageType::Log => format!("log message #{counter}"),
        MessageType::Metric => format!(
            "cpu_usage={},memory_usage={},disk_usage={}",
            counter % 100,
            counter.wrapping_mul(2) % 100,
            counter.wrapping_mul(3) % 100
        ),
        MessageType::Event => format!("event #{counter}"),
        MessageType::Alert => format!("alert #{counter}"),
        ref other => other.as_str().to_string(),
    };
    Envelope::new(agent_id, kind, content)
}

/// Counters for one agent runtime, shared with its processes.
#[derive(Debug, Default)]
pub struct AgentStats {
    welcomed: AtomicBool,
    sent: AtomicU64,
    received: AtomicU64,
    connections: AtomicU64,
}

impl AgentStats {
    pub fn welcomed(&self) -> bool {
        self.welcomed.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }
}

async fn send_envelope(
    outbound: &mpsc::Sender<proto::MessageEnvelope>,
    envelope: &Envelope,
    stats: &AgentStats,
) -> GrpcResult<()> {
    outbound
        .send(envelope_to_proto(envelope))
        .await
        .map_err(|_| GrpcError::SendFailed {
            message_type: envelope.message_type().to_string(),
        })?;
    stats.sent.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

/// Send process: startup sequence, then one rotating message per tick.
///
/// Returns only on a failed send, which means the stream is gone.
pub async fn run_send_process(
    agent_id: &str,
    outbound: mpsc::Sender<proto::MessageEnvelope>,
    tick_interval: Duration,
    stats: &AgentStats,
) -> GrpcResult<()> {
    for message_type in STARTUP_SEQUENCE {
        let envelope = startup_envelope(agent_id, message_type);
        if let Err(e) = send_envelope(&outbound, &envelope, stats).await {
            error!(agent_id, "Startup sequence aborted: {}", e);
            return Err(e);
        }
        debug!(agent_id, message_type = %envelope.message_type(), "Sent startup message");
    }
    info!(agent_id, "Startup sequence sent");

    let start = tokio::time::Instant::now() + tick_interval;
    let mut ticker = tokio::time::interval_at(start, tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut counter: u64 = 0;
    loop {
        ticker.tick().await;
        counter += 1;
        let envelope = periodic_envelope(agent_id, counter);
        send_envelope(&outbound, &envelope, stats).await?;
        debug!(agent_id, counter, message_type = %envelope.message_type(), "Sent periodic message");
    }
}

/// Receive process: dispatch every inbound envelope and queue any reply.
///
/// Returns when the stream errors or ends.
pub async fn run_receive_process<S>(
    table: &DispatchTable,
    mut inbound: S,
    outbound: mpsc::Sender<proto::MessageEnvelope>,
    stats: &AgentStats,
) -> GrpcResult<()>
where
    S: Stream<Item = Result<proto::MessageEnvelope, Status>> + Unpin,
{
    while let Some(result) = inbound.next().await {
        let message = result.map_err(|status| GrpcError::CallFailed(Box::new(status)))?;
        let envelope = proto_to_envelope(message);
        stats.received.fetch_add(1, Ordering::Relaxed);

        debug!(
            from = envelope.agent_id(),
            message_type = %envelope.message_type(),
            content = envelope.content(),
            "Received coordinator message"
        );

        if *envelope.message_type() == MessageType::Welcome {
            stats.welcomed.store(true, Ordering::Relaxed);
        }

        if let Some(reply) = table.dispatch(&envelope)
            && let Err(e) = send_envelope(&outbound, &reply, stats).await
        {
            warn!(message_type = %reply.message_type(), "Failed to send reply: {}", e);
        }
    }
    Err(GrpcError::StreamClosed)
}

/// Agent side of the protocol: one stream at a time, reconnecting with
/// backoff when it ends.
pub struct AgentRuntime {
    config: AgentConfig,
    table: Arc<DispatchTable>,
    stats: Arc<AgentStats>,
    shutdown: CancellationToken,
}

impl AgentRuntime {
    pub fn new(config: AgentConfig) -> GrpcResult<Self> {
        config.validate()?;
        let table = Arc::new(agent_table(config.agent_id.clone(), Instant::now()));
        Ok(Self {
            config,
            table,
            stats: Arc::new(AgentStats::default()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    pub fn stats(&self) -> Arc<AgentStats> {
        self.stats.clone()
    }

    /// Cancelling this token stops [`AgentRuntime::run`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until shut down, or until the reconnect policy gives up.
    pub async fn run(&self) -> GrpcResult<()> {
        let policy = &self.config.reconnect;
        let mut failures: u32 = 0;

        loop {
            self.stats.welcomed.store(false, Ordering::Relaxed);

            let error = tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!(agent_id = %self.config.agent_id, "Agent shutting down");
                    return Ok(());
                }
                error = self.run_connection() => error,
            };

            if self.stats.welcomed() {
                failures = 0;
            }
            failures = failures.saturating_add(1);

            if let Some(max_attempts) = policy.max_attempts
                && failures >= max_attempts
            {
                error!(
                    agent_id = %self.config.agent_id,
                    failures,
                    "Giving up on coordinator connection: {}", error
                );
                return Err(error);
            }

            let delay = policy.backoff(failures);
            warn!(
                agent_id = %self.config.agent_id,
                ?delay,
                failures,
                "Connection to coordinator ended: {}; reconnecting", error
            );

            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!(agent_id = %self.config.agent_id, "Agent shutting down");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One connection: runs both processes until either ends, and returns
    /// the error that ended it.
    async fn run_connection(&self) -> GrpcError {
        match self.try_run_connection().await {
            Ok(never) => match never {},
            Err(e) => e,
        }
    }

    async fn try_run_connection(&self) -> GrpcResult<std::convert::Infallible> {
        info!(
            agent_id = %self.config.agent_id,
            "Connecting to coordinator at {}", self.config.coordinator_url
        );

        let channel = Endpoint::from_shared(self.config.coordinator_url.clone())?
            .tcp_nodelay(true)
            .connect()
            .await?;
        let mut client = CoordinatorServiceClient::new(channel);

        // Every outbound envelope goes through this queue; tonic drains it as
        // the request stream, so the stream has a single writer.
        let (tx, rx) = mpsc::channel::<proto::MessageEnvelope>(self.config.outbound_buffer);
        let response = client
            .connect(Request::new(ReceiverStream::new(rx)))
            .await
            .map_err(Box::new)?;
        let inbound = response.into_inner();

        self.stats.connections.fetch_add(1, Ordering::Relaxed);
        info!(agent_id = %self.config.agent_id, "Stream to coordinator opened");

        let result = tokio::select! {
            result = run_receive_process(&self.table, inbound, tx.clone(), &self.stats) => result,
            result = run_send_process(&self.config.agent_id, tx, self.config.tick_interval, &self.stats) => result,
        };

        match result {
            Ok(()) => Err(GrpcError::StreamClosed),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_cycles_through_six_kinds() {
        let kinds: Vec<MessageType> = (1..=12).map(periodic_kind).collect();
        let expected: Vec<MessageType> = ROTATION.iter().chain(ROTATION.iter()).cloned().collect();
        assert_eq!(kinds, expected);
    }

    #[test]
    fn periodic_payloads_derive_from_counter() {
        assert_eq!(periodic_envelope("a1", 1).content(), "ping");
        assert_eq!(periodic_envelope("a1", 3).content(), "log message #3");
        assert_eq!(
            periodic_envelope("a1", 4).content(),
            "cpu_usage=4,memory_usage=8,disk_usage=12"
        );
        assert_eq!(periodic_envelope("a1", 11).content(), "event #11");
        assert_eq!(periodic_envelope("a1", 12).content(), "alert #12");
        assert_eq!(periodic_envelope("a1", 12).agent_id(), "a1");
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(6), Duration::from_secs(30));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn config_validation() {
        AgentConfig::new("a1", "http://127.0.0.1:50051")
            .validate()
            .unwrap();

        let mut config = AgentConfig::new("", "http://127.0.0.1:50051");
        assert!(config.validate().is_err());

        config.agent_id = "a1".to_string();
        config.tick_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let config = AgentConfig::new("a1", "not a url");
        assert!(config.validate().is_err());
    }

    #[test]
    fn generated_ids_are_prefixed() {
        let id = AgentConfig::generated_agent_id();
        assert!(id.starts_with("agent-"));
        assert_eq!(id.len(), "agent-".len() + 8);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_sequence_precedes_periodic_messages() {
        let (tx, mut rx) = mpsc::channel(32);
        let stats = Arc::new(AgentStats::default());
        let task_stats = stats.clone();
        let sender = tokio::spawn(async move {
            run_send_process("a1", tx, Duration::from_secs(10), &task_stats).await
        });

        let mut sent = Vec::new();
        for _ in 0..11 {
            sent.push(rx.recv().await.unwrap());
        }

        let types: Vec<&str> = sent.iter().map(|m| m.message_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "connect",
                "init",
                "register",
                "config_request",
                "status_report",
                "ping",
                "heartbeat",
                "log",
                "metric",
                "event",
                "alert",
            ]
        );
        assert!(sent.iter().all(|m| m.agent_id == "a1"));

        drop(rx);
        let result = sender.await.unwrap();
        assert!(matches!(result, Err(GrpcError::SendFailed { .. })));
        assert!(stats.sent() >= 11);
    }

    #[tokio::test]
    async fn startup_aborts_on_first_failed_send() {
        let (tx, rx) = mpsc::channel(32);
        drop(rx);
        let stats = AgentStats::default();

        let result = run_send_process("a1", tx, Duration::from_secs(10), &stats).await;
        assert!(matches!(
            result,
            Err(GrpcError::SendFailed { ref message_type }) if message_type == "connect"
        ));
        assert_eq!(stats.sent(), 0);
    }

    #[tokio::test]
    async fn receive_process_replies_through_outbound_queue() {
        let table = agent_table("a1", Instant::now());
        let inbound = tokio_stream::iter(vec![
            Ok(envelope_to_proto(&Envelope::new("coordinator", MessageType::Welcome, "hi"))),
            Ok(envelope_to_proto(&Envelope::new("coordinator", MessageType::Heartbeat, ""))),
            Ok(envelope_to_proto(&Envelope::new(
                "coordinator",
                MessageType::Other("firmware_update".into()),
                "",
            ))),
            Ok(envelope_to_proto(&Envelope::new("coordinator", MessageType::ConfigUpdate, "x=1"))),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let stats = AgentStats::default();

        let result = run_receive_process(&table, inbound, tx, &stats).await;
        assert!(matches!(result, Err(GrpcError::StreamClosed)));
        assert!(stats.welcomed());
        assert_eq!(stats.received(), 4);

        assert_eq!(rx.recv().await.unwrap().message_type, "heartbeat_ack");
        assert_eq!(rx.recv().await.unwrap().message_type, "config_ack");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn receive_error_ends_the_process() {
        let table = agent_table("a1", Instant::now());
        let inbound = tokio_stream::iter(vec![Err(Status::unavailable("reset"))]);
        let (tx, _rx) = mpsc::channel(8);
        let stats = AgentStats::default();

        let result = run_receive_process(&table, inbound, tx, &stats).await;
        assert!(matches!(result, Err(GrpcError::CallFailed(_))));
    }
}
