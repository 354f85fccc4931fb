//! Coordinator-side session state.
//!
//! A [`Session`] exists for exactly as long as one agent stream is open. The
//! [`SessionWorker`] driving that stream owns it; the [`SessionRegistry`] only
//! holds weak references for lookup.

pub mod push;
pub mod registry;
pub mod worker;

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::grpc::conversions::envelope_to_proto;
use crate::grpc::error::GrpcError;
use crate::grpc::proto;
use crate::protocol::Envelope;

pub use push::{PushSchedule, PushTask};
pub use registry::SessionRegistry;
pub use worker::{SessionState, SessionWorker};

/// Sending half of a session's outbound queue. The receiving half is the
/// response stream tonic writes to the agent, so this queue is the only
/// writer on the stream.
pub type OutboundSender = mpsc::Sender<Result<proto::MessageEnvelope, Status>>;

#[derive(Debug)]
pub struct Session {
    agent_id: String,
    outbound: OutboundSender,
    periodic: CancellationToken,
    connected_at: DateTime<Utc>,
    messages_received: AtomicU64,
}

impl Session {
    pub fn new(agent_id: impl Into<String>, outbound: OutboundSender) -> Self {
        Self {
            agent_id: agent_id.into(),
            outbound,
            periodic: CancellationToken::new(),
            connected_at: Utc::now(),
            messages_received: AtomicU64::new(0),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub(crate) fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Token cancelled when the session closes; the periodic push task
    /// listens on it.
    pub fn periodic_token(&self) -> CancellationToken {
        self.periodic.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.periodic.is_cancelled()
    }

    pub(crate) fn close(&self) {
        self.periodic.cancel();
    }

    /// Queue an envelope, giving up if the queue stays full for `timeout`.
    pub async fn send_timeout(
        &self,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<(), GrpcError> {
        match self
            .outbound
            .send_timeout(Ok(envelope_to_proto(envelope)), timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(GrpcError::SendFailed {
                message_type: envelope.message_type().to_string(),
            }),
            Err(SendTimeoutError::Timeout(_)) => Err(GrpcError::StreamError(format!(
                "timed out after {timeout:?} queueing {} for {}",
                envelope.message_type(),
                self.agent_id
            ))),
        }
    }
}
