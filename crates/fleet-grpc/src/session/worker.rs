use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, error, info, warn};

use super::push::PushTask;
use super::registry::SessionRegistry;
use super::{OutboundSender, Session};
use crate::grpc::conversions::proto_to_envelope;
use crate::grpc::coordinator_server::CoordinatorConfig;
use crate::grpc::error::GrpcError;
use crate::grpc::proto;
use crate::protocol::{DispatchTable, Envelope, welcome_envelope};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingIdentity,
    Active,
    Closed,
}

/// Drives one agent stream from open to close.
///
/// The first envelope names the agent: the worker creates and registers the
/// session, starts its periodic push and replies with `welcome`. Every
/// envelope, the first included, then goes through the dispatch table. Any
/// receive error or end of stream closes the session; nothing is retried.
pub struct SessionWorker {
    registry: Arc<SessionRegistry>,
    table: Arc<DispatchTable>,
    config: Arc<CoordinatorConfig>,
    outbound: OutboundSender,
    shutdown: CancellationToken,
    state: SessionState,
}

struct ActiveSession {
    session: Arc<Session>,
    push: PushTask,
}

impl SessionWorker {
    pub fn new(
        registry: Arc<SessionRegistry>,
        table: Arc<DispatchTable>,
        config: Arc<CoordinatorConfig>,
        outbound: OutboundSender,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            table,
            config,
            outbound,
            shutdown,
            state: SessionState::AwaitingIdentity,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run until the stream ends. Returns the final state, always `Closed`.
    pub async fn run<S>(mut self, mut inbound: S) -> SessionState
    where
        S: Stream<Item = Result<proto::MessageEnvelope, Status>> + Unpin,
    {
        let Some(active) = self.await_identity(&mut inbound).await else {
            self.state = SessionState::Closed;
            return self.state;
        };
        self.state = SessionState::Active;
        let agent_id = active.session.agent_id().to_string();

        loop {
            let next = tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!(agent_id = %agent_id, "Coordinator shutting down; closing session");
                    break;
                }
                next = inbound.next() => next,
            };

            match next {
                Some(Ok(message)) => {
                    self.handle(&active.session, proto_to_envelope(message))
                        .await;
                }
                Some(Err(status)) => {
                    error!(agent_id = %agent_id, "Error receiving agent message: {}", status);
                    break;
                }
                None => {
                    info!(agent_id = %agent_id, "Agent stream closed");
                    break;
                }
            }
        }

        self.close(active).await;
        self.state
    }

    async fn await_identity<S>(&mut self, inbound: &mut S) -> Option<ActiveSession>
    where
        S: Stream<Item = Result<proto::MessageEnvelope, Status>> + Unpin,
    {
        let first = tokio::select! {
            () = self.shutdown.cancelled() => return None,
            first = inbound.next() => first,
        };

        let envelope = match first {
            Some(Ok(message)) => proto_to_envelope(message),
            Some(Err(status)) => {
                error!("Error receiving first agent message: {}", status);
                return None;
            }
            None => {
                debug!("Stream closed before the agent identified itself");
                return None;
            }
        };

        if !envelope.has_identity() {
            warn!(
                message_type = %envelope.message_type(),
                "Rejecting stream: first message carried no agent id"
            );
            let _ = self
                .outbound
                .send(Err(GrpcError::MissingIdentity.into()))
                .await;
            return None;
        }

        let session = Arc::new(Session::new(envelope.agent_id(), self.outbound.clone()));
        if let Some(displaced) = self.registry.register(&session).await {
            warn!(
                agent_id = session.agent_id(),
                displaced_connected_at = %displaced.connected_at(),
                "Agent reconnected while a previous session was live; replacing registry entry"
            );
        }
        info!(agent_id = session.agent_id(), "Session established");

        let push = PushTask::spawn(
            session.clone(),
            Arc::from(self.config.coordinator_id.as_str()),
            self.config.push_schedule,
            self.config.push_write_timeout,
        );

        let welcome = welcome_envelope(&self.config.coordinator_id, session.agent_id());
        self.reply(&session, &welcome).await;

        self.handle(&session, envelope).await;
        Some(ActiveSession { session, push })
    }

    async fn handle(&self, session: &Session, envelope: Envelope) {
        session.record_received();
        debug!(
            agent_id = envelope.agent_id(),
            message_type = %envelope.message_type(),
            content = envelope.content(),
            "Received agent message"
        );

        if envelope.agent_id() != session.agent_id() && envelope.has_identity() {
            warn!(
                session_agent_id = session.agent_id(),
                envelope_agent_id = envelope.agent_id(),
                "Envelope agent id does not match the session"
            );
        }

        if let Some(reply) = self.table.dispatch(&envelope) {
            self.reply(session, &reply).await;
        }
    }

    async fn reply(&self, session: &Session, envelope: &Envelope) {
        if let Err(e) = session
            .send_timeout(envelope, self.config.push_write_timeout)
            .await
        {
            warn!(
                agent_id = session.agent_id(),
                message_type = %envelope.message_type(),
                "Failed to send reply: {}", e
            );
        }
    }

    async fn close(&mut self, active: ActiveSession) {
        self.state = SessionState::Closed;
        let ActiveSession { session, push } = active;

        push.stop().await;
        let removed = self
            .registry
            .unregister_session(session.agent_id(), &session)
            .await;

        info!(
            agent_id = session.agent_id(),
            messages_received = session.messages_received(),
            unregistered = removed,
            "Session closed"
        );
    }
}
