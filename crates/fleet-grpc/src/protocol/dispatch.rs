use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use super::envelope::{CommandEnvelope, Envelope, MessageType};

/// Handler for one message type. Returns the reply to send, if any.
pub type Handler = Box<dyn Fn(&Envelope) -> Option<Envelope> + Send + Sync>;

/// Maps message-type tags to handlers.
///
/// Tags without a handler take the default branch: no reply and no error, so
/// either side can introduce new message kinds without breaking the other.
pub struct DispatchTable {
    role: &'static str,
    handlers: HashMap<MessageType, Handler>,
}

impl DispatchTable {
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `message_type`, replacing any previous one.
    #[must_use]
    pub fn on<F>(mut self, message_type: MessageType, handler: F) -> Self
    where
        F: Fn(&Envelope) -> Option<Envelope> + Send + Sync + 'static,
    {
        self.handlers.insert(message_type, Box::new(handler));
        self
    }

    pub fn dispatch(&self, envelope: &Envelope) -> Option<Envelope> {
        if let Some(handler) = self.handlers.get(envelope.message_type()) {
            handler(envelope)
        } else {
            debug!(
                role = self.role,
                message_type = %envelope.message_type(),
                agent_id = envelope.agent_id(),
                "Ignoring unrecognized message type"
            );
            None
        }
    }

    pub fn handles(&self, message_type: &MessageType) -> bool {
        self.handlers.contains_key(message_type)
    }

    pub fn tags(&self) -> impl Iterator<Item = &MessageType> {
        self.handlers.keys()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&str> = self.handlers.keys().map(MessageType::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("DispatchTable")
            .field("role", &self.role)
            .field("tags", &tags)
            .finish()
    }
}

pub fn welcome_envelope(coordinator_id: &str, agent_id: &str) -> Envelope {
    Envelope::new(
        coordinator_id,
        MessageType::Welcome,
        format!("welcome, {agent_id}"),
    )
}

/// Coordinator-side table.
///
/// `connect` is acknowledged by the welcome sent on the first message of a
/// stream, so its handler only logs. Telemetry kinds are observed without a
/// reply.
pub fn coordinator_table(coordinator_id: impl Into<String>) -> DispatchTable {
    let coordinator_id: Arc<str> = Arc::from(coordinator_id.into());

    let pong_id = coordinator_id.clone();
    let ack_id = coordinator_id;

    let mut table = DispatchTable::new("coordinator")
        .on(MessageType::Connect, |envelope| {
            info!(agent_id = envelope.agent_id(), "Agent connected");
            None
        })
        .on(MessageType::Ping, move |_| {
            Some(Envelope::new(pong_id.as_ref(), MessageType::Pong, "pong"))
        })
        .on(MessageType::Heartbeat, move |_| {
            Some(Envelope::new(
                ack_id.as_ref(),
                MessageType::HeartbeatAck,
                "received",
            ))
        });

    for observed in [
        MessageType::StatusReport,
        MessageType::Metric,
        MessageType::Log,
        MessageType::Event,
        MessageType::Alert,
    ] {
        table = table.on(observed, |envelope| {
            info!(
                agent_id = envelope.agent_id(),
                message_type = %envelope.message_type(),
                content = envelope.content(),
                "Agent telemetry received"
            );
            None
        });
    }

    table
}

#[derive(Debug, Serialize)]
struct StatusSnapshot<'a> {
    agent_id: &'a str,
    state: &'static str,
    uptime_secs: u64,
    commands_completed: u64,
}

/// Agent-side table. Replies are stamped with `agent_id`.
pub fn agent_table(agent_id: impl Into<String>, started_at: Instant) -> DispatchTable {
    let agent_id: Arc<str> = Arc::from(agent_id.into());
    let commands_completed = Arc::new(AtomicU64::new(0));

    let command_id = agent_id.clone();
    let command_count = commands_completed.clone();
    let status_id = agent_id.clone();
    let config_id = agent_id.clone();
    let heartbeat_id = agent_id;

    DispatchTable::new("agent")
        .on(MessageType::Welcome, |envelope| {
            info!(
                from = envelope.agent_id(),
                content = envelope.content(),
                "Coordinator welcomed agent"
            );
            None
        })
        .on(MessageType::Command, move |envelope| {
            info!(content = envelope.content(), "Command received");
            command_count.fetch_add(1, Ordering::Relaxed);
            let content = match CommandEnvelope::from_json(envelope.content()) {
                Ok(command) => format!("command {} completed", command.command_id),
                Err(_) => format!("command completed: {}", envelope.content()),
            };
            Some(Envelope::new(
                command_id.as_ref(),
                MessageType::CommandResponse,
                content,
            ))
        })
        .on(MessageType::StatusRequest, move |_| {
            let snapshot = StatusSnapshot {
                agent_id: &status_id,
                state: "running",
                uptime_secs: started_at.elapsed().as_secs(),
                commands_completed: commands_completed.load(Ordering::Relaxed),
            };
            let content = serde_json::to_string(&snapshot).unwrap_or_else(|_| "running".into());
            Some(Envelope::new(
                status_id.as_ref(),
                MessageType::StatusResponse,
                content,
            ))
        })
        .on(MessageType::ConfigUpdate, move |envelope| {
            info!(content = envelope.content(), "Config update received");
            Some(Envelope::new(
                config_id.as_ref(),
                MessageType::ConfigAck,
                "config applied",
            ))
        })
        .on(MessageType::Heartbeat, move |_| {
            Some(Envelope::new(
                heartbeat_id.as_ref(),
                MessageType::HeartbeatAck,
                "alive",
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_agent(message_type: MessageType) -> Envelope {
        Envelope::new("a1", message_type, "payload")
    }

    #[test]
    fn coordinator_table_replies_exactly_as_specified() {
        let table = coordinator_table("coordinator");

        let expected: Vec<(MessageType, Option<MessageType>)> = vec![
            (MessageType::Connect, None),
            (MessageType::Ping, Some(MessageType::Pong)),
            (MessageType::Heartbeat, Some(MessageType::HeartbeatAck)),
            (MessageType::StatusReport, None),
            (MessageType::Metric, None),
            (MessageType::Log, None),
            (MessageType::Event, None),
            (MessageType::Alert, None),
        ];

        for (incoming, reply) in &expected {
            assert!(table.handles(incoming), "missing handler for {incoming}");
            let actual = table.dispatch(&from_agent(incoming.clone()));
            assert_eq!(
                actual.as_ref().map(|e| e.message_type().clone()),
                *reply,
                "wrong reply for {incoming}"
            );
            if let Some(envelope) = actual {
                assert_eq!(envelope.agent_id(), "coordinator");
            }
        }
        assert_eq!(table.tags().count(), expected.len());
    }

    #[test]
    fn unknown_types_take_the_default_branch() {
        let coordinator = coordinator_table("coordinator");
        let agent = agent_table("a1", Instant::now());

        let unknown = from_agent(MessageType::Other("firmware_update".into()));
        assert!(coordinator.dispatch(&unknown).is_none());
        assert!(agent.dispatch(&unknown).is_none());

        // Known tags outside a role's table are ignored too.
        assert!(coordinator.dispatch(&from_agent(MessageType::Init)).is_none());
        assert!(agent.dispatch(&from_agent(MessageType::Ping)).is_none());
    }

    #[test]
    fn agent_table_replies() {
        let table = agent_table("a1", Instant::now());
        let cases = [
            (MessageType::Welcome, None),
            (MessageType::Command, Some(MessageType::CommandResponse)),
            (MessageType::StatusRequest, Some(MessageType::StatusResponse)),
            (MessageType::ConfigUpdate, Some(MessageType::ConfigAck)),
            (MessageType::Heartbeat, Some(MessageType::HeartbeatAck)),
        ];

        for (incoming, reply) in cases {
            let actual = table.dispatch(&Envelope::new("coordinator", incoming.clone(), "x"));
            assert_eq!(actual.as_ref().map(|e| e.message_type().clone()), reply);
            if let Some(envelope) = actual {
                assert_eq!(envelope.agent_id(), "a1");
            }
        }
    }

    #[test]
    fn command_response_echoes_command_id() {
        let table = agent_table("a1", Instant::now());
        let command = CommandEnvelope::new("c-42", "probe", "a1", "");
        let incoming = Envelope::new(
            "coordinator",
            MessageType::Command,
            command.to_json().unwrap(),
        );

        let reply = table.dispatch(&incoming).unwrap();
        assert_eq!(reply.content(), "command c-42 completed");

        let raw = Envelope::new("coordinator", MessageType::Command, "reboot");
        let reply = table.dispatch(&raw).unwrap();
        assert_eq!(reply.content(), "command completed: reboot");
    }

    #[test]
    fn status_snapshot_counts_completed_commands() {
        let table = agent_table("a1", Instant::now());
        table.dispatch(&Envelope::new("coordinator", MessageType::Command, "one"));
        table.dispatch(&Envelope::new("coordinator", MessageType::Command, "two"));

        let reply = table
            .dispatch(&Envelope::new("coordinator", MessageType::StatusRequest, ""))
            .unwrap();
        let snapshot: serde_json::Value = serde_json::from_str(reply.content()).unwrap();
        assert_eq!(snapshot["agent_id"], "a1");
        assert_eq!(snapshot["state"], "running");
        assert_eq!(snapshot["commands_completed"], 2);
    }

    #[test]
    fn welcome_names_the_agent() {
        let welcome = welcome_envelope("coordinator", "a1");
        assert_eq!(welcome.message_type(), &MessageType::Welcome);
        assert_eq!(welcome.agent_id(), "coordinator");
        assert_eq!(welcome.content(), "welcome, a1");
    }
}
