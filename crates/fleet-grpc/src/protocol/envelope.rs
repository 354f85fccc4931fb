use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Message-type tag carried by every envelope.
///
/// The set is open: tags this build does not know are preserved verbatim in
/// [`MessageType::Other`] so they survive a round trip and fall through to the
/// default branch of a dispatch table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    Connect,
    Init,
    Register,
    ConfigRequest,
    StatusReport,
    Ping,
    Pong,
    Heartbeat,
    HeartbeatAck,
    Log,
    Metric,
    Event,
    Alert,
    Welcome,
    Command,
    CommandResponse,
    StatusRequest,
    StatusResponse,
    ConfigUpdate,
    ConfigAck,
    Other(String),
}

impl MessageType {
    pub const KNOWN: [MessageType; 20] = [
        MessageType::Connect,
        MessageType::Init,
        MessageType::Register,
        MessageType::ConfigRequest,
        MessageType::StatusReport,
        MessageType::Ping,
        MessageType::Pong,
        MessageType::Heartbeat,
        MessageType::HeartbeatAck,
        MessageType::Log,
        MessageType::Metric,
        MessageType::Event,
        MessageType::Alert,
        MessageType::Welcome,
        MessageType::Command,
        MessageType::CommandResponse,
        MessageType::StatusRequest,
        MessageType::StatusResponse,
        MessageType::ConfigUpdate,
        MessageType::ConfigAck,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Connect => "connect",
            Self::Init => "init",
            Self::Register => "register",
            Self::ConfigRequest => "config_request",
            Self::StatusReport => "status_report",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Heartbeat => "heartbeat",
            Self::HeartbeatAck => "heartbeat_ack",
            Self::Log => "log",
            Self::Metric => "metric",
            Self::Event => "event",
            Self::Alert => "alert",
            Self::Welcome => "welcome",
            Self::Command => "command",
            Self::CommandResponse => "command_response",
            Self::StatusRequest => "status_request",
            Self::StatusResponse => "status_response",
            Self::ConfigUpdate => "config_update",
            Self::ConfigAck => "config_ack",
            Self::Other(tag) => tag,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        match tag {
            "connect" => Self::Connect,
            "init" => Self::Init,
            "register" => Self::Register,
            "config_request" => Self::ConfigRequest,
            "status_report" => Self::StatusReport,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "heartbeat" => Self::Heartbeat,
            "heartbeat_ack" => Self::HeartbeatAck,
            "log" => Self::Log,
            "metric" => Self::Metric,
            "event" => Self::Event,
            "alert" => Self::Alert,
            "welcome" => Self::Welcome,
            "command" => Self::Command,
            "command_response" => Self::CommandResponse,
            "status_request" => Self::StatusRequest,
            "status_response" => Self::StatusResponse,
            "config_update" => Self::ConfigUpdate,
            "config_ack" => Self::ConfigAck,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        match MessageType::from(tag.as_str()) {
            Self::Other(_) => Self::Other(tag),
            known => known,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of the wire protocol. Fields are fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    agent_id: String,
    message_type: MessageType,
    content: String,
    timestamp: i64,
}

impl Envelope {
    /// Build an envelope stamped with the current wall-clock second.
    pub fn new(
        agent_id: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
    ) -> Self {
        Self::with_timestamp(agent_id, message_type, content, Utc::now().timestamp())
    }

    pub fn with_timestamp(
        agent_id: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            message_type,
            content: content.into(),
            timestamp,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Whether this envelope can establish or continue a session.
    pub fn has_identity(&self) -> bool {
        !self.agent_id.is_empty()
    }
}

/// A command addressed to one agent.
///
/// Commands are not a wire message of their own. The coordinator's periodic
/// push serializes one as JSON into the content of a `command` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command_id: String,
    pub command_type: String,
    pub target_agent_id: String,
    pub parameters: String,
}

impl CommandEnvelope {
    pub fn new(
        command_id: impl Into<String>,
        command_type: impl Into<String>,
        target_agent_id: impl Into<String>,
        parameters: impl Into<String>,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            command_type: command_type.into(),
            target_agent_id: target_agent_id.into(),
            parameters: parameters.into(),
        }
    }

    /// A fresh probe command; every call yields a distinct `command_id`.
    pub fn probe(target_agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self::new(
            Uuid::new_v4().to_string(),
            "probe",
            target_agent_id,
            format!("issued_at={}", now.timestamp()),
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_round_trip_through_str() {
        for message_type in MessageType::KNOWN {
            assert!(message_type.is_known());
            assert_eq!(MessageType::from(message_type.as_str()), message_type);
        }
    }

    #[test]
    fn unknown_tag_is_preserved() {
        let tag = MessageType::from("firmware_update".to_string());
        assert_eq!(tag, MessageType::Other("firmware_update".to_string()));
        assert_eq!(tag.as_str(), "firmware_update");
        assert!(!tag.is_known());
    }

    #[test]
    fn envelope_identity() {
        let anonymous = Envelope::new("", MessageType::Connect, "hello");
        assert!(!anonymous.has_identity());

        let named = Envelope::new("a1", MessageType::Connect, "hello");
        assert!(named.has_identity());
        assert!(named.timestamp() > 0);
    }

    #[test]
    fn probe_commands_are_not_idempotent() {
        let first = CommandEnvelope::probe("a1");
        let second = CommandEnvelope::probe("a1");
        assert_ne!(first.command_id, second.command_id);
        assert_eq!(first.target_agent_id, "a1");
        assert_eq!(first.command_type, "probe");
    }

    #[test]
    fn command_json_round_trip() {
        let command = CommandEnvelope::new("c-1", "restart", "a1", "grace=5");
        let json = command.to_json().unwrap();
        assert_eq!(CommandEnvelope::from_json(&json).unwrap(), command);
    }
}
