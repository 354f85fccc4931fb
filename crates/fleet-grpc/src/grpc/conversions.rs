use fleet_proto::agent::v1 as proto;

use crate::protocol::{Envelope, MessageType};

pub fn envelope_to_proto(envelope: &Envelope) -> proto::MessageEnvelope {
    proto::MessageEnvelope {
        agent_id: envelope.agent_id().to_string(),
        message_type: envelope.message_type().as_str().to_string(),
        content: envelope.content().to_string(),
        timestamp: envelope.timestamp(),
    }
}

/// Decoding never fails: unknown tags become [`MessageType::Other`] and an
/// empty `agent_id` is left for the session layer to judge.
pub fn proto_to_envelope(message: proto::MessageEnvelope) -> Envelope {
    Envelope::with_timestamp(
        message.agent_id,
        MessageType::from(message.message_type),
        message.content,
        message.timestamp,
    )
}
