pub mod dispatch;
pub mod envelope;

pub use dispatch::{DispatchTable, Handler, agent_table, coordinator_table, welcome_envelope};
pub use envelope::{CommandEnvelope, Envelope, MessageType};
