pub mod agent_client;
pub mod conversions;
pub mod coordinator_server;
pub mod error;


pub use fleet_proto::agent::v1 as proto;

pub use agent_client::*;
pub use conversions::{envelope_to_proto, proto_to_envelope};
pub use coordinator_server::{CoordinatorConfig, CoordinatorServer};
pub use error::*;
