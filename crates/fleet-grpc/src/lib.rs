pub mod grpc;
pub mod protocol;
pub mod service_host;
pub mod session;

pub use grpc::{agent_client::*, coordinator_server::*, error::*, proto};
pub use protocol::{CommandEnvelope, DispatchTable, Envelope, MessageType};
pub use service_host::*;
pub use session::{PushSchedule, SessionRegistry, SessionState};
