use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrpcError {
    #[error("Failed to connect to coordinator: {0}")]
    ConnectionFailed(#[from] tonic::transport::Error),

    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("gRPC call failed: {0}")]
    CallFailed(#[from] Box<tonic::Status>),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Stream closed by peer")]
    StreamClosed,

    #[error("First message on stream carried no agent id")]
    MissingIdentity,

    #[error("Failed to send {message_type} message: outbound channel closed")]
    SendFailed { message_type: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Invalid coordinator state: {reason}")]
    InvalidState { reason: String },
}

impl From<GrpcError> for tonic::Status {
    fn from(err: GrpcError) -> Self {
        match err {
            GrpcError::ConnectionFailed(e) => {
                tonic::Status::unavailable(format!("Connection failed: {e}"))
            }
            GrpcError::BindFailed { addr, source } => {
                tonic::Status::unavailable(format!("Failed to bind {addr}: {source}"))
            }
            GrpcError::CallFailed(status) => *status,
            GrpcError::StreamError(msg) => tonic::Status::internal(format!("Stream error: {msg}")),
            GrpcError::StreamClosed => tonic::Status::cancelled("Stream closed by peer"),
            GrpcError::MissingIdentity => tonic::Status::invalid_argument(
                "First message on stream must carry a non-empty agent_id",
            ),
            GrpcError::SendFailed { message_type } => tonic::Status::unavailable(format!(
                "Failed to send {message_type} message: outbound channel closed"
            )),
            GrpcError::InvalidConfig { reason } => {
                tonic::Status::invalid_argument(format!("Invalid configuration: {reason}"))
            }
            GrpcError::InvalidState { reason } => {
                tonic::Status::failed_precondition(format!("Invalid coordinator state: {reason}"))
            }
        }
    }
}
