use crate::wire::WireError;
use monsti_cbor::TaggedError;

pub type RpcResult<T> = Result<T, RpcError>;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("{method}: {code}: {message}")]
    Remote {
        method: String,
        code: String,
        message: String,
    },
    #[error("signal payload: {0}")]
    Signal(#[from] TaggedError),
    #[error("signal {signal} failed: {message}")]
    SignalFailed { signal: String, message: String },
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Node(#[from] monsti_types::NodeError),
    #[error(transparent)]
    Field(#[from] monsti_types::FieldError),
}

impl RpcError {
    pub(crate) fn remote(method: &str, err: WireError) -> Self {
        RpcError::Remote {
            method: method.to_string(),
            code: err.code,
            message: err.message,
        }
    }

    /// Error code reported by the daemon, if this is a remote failure.
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            RpcError::Remote { code, .. } => Some(code),
            _ => None,
        }
    }
}
