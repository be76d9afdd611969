use monsti_rpc::RpcError;
use monsti_store::StoreError;
use monsti_types::{FieldError, NodeError};
use std::path::PathBuf;
use thiserror::Error;

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("could not parse {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("node error: {0}")]
    Node(#[from] NodeError),
    #[error("field error: {0}")]
    Field(#[from] FieldError),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("module error: {0}")]
    Module(String),
    #[error("mail error: {0}")]
    Mail(String),
    #[error("template error: {0}")]
    Render(String),
    #[error("image error: {0}")]
    Image(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("unknown site {0}")]
    UnknownSite(String),
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: std::io::Error) -> HostError {
    HostError::Io {
        path: path.into(),
        source: err,
    }
}
