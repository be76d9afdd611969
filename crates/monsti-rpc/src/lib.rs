//! Local RPC between the Monsti daemon and its modules.
//!
//! Calls travel as newline-delimited JSON envelopes over a Unix socket,
//! one call in flight per connection. Signal arguments and returns are
//! carried as tagged CBOR blobs so both ends can check the registered type
//! name before decoding.

mod client;
mod error;
pub mod methods;
mod pool;
mod server;
pub mod signals;
pub mod wire;

pub use client::{MonstiClient, next_client_id};
pub use error::{RpcError, RpcResult};
pub use pool::SessionPool;
pub use server::{ConnectionContext, RpcServer, RpcService};
pub use signals::{
    SignalHandler, SignalSchemas, answer_signals, serve_signals, subscribe_signals,
};
pub use wire::{RequestEnvelope, ResponseEnvelope, WireError};

/// File name of the daemon socket inside the run directory.
pub const SOCKET_NAME: &str = "monsti.socket";
