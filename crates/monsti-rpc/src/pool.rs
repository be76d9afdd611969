use crate::{MonstiClient, RpcResult};
use parking_lot::Mutex;
use std::path::PathBuf;

/// Capacity-bounded free list of daemon connections.
#[derive(Debug)]
pub struct SessionPool {
    path: PathBuf,
    capacity: usize,
    free: Mutex<Vec<MonstiClient>>,
}

impl SessionPool {
    pub fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        SessionPool {
            path: path.into(),
            capacity,
            free: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn socket_path(&self) -> &std::path::Path {
        &self.path
    }

    /// A pooled connection, or a freshly dialed one if none is idle.
    pub async fn session(&self) -> RpcResult<MonstiClient> {
        let idle = self.free.lock().pop();
        match idle {
            Some(session) => Ok(session),
            None => MonstiClient::connect(&self.path).await,
        }
    }

    /// Hand a connection back; it is closed if the pool is full or a call
    /// on it was interrupted.
    pub fn free(&self, session: MonstiClient) {
        if session.is_broken() {
            tracing::debug!(client = session.id(), "dropping interrupted session");
            return;
        }
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(session);
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}
