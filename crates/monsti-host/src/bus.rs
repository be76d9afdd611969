//! Daemon side of the signal bus.
//!
//! Subscribers are module connections identified by client id. Each has a
//! queue of pending signals it drains through `WaitSignal`; `FinishSignal`
//! answers the one it is currently handling. Emission walks the
//! subscribers of a signal in subscription order and waits for each answer
//! before moving on.
//!
//! A handler must not emit a signal that would be routed back to its own
//! client while handling one: its queue is blocked on the current answer.

use monsti_rpc::methods::SignalResult;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BusError {
    #[error("unknown signal client {0}")]
    UnknownClient(String),
    #[error("client {0} has no signal in progress")]
    NothingToFinish(String),
    #[error("client {0} was disconnected")]
    Disconnected(String),
}

#[derive(Debug)]
struct PendingSignal {
    name: String,
    args: Vec<u8>,
    reply: oneshot::Sender<SignalResult>,
}

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::UnboundedSender<PendingSignal>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<PendingSignal>>>,
    current: Option<oneshot::Sender<SignalResult>>,
}

impl Subscriber {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Subscriber {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            current: None,
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    subscriptions: BTreeMap<String, Vec<String>>,
    subscribers: HashMap<String, Subscriber>,
}

#[derive(Debug)]
pub struct SignalBus {
    state: Mutex<BusState>,
    log_interval: Duration,
}

impl SignalBus {
    pub fn new(log_interval: Duration) -> Self {
        SignalBus {
            state: Mutex::new(BusState::default()),
            log_interval,
        }
    }

    /// Subscribe `client` to `signal`. Subscribing twice has no effect.
    pub fn connect(&self, client: &str, signal: &str) {
        let mut state = self.state.lock();
        state
            .subscribers
            .entry(client.to_string())
            .or_insert_with(Subscriber::new);
        let clients = state.subscriptions.entry(signal.to_string()).or_default();
        if !clients.iter().any(|c| c == client) {
            clients.push(client.to_string());
        }
        tracing::debug!(client, signal, "signal subscribed");
    }

    pub fn subscribers(&self, signal: &str) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .get(signal)
            .cloned()
            .unwrap_or_default()
    }

    /// Wait for the next signal routed to `client`.
    pub async fn wait(&self, client: &str) -> Result<(String, Vec<u8>), BusError> {
        let rx = {
            let state = self.state.lock();
            let subscriber = state
                .subscribers
                .get(client)
                .ok_or_else(|| BusError::UnknownClient(client.to_string()))?;
            subscriber.rx.clone()
        };
        let pending = rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| BusError::Disconnected(client.to_string()))?;
        let mut state = self.state.lock();
        match state.subscribers.get_mut(client) {
            Some(subscriber) => {
                subscriber.current = Some(pending.reply);
                Ok((pending.name, pending.args))
            }
            None => Err(BusError::Disconnected(client.to_string())),
        }
    }

    /// Answer the signal `client` is currently handling.
    pub fn finish(&self, client: &str, result: SignalResult) -> Result<(), BusError> {
        let reply = {
            let mut state = self.state.lock();
            let subscriber = state
                .subscribers
                .get_mut(client)
                .ok_or_else(|| BusError::UnknownClient(client.to_string()))?;
            subscriber
                .current
                .take()
                .ok_or_else(|| BusError::NothingToFinish(client.to_string()))?
        };
        // The emitter may have given up; nothing to do then.
        let _ = reply.send(result);
        Ok(())
    }

    /// Deliver a signal to every subscriber in turn and gather their
    /// answers, one per subscriber.
    pub async fn emit(&self, name: &str, args: &[u8]) -> Vec<SignalResult> {
        let mut results = Vec::new();
        for client in self.subscribers(name) {
            let (reply_tx, mut reply_rx) = oneshot::channel();
            let sent = {
                let state = self.state.lock();
                state.subscribers.get(&client).is_some_and(|s| {
                    s.tx.send(PendingSignal {
                        name: name.to_string(),
                        args: args.to_vec(),
                        reply: reply_tx,
                    })
                    .is_ok()
                })
            };
            if !sent {
                results.push(failure(format!("subscriber {client} is gone")));
                continue;
            }
            let result = loop {
                tokio::select! {
                    reply = &mut reply_rx => {
                        break reply.unwrap_or_else(|_| failure(format!("subscriber {client} disconnected")));
                    }
                    _ = tokio::time::sleep(self.log_interval) => {
                        tracing::warn!(signal = name, client = %client, "Waiting for signal response");
                    }
                }
            };
            if let Some(err) = &result.error {
                tracing::warn!(signal = name, client = %client, "signal handler failed: {err}");
            }
            results.push(result);
        }
        results
    }

    /// Forget a client: its subscriptions go away and signals queued for
    /// it or in progress fail.
    pub fn drop_client(&self, client: &str) {
        let mut state = self.state.lock();
        for clients in state.subscriptions.values_mut() {
            clients.retain(|c| c != client);
        }
        state.subscriptions.retain(|_, clients| !clients.is_empty());
        if state.subscribers.remove(client).is_some() {
            tracing::debug!(client, "signal client dropped");
        }
    }
}

fn failure(message: String) -> SignalResult {
    SignalResult {
        ret: None,
        error: Some(message),
    }
}
