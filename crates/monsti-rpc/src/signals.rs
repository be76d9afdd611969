//! Signal schemas and the module side of signal handling.

use crate::{MonstiClient, RpcError, RpcResult, methods::SignalResult};
use async_trait::async_trait;
use futures::FutureExt;
use monsti_cbor::{decode_tagged, encode_tagged};
use monsti_types::signals::{
    NODE_CONTEXT, NODE_CONTEXT_ARGS, NODE_CONTEXT_RET, RENDER_NODE, RENDER_NODE_ARGS, RENDER_NODE_RET,
};
use serde::{Serialize, de::DeserializeOwned};
use std::{backtrace::Backtrace, collections::BTreeMap, panic::AssertUnwindSafe, sync::Arc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalSchema {
    pub args: String,
    pub ret: String,
}

/// Signal names mapped to the tags of their argument and return types.
#[derive(Debug, Clone)]
pub struct SignalSchemas {
    schemas: BTreeMap<String, SignalSchema>,
}

impl Default for SignalSchemas {
    fn default() -> Self {
        let mut schemas = SignalSchemas {
            schemas: BTreeMap::new(),
        };
        schemas.insert(RENDER_NODE, RENDER_NODE_ARGS, RENDER_NODE_RET);
        schemas.insert(NODE_CONTEXT, NODE_CONTEXT_ARGS, NODE_CONTEXT_RET);
        schemas
    }
}

impl SignalSchemas {
    /// Schemas of the built-in signals.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: &str, args: &str, ret: &str) {
        self.schemas.insert(
            name.to_string(),
            SignalSchema {
                args: args.to_string(),
                ret: ret.to_string(),
            },
        );
    }

    /// Register a custom signal. Re-registering with the same tags is a
    /// no-op; different tags are refused.
    pub fn register(&mut self, name: &str, args: &str, ret: &str) -> RpcResult<()> {
        match self.schemas.get(name) {
            Some(existing) if existing.args == args && existing.ret == ret => Ok(()),
            Some(_) => Err(RpcError::Protocol(format!(
                "signal {name} already registered with other types"
            ))),
            None => {
                self.insert(name, args, ret);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> RpcResult<&SignalSchema> {
        self.schemas
            .get(name)
            .ok_or_else(|| RpcError::Protocol(format!("unregistered signal {name}")))
    }

    pub fn encode_args<T: Serialize>(&self, name: &str, args: &T) -> RpcResult<Vec<u8>> {
        Ok(encode_tagged(&self.get(name)?.args, args)?)
    }

    pub fn decode_args<T: DeserializeOwned>(&self, name: &str, bytes: &[u8]) -> RpcResult<T> {
        Ok(decode_tagged(&self.get(name)?.args, bytes)?)
    }

    pub fn encode_ret<T: Serialize>(&self, name: &str, ret: &T) -> RpcResult<Vec<u8>> {
        Ok(encode_tagged(&self.get(name)?.ret, ret)?)
    }

    pub fn decode_ret<T: DeserializeOwned>(&self, name: &str, bytes: &[u8]) -> RpcResult<T> {
        Ok(decode_tagged(&self.get(name)?.ret, bytes)?)
    }

    /// Decode every subscriber's answer; failures and undecodable returns
    /// stay per-subscriber errors.
    pub fn decode_results<T: DeserializeOwned>(&self, name: &str, results: Vec<SignalResult>) -> Vec<Result<T, String>> {
        results
            .into_iter()
            .map(|result| match result {
                SignalResult { error: Some(err), .. } => Err(err),
                SignalResult { ret: Some(ret), .. } => {
                    self.decode_ret(name, &ret).map_err(|e| e.to_string())
                }
                SignalResult { ret: None, .. } => Err("empty signal return".to_string()),
            })
            .collect()
    }

    /// Encode, emit and decode a signal through `client`.
    pub async fn emit<A, R>(&self, client: &mut MonstiClient, name: &str, args: &A) -> RpcResult<Vec<Result<R, String>>>
    where
        A: Serialize + Sync,
        R: DeserializeOwned,
    {
        let blob = self.encode_args(name, args)?;
        let results = client.emit_signal(name, blob).await?;
        Ok(self.decode_results(name, results))
    }
}

/// Module-side receiver of one signal.
#[async_trait]
pub trait SignalHandler: Send + Sync + 'static {
    /// Name of the handled signal.
    fn signal(&self) -> &str;

    /// Handle tagged argument bytes, returning tagged return bytes.
    async fn handle(&self, args: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// Subscribe `client` to every handler's signal and answer signals until
/// the connection fails.
///
/// The connection is dedicated to waiting; handlers needing the daemon
/// use connections of their own.
pub async fn serve_signals(client: &mut MonstiClient, handlers: &[Arc<dyn SignalHandler>]) -> RpcResult<()> {
    subscribe_signals(client, handlers).await?;
    answer_signals(client, handlers).await
}

pub async fn subscribe_signals(client: &mut MonstiClient, handlers: &[Arc<dyn SignalHandler>]) -> RpcResult<()> {
    for handler in handlers {
        client.connect_signal(handler.signal()).await?;
    }
    Ok(())
}

/// Answer signals routed to `client` until the connection fails.
pub async fn answer_signals(client: &mut MonstiClient, handlers: &[Arc<dyn SignalHandler>]) -> RpcResult<()> {
    loop {
        let received = client.wait_signal().await?;
        let result = match handlers.iter().find(|h| h.signal() == received.name) {
            Some(handler) => run_protected(handler.as_ref(), received.args).await,
            None => Err(format!("no handler for signal {}", received.name)),
        };
        if let Err(err) = &result {
            tracing::warn!(signal = %received.name, "signal handler failed: {err}");
        }
        client.finish_signal(result).await?;
    }
}

/// Run a handler, turning a panic into an error carrying a backtrace.
pub async fn run_protected(handler: &dyn SignalHandler, args: Vec<u8>) -> Result<Vec<u8>, String> {
    match AssertUnwindSafe(handler.handle(args)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!(
                "panic in {} handler: {message}\n{}",
                handler.signal(),
                Backtrace::force_capture()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monsti_types::signals::{RenderNodeArgs, RenderNodeRet};

    struct Panicking;

    #[async_trait]
    impl SignalHandler for Panicking {
        fn signal(&self) -> &str {
            RENDER_NODE
        }

        async fn handle(&self, _args: Vec<u8>) -> Result<Vec<u8>, String> {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let err = run_protected(&Panicking, Vec::new()).await.expect_err("panic");
        assert!(err.contains("boom"), "{err}");
        assert!(err.contains(RENDER_NODE));
    }

    #[test]
    fn schemas_check_tags() {
        let mut schemas = SignalSchemas::new();
        let args = RenderNodeArgs {
            request: 7,
            node_type: "core.Document".into(),
            embed: None,
        };
        let blob = schemas.encode_args(RENDER_NODE, &args).expect("encode");
        let back: RenderNodeArgs = schemas.decode_args(RENDER_NODE, &blob).expect("decode");
        assert_eq!(back, args);
        assert!(schemas.decode_ret::<RenderNodeRet>(RENDER_NODE, &blob).is_err());

        assert!(schemas.encode_args("foo.Unknown", &args).is_err());
        schemas.register("foo.Custom", "foo.Args", "foo.Ret").expect("register");
        schemas.register("foo.Custom", "foo.Args", "foo.Ret").expect("idempotent");
        assert!(schemas.register("foo.Custom", "foo.Other", "foo.Ret").is_err());
    }

    #[test]
    fn results_keep_per_subscriber_failures() {
        let schemas = SignalSchemas::new();
        let ok = schemas
            .encode_ret(RENDER_NODE, &RenderNodeRet::default())
            .expect("encode");
        let results = vec![
            SignalResult {
                ret: Some(ok),
                error: None,
            },
            SignalResult {
                ret: None,
                error: Some("failed".into()),
            },
        ];
        let decoded = schemas.decode_results::<RenderNodeRet>(RENDER_NODE, results);
        assert_eq!(decoded[0], Ok(RenderNodeRet::default()));
        assert_eq!(decoded[1], Err("failed".to_string()));
    }
}
