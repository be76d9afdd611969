use async_trait::async_trait;
use monsti_rpc::{SignalHandler, SignalSchemas};
use serde::{Serialize, de::DeserializeOwned};

/// A signal handler working on decoded arguments and return values.
#[async_trait]
pub trait TypedHandler: Send + Sync + 'static {
    type Args: DeserializeOwned + Send + 'static;
    type Ret: Serialize + Send;

    fn signal(&self) -> &str;

    async fn handle(&self, args: Self::Args) -> Result<Self::Ret, String>;
}

/// Adapts a [`TypedHandler`] to the tagged byte payloads on the wire.
pub struct Typed<H> {
    handler: H,
    schemas: SignalSchemas,
}

impl<H: TypedHandler> Typed<H> {
    pub fn new(handler: H) -> Self {
        Typed {
            handler,
            schemas: SignalSchemas::new(),
        }
    }
}

#[async_trait]
impl<H: TypedHandler> SignalHandler for Typed<H> {
    fn signal(&self) -> &str {
        self.handler.signal()
    }

    async fn handle(&self, args: Vec<u8>) -> Result<Vec<u8>, String> {
        let signal = self.handler.signal();
        let args: H::Args = self
            .schemas
            .decode_args(signal, &args)
            .map_err(|e| format!("bad {signal} arguments: {e}"))?;
        let ret = self.handler.handle(args).await?;
        self.schemas.encode_ret(signal, &ret).map_err(|e| e.to_string())
    }
}
