use crate::{
    RpcError, RpcResult,
    methods::*,
    wire::{self, PROTOCOL_VERSION, RequestEnvelope, ResponseEnvelope},
};
use monsti_types::{
    CacheDep, CacheMods, FieldTypeRegistry, Node, NodeType, RequestInfo, SiteContext, SiteSettings,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{
    io::BufReader,
    net::{
        UnixStream,
        unix::{OwnedReadHalf, OwnedWriteHalf},
    },
};

static CLIENT_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique client id, `pid#counter`.
pub fn next_client_id() -> String {
    format!(
        "{}#{}",
        std::process::id(),
        CLIENT_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// A connection to the daemon.
pub struct MonstiClient {
    id: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_call: u64,
    line: String,
    /// Set while a call awaits its reply. A call dropped or failed in that
    /// window leaves the stream out of step, so the client stays unusable.
    broken: bool,
}

impl std::fmt::Debug for MonstiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonstiClient").field("id", &self.id).finish()
    }
}

impl MonstiClient {
    pub async fn connect(path: &Path) -> RpcResult<Self> {
        let stream = UnixStream::connect(path).await?;
        let (r, w) = stream.into_split();
        Ok(Self {
            id: next_client_id(),
            reader: BufReader::new(r),
            writer: w,
            next_call: 1,
            line: String::new(),
            broken: false,
        })
    }

    /// Whether a call was interrupted; such a client has to be dropped.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Id used to route signals to this connection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Invoke `method` and wait for its reply.
    pub async fn call<P, R>(&mut self, method: &str, params: &P) -> RpcResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        if self.broken {
            return Err(RpcError::Closed);
        }
        let id = self.next_call;
        self.next_call += 1;
        let envelope = RequestEnvelope {
            v: PROTOCOL_VERSION,
            id,
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };
        self.broken = true;
        wire::write_frame(&mut self.writer, &envelope).await?;
        let resp: ResponseEnvelope = wire::read_frame(&mut self.reader, &mut self.line)
            .await?
            .ok_or(RpcError::Closed)?;
        if resp.id != id {
            return Err(RpcError::Protocol(format!(
                "reply id {} does not match call id {id}",
                resp.id
            )));
        }
        self.broken = false;
        if !resp.ok {
            let err = resp
                .error
                .unwrap_or_else(|| crate::WireError::internal("missing error"));
            return Err(RpcError::remote(method, err));
        }
        Ok(serde_json::from_value(resp.result.unwrap_or(Value::Null))?)
    }

    pub async fn module_init_done(&mut self, name: &str) -> RpcResult<()> {
        self.call::<_, Value>(MODULE_INIT_DONE, &ModuleInitDoneParams { name: name.into() })
            .await
            .map(drop)
    }

    /// Snapshot of an in-flight HTTP request.
    pub async fn get_request(&mut self, id: u64) -> RpcResult<Option<RequestInfo>> {
        self.call(GET_REQUEST, &GetRequestParams { id }).await
    }

    pub async fn register_node_type(&mut self, node_type: NodeType) -> RpcResult<()> {
        self.call::<_, Value>(REGISTER_NODE_TYPE, &RegisterNodeTypeParams { node_type })
            .await
            .map(drop)
    }

    pub async fn get_node_type(&mut self, id: &str) -> RpcResult<NodeType> {
        self.call(GET_NODE_TYPE, &GetNodeTypeParams { id: id.into() }).await
    }

    pub async fn get_node_types(&mut self) -> RpcResult<Vec<String>> {
        self.call(GET_NODE_TYPES, &Empty {}).await
    }

    pub async fn get_addable_node_types(&mut self, site: &str, node_type: &str) -> RpcResult<Vec<String>> {
        let params = GetAddableNodeTypesParams {
            site: site.into(),
            node_type: node_type.into(),
        };
        self.call(GET_ADDABLE_NODE_TYPES, &params).await
    }

    pub async fn get_node(&mut self, site: &str, path: &str) -> RpcResult<Option<Node>> {
        let reply: Option<NodeReply> = self.call(GET_NODE, &node_params(site, path)).await?;
        reply.map(decode_node).transpose()
    }

    pub async fn get_children(&mut self, site: &str, path: &str) -> RpcResult<Vec<Node>> {
        let replies: Vec<NodeReply> = self.call(GET_CHILDREN, &node_params(site, path)).await?;
        replies.into_iter().map(decode_node).collect()
    }

    pub async fn get_node_data(&mut self, site: &str, path: &str, file: &str) -> RpcResult<Option<Vec<u8>>> {
        let reply: NodeDataReply = self.call(GET_NODE_DATA, &data_params(site, path, file)).await?;
        Ok(reply.content)
    }

    /// Persist a node; the daemon stamps `changed`.
    pub async fn write_node(&mut self, site: &str, node: &Node) -> RpcResult<()> {
        let params = WriteNodeParams {
            site: site.into(),
            path: node.path.clone(),
            node: node.to_json()?,
        };
        self.call::<_, Value>(WRITE_NODE, &params).await.map(drop)
    }

    pub async fn write_node_data(&mut self, site: &str, path: &str, file: &str, content: Vec<u8>) -> RpcResult<()> {
        let params = WriteNodeDataParams {
            site: site.into(),
            path: path.into(),
            file: file.into(),
            content,
        };
        self.call::<_, Value>(WRITE_NODE_DATA, &params).await.map(drop)
    }

    pub async fn remove_node_data(&mut self, site: &str, path: &str, file: &str) -> RpcResult<()> {
        self.call::<_, Value>(REMOVE_NODE_DATA, &data_params(site, path, file))
            .await
            .map(drop)
    }

    pub async fn remove_node(&mut self, site: &str, path: &str) -> RpcResult<()> {
        self.call::<_, Value>(REMOVE_NODE, &node_params(site, path))
            .await
            .map(drop)
    }

    pub async fn rename_node(&mut self, site: &str, source: &str, target: &str) -> RpcResult<()> {
        let params = RenameNodeParams {
            site: site.into(),
            source: source.into(),
            target: target.into(),
        };
        self.call::<_, Value>(RENAME_NODE, &params).await.map(drop)
    }

    /// Dotted lookup into the module's site configuration; `None` if the
    /// module has no configuration file.
    pub async fn get_config(&mut self, site: &str, module: &str, name: &str) -> RpcResult<Option<Value>> {
        let params = GetConfigParams {
            site: site.into(),
            module: module.into(),
            name: name.into(),
        };
        let reply: ConfigReply = self.call(GET_CONFIG, &params).await?;
        Ok(reply.found.then_some(reply.value))
    }

    pub async fn load_site_settings(&mut self, site: &str) -> RpcResult<SiteSettings> {
        let doc: SiteSettingsDoc = self.call(LOAD_SITE_SETTINGS, &SiteParams { site: site.into() }).await?;
        let provisional = SiteSettings::decode(&doc.settings, &SiteContext::default())?;
        Ok(SiteSettings::decode(&doc.settings, &provisional.site_context())?)
    }

    pub async fn write_site_settings(&mut self, site: &str, settings: &SiteSettings) -> RpcResult<()> {
        let params = SiteSettingsDoc {
            site: site.into(),
            settings: settings.to_document(),
        };
        self.call::<_, Value>(WRITE_SITE_SETTINGS, &params).await.map(drop)
    }

    /// Store a cache entry; returns the mods to pass on to callers.
    pub async fn to_cache(
        &mut self,
        site: &str,
        node: &str,
        id: &str,
        content: Vec<u8>,
        mods: CacheMods,
    ) -> RpcResult<CacheMods> {
        let params = ToCacheParams {
            site: site.into(),
            node: node.into(),
            id: id.into(),
            content,
            mods,
        };
        self.call(TO_CACHE, &params).await
    }

    pub async fn from_cache(&mut self, site: &str, node: &str, id: &str) -> RpcResult<Option<(Vec<u8>, CacheMods)>> {
        let params = CacheKeyParams {
            site: site.into(),
            node: node.into(),
            id: id.into(),
        };
        let reply: FromCacheReply = self.call(FROM_CACHE, &params).await?;
        Ok(reply
            .content
            .map(|content| (content, reply.mods.unwrap_or_default())))
    }

    pub async fn mark_dep(&mut self, site: &str, dep: CacheDep) -> RpcResult<()> {
        self.call::<_, Value>(MARK_DEP, &MarkDepParams { site: site.into(), dep })
            .await
            .map(drop)
    }

    /// Subscribe this connection's client id to a signal.
    pub async fn connect_signal(&mut self, signal: &str) -> RpcResult<()> {
        let params = ConnectSignalParams {
            id: self.id.clone(),
            signal: signal.into(),
        };
        self.call::<_, Value>(CONNECT_SIGNAL, &params).await.map(drop)
    }

    /// Block until a subscribed signal is emitted.
    pub async fn wait_signal(&mut self) -> RpcResult<WaitSignalReply> {
        let params = WaitSignalParams { id: self.id.clone() };
        self.call(WAIT_SIGNAL, &params).await
    }

    pub async fn finish_signal(&mut self, result: Result<Vec<u8>, String>) -> RpcResult<()> {
        let (ret, error) = match result {
            Ok(ret) => (Some(ret), String::new()),
            Err(error) => (None, error),
        };
        let params = FinishSignalParams {
            id: self.id.clone(),
            error,
            ret,
        };
        self.call::<_, Value>(FINISH_SIGNAL, &params).await.map(drop)
    }

    /// Emit a signal with pre-encoded arguments; one result per subscriber.
    pub async fn emit_signal(&mut self, name: &str, args: Vec<u8>) -> RpcResult<Vec<SignalResult>> {
        let reply: EmitSignalReply = self
            .call(EMIT_SIGNAL, &EmitSignalParams { name: name.into(), args })
            .await?;
        Ok(reply.results)
    }

    pub async fn send_mail(&mut self, from: &str, to: Vec<String>, message: Vec<u8>) -> RpcResult<()> {
        let params = SendMailParams {
            from: from.into(),
            to,
            message,
        };
        self.call::<_, Value>(SEND_MAIL, &params).await.map(drop)
    }
}

fn node_params(site: &str, path: &str) -> NodeParams {
    NodeParams {
        site: site.into(),
        path: path.into(),
    }
}

fn data_params(site: &str, path: &str, file: &str) -> NodeDataParams {
    NodeDataParams {
        site: site.into(),
        path: path.into(),
        file: file.into(),
    }
}

fn decode_node(reply: NodeReply) -> RpcResult<Node> {
    let site = SiteContext::new(&reply.timezone, &reply.locale);
    Ok(Node::decode_with_type(
        &reply.node,
        Arc::new(reply.node_type),
        &FieldTypeRegistry::new(),
        &site,
    )?)
}
