//! Daemon state shared by the RPC service and the HTTP pipeline.

use crate::{
    auth::{BcryptHasher, PasswordHasher},
    bus::{BusError, SignalBus},
    config::{HostConfig, MonstiSettings, SiteConfig},
    core_types::register_core_types,
    error::{HostError, HostResult},
    mail::{LogMailer, Mailer, SendmailMailer},
    modules::ModuleBarrier,
    nav::{NavNode, NavSource},
    render::Renderer,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use monsti_rpc::{
    ConnectionContext, RpcService, SignalSchemas, WireError,
    methods::{self, *},
};
use monsti_store::{DataStore, StoreError};
use monsti_types::{
    CacheMods, Node, NodeError, NodeType, NodeTypeRegistry, RequestInfo, SiteContext, SiteSettings,
    paths, settings, time,
};
use parking_lot::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

pub struct Monsti {
    settings: MonstiSettings,
    config: HostConfig,
    sites: BTreeMap<String, SiteConfig>,
    store: DataStore,
    node_types: RwLock<NodeTypeRegistry>,
    requests: RwLock<HashMap<u64, RequestInfo>>,
    next_request: AtomicU64,
    bus: SignalBus,
    schemas: SignalSchemas,
    barrier: ModuleBarrier,
    mailer: Arc<dyn Mailer>,
    hasher: Arc<dyn PasswordHasher>,
    renderer: Renderer,
}

impl Monsti {
    pub fn new(settings: MonstiSettings, config: HostConfig) -> HostResult<Self> {
        let mailer: Arc<dyn Mailer> = if settings.mail.debug {
            Arc::new(LogMailer::default())
        } else {
            Arc::new(SendmailMailer {
                program: settings.mail.sendmail.clone(),
            })
        };
        Self::with_mailer(settings, config, mailer)
    }

    pub fn with_mailer(
        settings: MonstiSettings,
        config: HostConfig,
        mailer: Arc<dyn Mailer>,
    ) -> HostResult<Self> {
        let sites = settings.load_sites()?;
        let mut registry = NodeTypeRegistry::new();
        register_core_types(&mut registry)?;
        let store = DataStore::open(&settings.directories.data, &settings.config_dir);
        let renderer = Renderer::new(settings.templates_dir(), &settings.directories.data);
        let hasher = Arc::new(BcryptHasher {
            cost: config.bcrypt_cost,
        });
        Ok(Monsti {
            bus: SignalBus::new(config.signal_log_interval),
            schemas: SignalSchemas::new(),
            barrier: ModuleBarrier::new(),
            node_types: RwLock::new(registry),
            requests: RwLock::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            settings,
            config,
            sites,
            store,
            mailer,
            hasher,
            renderer,
        })
    }

    pub fn settings(&self) -> &MonstiSettings {
        &self.settings
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn mailer(&self) -> &Arc<dyn Mailer> {
        &self.mailer
    }

    pub fn hasher(&self) -> &Arc<dyn PasswordHasher> {
        &self.hasher
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn barrier(&self) -> &ModuleBarrier {
        &self.barrier
    }

    pub fn site(&self, name: &str) -> HostResult<&SiteConfig> {
        self.sites
            .get(name)
            .ok_or_else(|| HostError::UnknownSite(name.to_string()))
    }

    /// The site whose `hosts` contain `host`.
    pub fn site_for_host(&self, host: &str) -> Option<&SiteConfig> {
        self.sites.values().find(|site| site.serves(host))
    }

    pub fn site_names(&self) -> Vec<String> {
        self.sites.keys().cloned().collect()
    }

    pub fn node_type(&self, id: &str) -> Option<Arc<NodeType>> {
        self.node_types.read().get(id)
    }

    /// Types that may be added below a node of `parent_type`, sorted by id.
    pub fn addable_node_types(&self, parent_type: &str) -> Vec<Arc<NodeType>> {
        let registry = self.node_types.read();
        registry
            .addable_to(parent_type)
            .iter()
            .filter_map(|id| registry.get(id))
            .collect()
    }

    pub fn register_node_type(&self, node_type: NodeType) -> HostResult<()> {
        let id = node_type.id.clone();
        match self.node_types.write().register(node_type)? {
            monsti_types::RegisterOutcome::Registered => tracing::info!(node_type = %id, "node type registered"),
            monsti_types::RegisterOutcome::AlreadyRegistered => {
                tracing::debug!(node_type = %id, "node type already registered")
            }
        }
        Ok(())
    }

    /// Stop accepting node type registrations.
    pub fn freeze_node_types(&self) {
        self.node_types.write().freeze();
    }

    /// Settings of `site`, with blanks filled from its `site.yaml`.
    pub fn site_settings(&self, site: &str) -> HostResult<SiteSettings> {
        let config = self.site(site)?;
        let doc = self.store.load_settings(site)?.unwrap_or_else(|| json!({}));
        let context = SiteContext::new(&config.timezone, &config.locale);
        let mut loaded = SiteSettings::decode(&doc, &context)?;
        loaded.default_text(settings::SITE_TITLE, &config.title);
        loaded.default_text(settings::LOCALE, &config.locale);
        loaded.default_text(settings::TIMEZONE, &config.timezone);
        loaded.default_text(settings::BASE_URL, &config.base_url);
        loaded.default_text(settings::EMAIL_NAME, &config.email_name);
        loaded.default_text(settings::EMAIL_ADDRESS, &config.email_address);
        loaded.default_text(settings::OWNER_NAME, &config.owner.name);
        loaded.default_text(settings::OWNER_EMAIL, &config.owner.email);
        loaded.default_text(settings::SESSION_AUTH_KEY, &config.session_auth_key);
        loaded.default_text(settings::PASSWORD_TOKEN_KEY, &config.password_token_key);
        Ok(loaded)
    }

    pub fn write_site_settings(&self, site: &str, settings: &SiteSettings) -> HostResult<()> {
        self.site(site)?;
        self.store.write_settings(site, &settings.to_document())?;
        Ok(())
    }

    pub fn site_context(&self, site: &str) -> HostResult<SiteContext> {
        Ok(self.site_settings(site)?.site_context())
    }

    fn decode(&self, raw: &Value, context: &SiteContext) -> HostResult<Node> {
        Ok(self.node_types.read().decode_node(raw, context)?)
    }

    pub fn get_node(&self, site: &str, path: &str) -> HostResult<Option<Node>> {
        self.site(site)?;
        let Some(raw) = self.store.get_node(site, path)? else {
            return Ok(None);
        };
        let context = self.site_context(site)?;
        self.decode(&raw, &context).map(Some)
    }

    /// Children of a node; those of unknown types are left out.
    pub fn get_children(&self, site: &str, path: &str) -> HostResult<Vec<Node>> {
        self.site(site)?;
        let context = self.site_context(site)?;
        let mut children = Vec::new();
        for raw in self.store.get_children(site, path)? {
            match self.decode(&raw, &context) {
                Ok(node) => children.push(node),
                Err(err) => tracing::warn!(site, %err, "skipping child node"),
            }
        }
        Ok(children)
    }

    /// A fresh node of `node_type` at `path`.
    pub fn new_node(&self, site: &str, node_type: Arc<NodeType>, path: &str) -> HostResult<Node> {
        let context = self.site_context(site)?;
        let registry = self.node_types.read();
        Ok(Node::new(node_type, path, Vec::new(), registry.field_types(), &context)?)
    }

    /// Persist `node`, stamping `changed` with the current second. A node
    /// written twice within one second still gets a strictly later stamp.
    pub fn write_node(&self, site: &str, node: &mut Node) -> HostResult<()> {
        self.site(site)?;
        let previous = self
            .store
            .get_node(site, &node.path)?
            .and_then(|doc| doc.get("Changed").and_then(Value::as_str).map(str::to_string))
            .and_then(|raw| time::parse(&raw).ok());
        node.changed = next_changed(previous, time::now_secs());
        self.store.write_node(site, &node.path, &node.to_json()?)?;
        Ok(())
    }

    /// Register an in-flight request so modules can look it up; it is
    /// removed when the guard drops.
    pub fn begin_request(self: &Arc<Self>, mut info: RequestInfo) -> RequestGuard {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        info.id = id;
        self.requests.write().insert(id, info);
        RequestGuard {
            monsti: self.clone(),
            id,
        }
    }

    pub fn request(&self, id: u64) -> Option<RequestInfo> {
        self.requests.read().get(&id).cloned()
    }

    pub fn update_request(&self, id: u64, update: impl FnOnce(&mut RequestInfo)) {
        if let Some(info) = self.requests.write().get_mut(&id) {
            update(info);
        }
    }

    /// Emit a built-in signal to every module subscribed to it.
    pub async fn emit<A, R>(&self, name: &str, args: &A) -> HostResult<Vec<Result<R, String>>>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let blob = self.schemas.encode_args(name, args)?;
        let results = self.bus.emit(name, &blob).await;
        Ok(self.schemas.decode_results(name, results))
    }

    /// Navigation source over the nodes of `site` as seen at `now`.
    pub fn nav_source<'a>(&'a self, site: &'a str, now: DateTime<Utc>) -> SiteNav<'a> {
        SiteNav {
            monsti: self,
            site,
            now,
        }
    }
}

fn next_changed(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(previous) if previous >= now => previous + chrono::Duration::seconds(1),
        _ => now,
    }
}

pub struct RequestGuard {
    monsti: Arc<Monsti>,
    id: u64,
}

impl RequestGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.monsti.requests.write().remove(&self.id);
    }
}

pub struct SiteNav<'a> {
    monsti: &'a Monsti,
    site: &'a str,
    now: DateTime<Utc>,
}

impl SiteNav<'_> {
    fn nav_node(&self, node: &Node) -> NavNode {
        NavNode {
            path: node.path.clone(),
            title: node.title().unwrap_or("Untitled").to_string(),
            order: node.order,
            hide: node.hide || node.node_type.hide,
            public: node.is_published(self.now),
        }
    }
}

impl NavSource for SiteNav<'_> {
    type Error = HostError;

    fn node(&self, path: &str) -> HostResult<Option<NavNode>> {
        Ok(self
            .monsti
            .get_node(self.site, path)?
            .map(|node| self.nav_node(&node)))
    }

    fn children(&self, path: &str) -> HostResult<Vec<NavNode>> {
        Ok(self
            .monsti
            .get_children(self.site, path)?
            .iter()
            .map(|node| self.nav_node(node))
            .collect())
    }
}

fn wire(err: HostError) -> WireError {
    match err {
        HostError::Store(StoreError::Exists(target)) => {
            WireError::conflict(format!("target '{target}' already exists"))
        }
        HostError::Store(StoreError::InvalidName(name)) => {
            WireError::invalid_request(format!("invalid name '{name}'"))
        }
        HostError::UnknownSite(site) => WireError::not_found(format!("unknown site {site}")),
        HostError::Node(NodeError::RegistryFrozen) => {
            WireError::new("frozen", "node types can only be registered during module initialization")
        }
        other => WireError::internal(other.to_string()),
    }
}

impl Monsti {
    /// Modules may only subscribe to and emit signals with a schema.
    fn known_signal(&self, name: &str) -> Result<(), WireError> {
        self.schemas
            .get(name)
            .map(drop)
            .map_err(|_| WireError::invalid_request(format!("unregistered signal {name}")))
    }
}

fn bus_error(err: BusError) -> WireError {
    WireError::new("signal_error", err.to_string())
}

fn params<T: DeserializeOwned>(params: Value) -> Result<T, WireError> {
    serde_json::from_value(params).map_err(|e| WireError::decode(e.to_string()))
}

fn reply<T: Serialize>(value: &T) -> Result<Value, WireError> {
    serde_json::to_value(value).map_err(|e| WireError::internal(e.to_string()))
}

fn empty() -> Result<Value, WireError> {
    Ok(json!({}))
}

impl Monsti {
    fn node_reply(&self, site: &str, raw: Value) -> HostResult<NodeReply> {
        let type_id = raw
            .get("Type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let node_type = self
            .node_type(&type_id)
            .ok_or(NodeError::UnknownNodeType(type_id))?;
        let settings = self.site_settings(site)?;
        Ok(NodeReply {
            node: raw,
            node_type: (*node_type).clone(),
            timezone: settings.timezone().to_string(),
            locale: settings.locale().to_string(),
        })
    }

    fn rpc_get_node(&self, p: NodeParams) -> HostResult<Option<NodeReply>> {
        self.site(&p.site)?;
        match self.store.get_node(&p.site, &p.path)? {
            Some(raw) => self.node_reply(&p.site, raw).map(Some),
            None => Ok(None),
        }
    }

    fn rpc_get_children(&self, p: NodeParams) -> HostResult<Vec<NodeReply>> {
        self.site(&p.site)?;
        let mut replies = Vec::new();
        for raw in self.store.get_children(&p.site, &p.path)? {
            match self.node_reply(&p.site, raw) {
                Ok(reply) => replies.push(reply),
                Err(err) => tracing::warn!(site = %p.site, %err, "skipping child node"),
            }
        }
        Ok(replies)
    }

    fn rpc_write_node(&self, p: WriteNodeParams) -> HostResult<()> {
        let context = self.site_context(&p.site)?;
        let mut node = self.decode(&p.node, &context)?;
        node.path = paths::clean_path(&p.path);
        self.write_node(&p.site, &mut node)
    }

    fn rpc_to_cache(&self, p: ToCacheParams) -> HostResult<CacheMods> {
        self.site(&p.site)?;
        let mut mods = p.mods;
        self.store
            .cache()
            .to_cache(&p.site, &p.node, &p.id, &p.content, &mut mods)?;
        Ok(mods)
    }

    fn rpc_from_cache(&self, p: CacheKeyParams) -> HostResult<FromCacheReply> {
        self.site(&p.site)?;
        Ok(match self.store.cache().from_cache(&p.site, &p.node, &p.id) {
            Some(entry) => FromCacheReply {
                content: Some(entry.data),
                mods: Some(entry.mods),
            },
            None => FromCacheReply::default(),
        })
    }

    fn rpc_load_settings(&self, p: SiteParams) -> HostResult<SiteSettingsDoc> {
        let settings = self.site_settings(&p.site)?;
        Ok(SiteSettingsDoc {
            site: p.site,
            settings: settings.to_document(),
        })
    }

    fn rpc_write_settings(&self, p: SiteSettingsDoc) -> HostResult<()> {
        let config = self.site(&p.site)?;
        let provisional = SiteSettings::decode(&p.settings, &SiteContext::new(&config.timezone, &config.locale))?;
        let settings = SiteSettings::decode(&p.settings, &provisional.site_context())?;
        self.write_site_settings(&p.site, &settings)
    }
}

#[async_trait]
impl RpcService for Monsti {
    async fn call(&self, conn: &ConnectionContext, method: &str, p: Value) -> Result<Value, WireError> {
        match method {
            methods::MODULE_INIT_DONE => {
                let p: ModuleInitDoneParams = params(p)?;
                if self.barrier.done(&p.name) {
                    tracing::info!(module = %p.name, "module initialized");
                } else {
                    tracing::warn!(module = %p.name, "init report from unexpected module");
                }
                empty()
            }
            methods::GET_REQUEST => {
                let p: GetRequestParams = params(p)?;
                reply(&self.request(p.id))
            }
            methods::REGISTER_NODE_TYPE => {
                let p: RegisterNodeTypeParams = params(p)?;
                self.register_node_type(p.node_type).map_err(wire)?;
                empty()
            }
            methods::GET_NODE_TYPE => {
                let p: GetNodeTypeParams = params(p)?;
                match self.node_type(&p.id) {
                    Some(node_type) => reply(&*node_type),
                    None => Err(WireError::not_found(format!("unknown node type '{}'", p.id))),
                }
            }
            methods::GET_NODE_TYPES => reply(&self.node_types.read().ids()),
            methods::GET_ADDABLE_NODE_TYPES => {
                let p: GetAddableNodeTypesParams = params(p)?;
                self.site(&p.site).map_err(wire)?;
                reply(&self.node_types.read().addable_to(&p.node_type))
            }
            methods::GET_NODE => reply(&self.rpc_get_node(params(p)?).map_err(wire)?),
            methods::GET_CHILDREN => reply(&self.rpc_get_children(params(p)?).map_err(wire)?),
            methods::GET_NODE_DATA => {
                let p: NodeDataParams = params(p)?;
                self.site(&p.site).map_err(wire)?;
                let content = self
                    .store
                    .get_node_data(&p.site, &p.path, &p.file)
                    .map_err(|e| wire(e.into()))?;
                reply(&NodeDataReply { content })
            }
            methods::WRITE_NODE => {
                self.rpc_write_node(params(p)?).map_err(wire)?;
                empty()
            }
            methods::WRITE_NODE_DATA => {
                let p: WriteNodeDataParams = params(p)?;
                self.site(&p.site).map_err(wire)?;
                self.store
                    .write_node_data(&p.site, &p.path, &p.file, &p.content)
                    .map_err(|e| wire(e.into()))?;
                empty()
            }
            methods::REMOVE_NODE_DATA => {
                let p: NodeDataParams = params(p)?;
                self.site(&p.site).map_err(wire)?;
                self.store
                    .remove_node_data(&p.site, &p.path, &p.file)
                    .map_err(|e| wire(e.into()))?;
                empty()
            }
            methods::REMOVE_NODE => {
                let p: NodeParams = params(p)?;
                self.site(&p.site).map_err(wire)?;
                self.store
                    .remove_node(&p.site, &p.path)
                    .map_err(|e| wire(e.into()))?;
                empty()
            }
            methods::RENAME_NODE => {
                let p: RenameNodeParams = params(p)?;
                self.site(&p.site).map_err(wire)?;
                self.store
                    .rename_node(&p.site, &p.source, &p.target)
                    .map_err(|e| wire(e.into()))?;
                empty()
            }
            methods::GET_CONFIG => {
                let p: GetConfigParams = params(p)?;
                self.site(&p.site).map_err(wire)?;
                let value = self
                    .store
                    .get_config(&p.site, &p.module, &p.name)
                    .map_err(|e| wire(e.into()))?;
                reply(&ConfigReply {
                    found: value.is_some(),
                    value: value.unwrap_or(Value::Null),
                })
            }
            methods::LOAD_SITE_SETTINGS => reply(&self.rpc_load_settings(params(p)?).map_err(wire)?),
            methods::WRITE_SITE_SETTINGS => {
                self.rpc_write_settings(params(p)?).map_err(wire)?;
                empty()
            }
            methods::TO_CACHE => reply(&self.rpc_to_cache(params(p)?).map_err(wire)?),
            methods::FROM_CACHE => reply(&self.rpc_from_cache(params(p)?).map_err(wire)?),
            methods::MARK_DEP => {
                let p: MarkDepParams = params(p)?;
                self.site(&p.site).map_err(wire)?;
                self.store
                    .cache()
                    .mark_dep(&p.site, &p.dep)
                    .map_err(|e| wire(e.into()))?;
                empty()
            }
            methods::CONNECT_SIGNAL => {
                let p: ConnectSignalParams = params(p)?;
                self.known_signal(&p.signal)?;
                conn.claim_client(&p.id);
                self.bus.connect(&p.id, &p.signal);
                empty()
            }
            methods::WAIT_SIGNAL => {
                let p: WaitSignalParams = params(p)?;
                let (name, args) = self.bus.wait(&p.id).await.map_err(bus_error)?;
                reply(&WaitSignalReply { name, args })
            }
            methods::FINISH_SIGNAL => {
                let p: FinishSignalParams = params(p)?;
                let result = SignalResult {
                    ret: p.ret,
                    error: (!p.error.is_empty()).then_some(p.error),
                };
                self.bus.finish(&p.id, result).map_err(bus_error)?;
                empty()
            }
            methods::EMIT_SIGNAL => {
                let p: EmitSignalParams = params(p)?;
                self.known_signal(&p.name)?;
                let results = self.bus.emit(&p.name, &p.args).await;
                reply(&EmitSignalReply { results })
            }
            methods::SEND_MAIL => {
                let p: SendMailParams = params(p)?;
                self.mailer
                    .send(&p.from, &p.to, &p.message)
                    .await
                    .map_err(wire)?;
                empty()
            }
            other => Err(WireError::unknown_method(other)),
        }
    }

    async fn disconnected(&self, conn: &ConnectionContext) {
        for client in conn.clients() {
            self.bus.drop_client(&client);
        }
    }
}
