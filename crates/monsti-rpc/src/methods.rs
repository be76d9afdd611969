//! Method names and their parameter and reply records.

use crate::wire::blob;
use monsti_types::{CacheDep, CacheMods, NodeType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MODULE_INIT_DONE: &str = "Monsti.ModuleInitDone";
pub const GET_REQUEST: &str = "Monsti.GetRequest";
pub const REGISTER_NODE_TYPE: &str = "Monsti.RegisterNodeType";
pub const GET_NODE_TYPE: &str = "Monsti.GetNodeType";
pub const GET_NODE_TYPES: &str = "Monsti.GetNodeTypes";
pub const GET_ADDABLE_NODE_TYPES: &str = "Monsti.GetAddableNodeTypes";
pub const GET_NODE: &str = "Monsti.GetNode";
pub const GET_CHILDREN: &str = "Monsti.GetChildren";
pub const GET_NODE_DATA: &str = "Monsti.GetNodeData";
pub const WRITE_NODE: &str = "Monsti.WriteNode";
pub const WRITE_NODE_DATA: &str = "Monsti.WriteNodeData";
pub const REMOVE_NODE_DATA: &str = "Monsti.RemoveNodeData";
pub const REMOVE_NODE: &str = "Monsti.RemoveNode";
pub const RENAME_NODE: &str = "Monsti.RenameNode";
pub const GET_CONFIG: &str = "Monsti.GetConfig";
pub const LOAD_SITE_SETTINGS: &str = "Monsti.LoadSiteSettings";
pub const WRITE_SITE_SETTINGS: &str = "Monsti.WriteSiteSettings";
pub const TO_CACHE: &str = "Monsti.ToCache";
pub const FROM_CACHE: &str = "Monsti.FromCache";
pub const MARK_DEP: &str = "Monsti.MarkDep";
pub const CONNECT_SIGNAL: &str = "Monsti.ConnectSignal";
pub const WAIT_SIGNAL: &str = "Monsti.WaitSignal";
pub const FINISH_SIGNAL: &str = "Monsti.FinishSignal";
pub const EMIT_SIGNAL: &str = "Monsti.EmitSignal";
pub const SEND_MAIL: &str = "Monsti.SendMail";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInitDoneParams {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequestParams {
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodeTypeParams {
    pub node_type: NodeType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetNodeTypeParams {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAddableNodeTypesParams {
    pub site: String,
    pub node_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeParams {
    pub site: String,
    pub path: String,
}

/// A stored node together with what a module needs to decode it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReply {
    pub node: Value,
    pub node_type: NodeType,
    pub timezone: String,
    pub locale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDataParams {
    pub site: String,
    pub path: String,
    pub file: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeDataReply {
    #[serde(default, with = "blob::option")]
    pub content: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteNodeParams {
    pub site: String,
    pub path: String,
    pub node: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteNodeDataParams {
    pub site: String,
    pub path: String,
    pub file: String,
    #[serde(with = "blob")]
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameNodeParams {
    pub site: String,
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetConfigParams {
    pub site: String,
    pub module: String,
    pub name: String,
}

/// `found` is false when the module has no configuration file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigReply {
    #[serde(rename = "Value")]
    pub value: Value,
    pub found: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteParams {
    pub site: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSettingsDoc {
    pub site: String,
    pub settings: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToCacheParams {
    pub site: String,
    pub node: String,
    pub id: String,
    #[serde(with = "blob")]
    pub content: Vec<u8>,
    #[serde(default)]
    pub mods: CacheMods,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKeyParams {
    pub site: String,
    pub node: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FromCacheReply {
    #[serde(default, with = "blob::option")]
    pub content: Option<Vec<u8>>,
    #[serde(default)]
    pub mods: Option<CacheMods>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkDepParams {
    pub site: String,
    pub dep: CacheDep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectSignalParams {
    pub id: String,
    pub signal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitSignalParams {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitSignalReply {
    pub name: String,
    #[serde(with = "blob")]
    pub args: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishSignalParams {
    pub id: String,
    /// Empty on success.
    #[serde(default)]
    pub error: String,
    #[serde(default, with = "blob::option")]
    pub ret: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitSignalParams {
    pub name: String,
    #[serde(with = "blob")]
    pub args: Vec<u8>,
}

/// One subscriber's answer to an emitted signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalResult {
    #[serde(default, with = "blob::option")]
    pub ret: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmitSignalReply {
    pub results: Vec<SignalResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMailParams {
    pub from: String,
    pub to: Vec<String>,
    #[serde(with = "blob")]
    pub message: Vec<u8>,
}
