//! Built-in signals and their argument and return records.

use crate::{cache::CacheMods, node::EmbedNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const RENDER_NODE: &str = "monsti.RenderNode";
pub const NODE_CONTEXT: &str = "monsti.NodeContext";

pub const RENDER_NODE_ARGS: &str = "monsti.RenderNodeArgs";
pub const RENDER_NODE_RET: &str = "monsti.RenderNodeRet";
pub const NODE_CONTEXT_ARGS: &str = "monsti.NodeContextArgs";
pub const NODE_CONTEXT_RET: &str = "monsti.NodeContextRet";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderNodeArgs {
    pub request: u64,
    pub node_type: String,
    pub embed: Option<EmbedNode>,
}

/// Contribution to the template context of a rendered node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderNodeRet {
    /// JSON object merged into the template context.
    #[serde(with = "serde_bytes")]
    pub context: Vec<u8>,
    pub redirect: Option<String>,
    pub mods: Option<CacheMods>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeContextArgs {
    pub request: u64,
    pub node_type: String,
    pub embed: Option<EmbedNode>,
}

/// HTML fragments keyed by context name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeContextRet {
    pub context: BTreeMap<String, String>,
    pub mods: Option<CacheMods>,
}
