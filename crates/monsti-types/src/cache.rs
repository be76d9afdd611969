//! Cache dependency records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Something a cache entry depends on: a node, optionally one of its cache
/// entries, and how deep below the node changes count.
///
/// `descend` is `0` for the node itself, `N > 0` for changes up to `N`
/// levels below it and `-1` for any descendant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheDep {
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
    #[serde(default)]
    pub descend: i32,
}

impl CacheDep {
    pub fn node(node: impl Into<String>) -> Self {
        CacheDep {
            node: node.into(),
            ..Default::default()
        }
    }

    pub fn entry(node: impl Into<String>, cache: impl Into<String>) -> Self {
        CacheDep {
            node: node.into(),
            cache: Some(cache.into()),
            descend: 0,
        }
    }

    pub fn descend(mut self, levels: i32) -> Self {
        self.descend = levels;
        self
    }
}

/// Modifiers collected while producing cacheable output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheMods {
    #[serde(default)]
    pub deps: Vec<CacheDep>,
    #[serde(default)]
    pub skip: bool,
    #[serde(default, with = "crate::time::option")]
    pub expire: Option<DateTime<Utc>>,
}

impl CacheMods {
    pub fn with_dep(dep: CacheDep) -> Self {
        CacheMods {
            deps: vec![dep],
            ..Default::default()
        }
    }

    pub fn add_dep(&mut self, dep: CacheDep) {
        if !self.deps.contains(&dep) {
            self.deps.push(dep);
        }
    }

    /// Union of deps, `skip` if either skips, earliest expiry.
    pub fn join(&mut self, other: &CacheMods) {
        for dep in &other.deps {
            self.add_dep(dep.clone());
        }
        self.skip |= other.skip;
        self.expire = match (self.expire, other.expire) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
}
