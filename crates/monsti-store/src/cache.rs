use crate::{StoreResult, create_private_dir, file_name, io_error, json_error, read_optional, write_atomic};
use chrono::{DateTime, Utc};
use monsti_types::{CacheDep, CacheMods, paths};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    fs, io,
    path::{Path, PathBuf},
};

const DATA_DIR: &str = ".data";
const RDEPS_FILE: &str = ".rdeps.json";

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(default, with = "monsti_types::time::option")]
    expire: Option<DateTime<Utc>>,
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

/// Reverse dependency index entry stored at the node a dep points to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CacheDepPair {
    dep: CacheDep,
    #[serde(rename = "RDeps")]
    rdeps: Vec<CacheDep>,
}

/// A cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedEntry {
    pub data: Vec<u8>,
    /// Compact mods pointing at the entry itself, for callers composing
    /// their own cache entries from this one.
    pub mods: CacheMods,
}

/// Per-site page cache with dependency tracking, rooted at
/// `<data>/<site>/cache`.
///
/// Each entry lives at `<node>/.data/<id>`; each node directory keeps a
/// `.rdeps.json` index of the entries depending on it. Marking a dep
/// removes matching entries, then whatever depends on those, and walks up
/// the tree so ancestors with `descend` deps see the change.
#[derive(Debug)]
pub struct CacheEngine {
    data_root: PathBuf,
    lock: Mutex<()>,
}

impl CacheEngine {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        CacheEngine {
            data_root: data_root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn site_root(&self, site: &str) -> PathBuf {
        self.data_root.join(site).join("cache")
    }

    fn node_dir(root: &Path, node: &str) -> PathBuf {
        root.join(paths::clean_path(node).trim_start_matches('/'))
    }

    fn entry_path(root: &Path, node: &str, id: &str) -> StoreResult<PathBuf> {
        Ok(Self::node_dir(root, node).join(DATA_DIR).join(file_name(id)?))
    }

    /// Store `content` under `(site, node, id)`.
    ///
    /// Suppressed when `mods.skip` is set. On success `mods.deps` is
    /// replaced by the single dep on the new entry.
    pub fn to_cache(
        &self,
        site: &str,
        node: &str,
        id: &str,
        content: &[u8],
        mods: &mut CacheMods,
    ) -> StoreResult<()> {
        if mods.skip {
            return Ok(());
        }
        let root = self.site_root(site);
        let this = CacheDep::entry(paths::clean_path(node), id);
        let path = Self::entry_path(&root, node, id)?;
        let _guard = self.lock.lock();
        for dep in &mods.deps {
            Self::append_rdep(&root, dep, &this)?;
        }
        let entry = StoredEntry {
            expire: mods.expire,
            data: content.to_vec(),
        };
        write_atomic(&path, &serde_cbor::to_vec(&entry)?)?;
        mods.deps = vec![this];
        Ok(())
    }

    /// Fetch an entry; absent, expired and unreadable entries are misses.
    pub fn from_cache(&self, site: &str, node: &str, id: &str) -> Option<CachedEntry> {
        let root = self.site_root(site);
        let path = Self::entry_path(&root, node, id).ok()?;
        let bytes = match read_optional(&path) {
            Ok(bytes) => bytes?,
            Err(err) => {
                tracing::warn!(site, node, id, %err, "could not read cache entry");
                return None;
            }
        };
        let entry: StoredEntry = match serde_cbor::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(site, node, id, %err, "could not decode cache entry");
                return None;
            }
        };
        if entry.expire.is_some_and(|expire| expire < Utc::now()) {
            return None;
        }
        Some(CachedEntry {
            data: entry.data,
            mods: CacheMods {
                deps: vec![CacheDep::entry(paths::clean_path(node), id)],
                skip: false,
                expire: entry.expire,
            },
        })
    }

    /// Invalidate every entry whose deps match `dep`, transitively.
    pub fn mark_dep(&self, site: &str, dep: &CacheDep) -> StoreResult<()> {
        let root = self.site_root(site);
        let _guard = self.lock.lock();
        let mut queue = VecDeque::from([(
            CacheDep {
                node: paths::clean_path(&dep.node),
                ..dep.clone()
            },
            0,
        )]);
        while let Some((dep, level)) = queue.pop_front() {
            for marked in Self::mark_node(&root, &dep, level)? {
                queue.push_back((marked, 0));
            }
            if dep.node != "/" {
                let parent = CacheDep::node(paths::parent_path(&dep.node));
                queue.push_back((parent, level + 1));
            }
        }
        Ok(())
    }

    /// Remove all cache state below `node`.
    pub fn remove_subtree(&self, site: &str, node: &str) -> StoreResult<()> {
        let dir = Self::node_dir(&self.site_root(site), node);
        let _guard = self.lock.lock();
        match fs::remove_dir_all(&dir) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(io_error(dir, err)),
            _ => Ok(()),
        }
    }

    /// Handle one node for a mark arriving `level` levels below it.
    /// Returns the entries depending on the matched deps.
    fn mark_node(root: &Path, dep: &CacheDep, level: i32) -> StoreResult<Vec<CacheDep>> {
        if level == 0 {
            if let Some(cache) = &dep.cache {
                let path = Self::entry_path(root, &dep.node, cache)?;
                if let Err(err) = fs::remove_file(&path) {
                    if err.kind() != io::ErrorKind::NotFound {
                        return Err(io_error(path, err));
                    }
                }
            }
        }
        let pairs = Self::read_rdeps(root, &dep.node);
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let mut marked = Vec::new();
        let mut kept = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let stored = &pair.dep;
            let matches = stored.descend == -1
                || (stored.descend >= level && stored.cache == dep.cache);
            if matches {
                marked.extend(pair.rdeps);
            } else {
                kept.push(pair);
            }
        }
        Self::write_rdeps(root, &dep.node, &kept)?;
        Ok(marked)
    }

    fn read_rdeps(root: &Path, node: &str) -> Vec<CacheDepPair> {
        let path = Self::node_dir(root, node).join(RDEPS_FILE);
        let bytes = match read_optional(&path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(%err, "could not read reverse cache deps");
                return Vec::new();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), %err, "discarding unreadable reverse cache deps");
            Vec::new()
        })
    }

    fn write_rdeps(root: &Path, node: &str, pairs: &[CacheDepPair]) -> StoreResult<()> {
        let dir = Self::node_dir(root, node);
        let path = dir.join(RDEPS_FILE);
        let bytes = serde_json::to_vec(pairs).map_err(|e| json_error(&path, e))?;
        create_private_dir(&dir)?;
        write_atomic(&path, &bytes)
    }

    fn append_rdep(root: &Path, dep: &CacheDep, rdep: &CacheDep) -> StoreResult<()> {
        let dep = CacheDep {
            node: paths::clean_path(&dep.node),
            ..dep.clone()
        };
        let mut pairs = Self::read_rdeps(root, &dep.node);
        match pairs.iter_mut().find(|p| p.dep == dep) {
            Some(pair) if pair.rdeps.contains(rdep) => return Ok(()),
            Some(pair) => pair.rdeps.push(rdep.clone()),
            None => pairs.push(CacheDepPair {
                dep: dep.clone(),
                rdeps: vec![rdep.clone()],
            }),
        }
        Self::write_rdeps(root, &dep.node, &pairs)
    }
}
