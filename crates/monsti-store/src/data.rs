use crate::{
    CacheEngine, StoreError, StoreResult, create_private_dir, file_name, io_error, json_error,
    read_optional, write_atomic,
};
use monsti_types::{CacheDep, User, node::PATH_TYPE, paths};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

const NODE_FILE: &str = "node.json";
const USERS_FILE: &str = "users.json";
const SETTINGS_FILE: &str = "settings.json";

/// Site content on disk.
///
/// Layout below the data directory: `<site>/nodes/<path>/node.json` plus
/// per-node blobs, `<site>/cache`, `<site>/users.json` and
/// `<site>/settings.json`. Module configuration is read from
/// `<config>/sites/<site>/<module>.json`.
#[derive(Debug)]
pub struct DataStore {
    data_dir: PathBuf,
    config_dir: PathBuf,
    cache: CacheEngine,
}

impl DataStore {
    pub fn open(data_dir: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        DataStore {
            cache: CacheEngine::new(data_dir.clone()),
            data_dir,
            config_dir: config_dir.into(),
        }
    }

    pub fn cache(&self) -> &CacheEngine {
        &self.cache
    }

    pub fn site_dir(&self, site: &str) -> PathBuf {
        self.data_dir.join(site)
    }

    pub fn nodes_root(&self, site: &str) -> PathBuf {
        self.site_dir(site).join("nodes")
    }

    fn node_dir(&self, site: &str, path: &str) -> PathBuf {
        let clean = paths::clean_path(path);
        self.nodes_root(site).join(clean.trim_start_matches('/'))
    }

    fn blob_path(&self, site: &str, path: &str, file: &str) -> StoreResult<PathBuf> {
        Ok(self.node_dir(site, path).join(file_name(file)?))
    }

    /// The raw node document with `Path` injected, a `core.Path` stub for
    /// bare directories, or `None` if nothing exists at `path`.
    pub fn get_node(&self, site: &str, path: &str) -> StoreResult<Option<Value>> {
        let path = paths::clean_path(path);
        let dir = self.node_dir(site, &path);
        let node_file = dir.join(NODE_FILE);
        let mut doc = match read_optional(&node_file)? {
            Some(bytes) => match serde_json::from_slice::<Value>(&bytes)
                .map_err(|e| json_error(&node_file, e))?
            {
                Value::Object(map) => map,
                _ => {
                    return Err(StoreError::InvalidName(format!(
                        "{} is not a JSON object",
                        node_file.display()
                    )));
                }
            },
            None if dir.is_dir() => {
                let mut map = Map::new();
                map.insert("Type".into(), Value::String(PATH_TYPE.into()));
                map
            }
            None => return Ok(None),
        };
        doc.insert("Path".into(), Value::String(path));
        Ok(Some(Value::Object(doc)))
    }

    /// Child node documents in name order; unreadable children are
    /// skipped.
    pub fn get_children(&self, site: &str, path: &str) -> StoreResult<Vec<Value>> {
        let path = paths::clean_path(path);
        let dir = self.node_dir(site, &path);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(dir, err)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&dir, e))?;
            // metadata() follows symlinks, so linked nodes count as children
            if !fs::metadata(entry.path()).is_ok_and(|m| m.is_dir()) {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        let mut children = Vec::with_capacity(names.len());
        for name in names {
            let child = paths::join_path(&path, &name);
            match self.get_node(site, &child) {
                Ok(Some(doc)) => children.push(doc),
                Ok(None) => {}
                Err(err) => tracing::warn!(site, path = %child, %err, "skipping unreadable node"),
            }
        }
        Ok(children)
    }

    pub fn node_exists(&self, site: &str, path: &str) -> bool {
        self.node_dir(site, path).is_dir()
    }

    /// Persist a node document. `Path` is implied by the location and not
    /// stored.
    pub fn write_node(&self, site: &str, path: &str, doc: &Value) -> StoreResult<()> {
        let mut doc = doc.clone();
        if let Value::Object(map) = &mut doc {
            map.remove("Path");
        }
        let file = self.node_dir(site, path).join(NODE_FILE);
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| json_error(&file, e))?;
        write_atomic(&file, &bytes)?;
        self.cache.mark_dep(site, &CacheDep::node(paths::clean_path(path)))
    }

    pub fn get_node_data(&self, site: &str, path: &str, file: &str) -> StoreResult<Option<Vec<u8>>> {
        read_optional(&self.blob_path(site, path, file)?)
    }

    pub fn write_node_data(&self, site: &str, path: &str, file: &str, content: &[u8]) -> StoreResult<()> {
        write_atomic(&self.blob_path(site, path, file)?, content)
    }

    pub fn remove_node_data(&self, site: &str, path: &str, file: &str) -> StoreResult<()> {
        let blob = self.blob_path(site, path, file)?;
        fs::remove_file(&blob).map_err(|e| io_error(blob, e))
    }

    /// Modification time of a node blob, for `Last-Modified` headers.
    pub fn node_data_modified(&self, site: &str, path: &str, file: &str) -> Option<std::time::SystemTime> {
        let blob = self.blob_path(site, path, file).ok()?;
        fs::metadata(blob).and_then(|m| m.modified()).ok()
    }

    /// Remove a node and everything below it, invalidating every cache
    /// entry that depends on one of the removed nodes.
    pub fn remove_node(&self, site: &str, path: &str) -> StoreResult<()> {
        let path = paths::clean_path(path);
        if path == "/" {
            return Err(StoreError::InvalidName(path));
        }
        let dir = self.node_dir(site, &path);
        if !dir.exists() {
            return Ok(());
        }
        self.mark_subtree(site, &path, &dir)?;
        fs::remove_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        self.cache.remove_subtree(site, &path)
    }

    /// Move a node subtree. Fails with [`StoreError::Exists`] if the target
    /// is taken.
    pub fn rename_node(&self, site: &str, source: &str, target: &str) -> StoreResult<()> {
        let source = paths::clean_path(source);
        let target = paths::clean_path(target);
        if source == target {
            return Ok(());
        }
        if source == "/" || target == "/" {
            return Err(StoreError::InvalidName(source));
        }
        let from = self.node_dir(site, &source);
        let to = self.node_dir(site, &target);
        if to.exists() {
            return Err(StoreError::Exists(target));
        }
        if let Some(parent) = to.parent() {
            create_private_dir(parent)?;
        }
        self.mark_subtree(site, &source, &from)?;
        fs::rename(&from, &to).map_err(|e| io_error(&from, e))?;
        self.cache.remove_subtree(site, &source)?;
        self.cache.mark_dep(site, &CacheDep::node(target))
    }

    fn mark_subtree(&self, site: &str, path: &str, dir: &Path) -> StoreResult<()> {
        for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
            let entry = entry.map_err(|e| {
                let at = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                io_error(at, io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(dir) else {
                continue;
            };
            let node = paths::join_path(path, &rel.to_string_lossy());
            self.cache.mark_dep(site, &CacheDep::node(node))?;
        }
        self.cache.mark_dep(site, &CacheDep::node(path))
    }

    /// Dotted lookup into `<config>/sites/<site>/<module>.json`.
    ///
    /// `None` if the file does not exist, `Some(Value::Null)` if the name
    /// does not resolve. An empty name returns the whole document.
    pub fn get_config(&self, site: &str, module: &str, name: &str) -> StoreResult<Option<Value>> {
        let file = self
            .config_dir
            .join("sites")
            .join(site)
            .join(format!("{}.json", file_name(module)?));
        let Some(bytes) = read_optional(&file)? else {
            return Ok(None);
        };
        let doc: Value = serde_json::from_slice(&bytes).map_err(|e| json_error(&file, e))?;
        if name.is_empty() {
            return Ok(Some(doc));
        }
        Ok(Some(
            monsti_types::nested::lookup_dotted(&doc, name)
                .cloned()
                .unwrap_or(Value::Null),
        ))
    }

    pub fn load_settings(&self, site: &str) -> StoreResult<Option<Value>> {
        let file = self.site_dir(site).join(SETTINGS_FILE);
        match read_optional(&file)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| json_error(&file, e)),
            None => Ok(None),
        }
    }

    /// Persist the settings document; every page depends on it through the
    /// master template.
    pub fn write_settings(&self, site: &str, doc: &Value) -> StoreResult<()> {
        let file = self.site_dir(site).join(SETTINGS_FILE);
        let bytes = serde_json::to_vec_pretty(doc).map_err(|e| json_error(&file, e))?;
        write_atomic(&file, &bytes)?;
        self.cache.mark_dep(site, &CacheDep::node("/"))
    }

    fn read_users(&self, site: &str) -> StoreResult<BTreeMap<String, User>> {
        let file = self.site_dir(site).join(USERS_FILE);
        match read_optional(&file)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| json_error(&file, e)),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn get_user(&self, site: &str, login: &str) -> StoreResult<Option<User>> {
        Ok(self.read_users(site)?.remove(login).map(|user| User {
            login: login.to_string(),
            ..user
        }))
    }

    pub fn write_user(&self, site: &str, user: &User) -> StoreResult<()> {
        let mut users = self.read_users(site)?;
        users.insert(user.login.clone(), user.clone());
        let file = self.site_dir(site).join(USERS_FILE);
        let bytes = serde_json::to_vec_pretty(&users).map_err(|e| json_error(&file, e))?;
        write_atomic(&file, &bytes)
    }
}
