//! Filesystem-backed content store and page cache of a Monsti site.

mod cache;
mod data;

pub use cache::{CacheEngine, CachedEntry};
pub use data::DataStore;

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error at {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("CBOR serialization error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    #[error("target '{0}' already exists")]
    Exists(String),
    #[error("invalid name '{0}'")]
    InvalidName(String),
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source: err,
    }
}

pub(crate) fn json_error(path: impl Into<PathBuf>, err: serde_json::Error) -> StoreError {
    StoreError::Json {
        path: path.into(),
        source: err,
    }
}

/// Create `dir` and its parents, private to the daemon user.
pub(crate) fn create_private_dir(dir: &Path) -> StoreResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|e| io_error(dir, e))
}

/// Write `bytes` to a temporary sibling and rename it over `path`, so
/// readers see either the old or the new content.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::InvalidName(path.display().to_string()))?;
    create_private_dir(parent)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::InvalidName(path.display().to_string()))?;
    let tmp = parent.join(format!(".{name}.tmp-{}", uuid::Uuid::new_v4()));
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let result = options
        .open(&tmp)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp, path));
    if let Err(err) = result {
        let _ = fs::remove_file(&tmp);
        return Err(io_error(path, err));
    }
    Ok(())
}

/// Read a file, mapping "not found" to `None`.
pub(crate) fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(path, err)),
    }
}

/// Validate a blob or cache file name: a single path component.
pub(crate) fn file_name(name: &str) -> StoreResult<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(name)
}
