//! Module side of Monsti.
//!
//! The daemon starts every configured module as `monsti-<name>
//! <config-dir>`. A module dials the daemon socket, runs its setup
//! (registering node types and signal handlers), reports `ModuleInitDone`
//! and then answers signals until the daemon goes away.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! monsti_module::start_module("hello", async |ctx: &mut monsti_module::ModuleContext| {
//!     tracing::info!(module = ctx.name(), "setting up");
//!     Ok(())
//! })
//! .await
//! # }
//! ```

mod handler;

pub use handler::{Typed, TypedHandler};

use anyhow::Context;
use monsti_rpc::{
    MonstiClient, SOCKET_NAME, SessionPool, SignalHandler, answer_signals, subscribe_signals,
};
use monsti_types::NodeType;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing_subscriber::EnvFilter;

/// Daemon settings file inside the config directory.
pub const SETTINGS_FILE: &str = "monsti.yaml";

const POOL_CAPACITY: usize = 4;

#[derive(Debug, Deserialize)]
struct DaemonDirectories {
    run: PathBuf,
}

/// The part of `monsti.yaml` a module cares about.
#[derive(Debug, Deserialize)]
struct DaemonSettings {
    directories: DaemonDirectories,
}

/// Where the daemon listens, and the module's own settings.
#[derive(Debug, Clone)]
pub struct ModuleSettings {
    pub socket_path: PathBuf,
    /// Contents of `<config>/<name>.yaml`; `Null` if there is no such file.
    pub module: serde_yaml::Value,
}

impl ModuleSettings {
    pub fn load(config_dir: &Path, name: &str) -> anyhow::Result<Self> {
        let path = config_dir.join(SETTINGS_FILE);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("could not read {}", path.display()))?;
        let daemon: DaemonSettings = serde_yaml::from_str(&raw)
            .with_context(|| format!("could not parse {}", path.display()))?;
        let run = match daemon.directories.run {
            run if run.is_absolute() => run,
            run => config_dir.join(run),
        };

        let path = config_dir.join(format!("{name}.yaml"));
        let module = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_yaml::from_str(&raw)
                .with_context(|| format!("could not parse {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => serde_yaml::Value::Null,
            Err(err) => {
                return Err(err).with_context(|| format!("could not read {}", path.display()));
            }
        };
        Ok(ModuleSettings {
            socket_path: run.join(SOCKET_NAME),
            module,
        })
    }
}

/// Handed to a module's setup.
pub struct ModuleContext {
    name: String,
    settings: ModuleSettings,
    pool: Arc<SessionPool>,
    handlers: Vec<Arc<dyn SignalHandler>>,
}

impl ModuleContext {
    pub fn new(name: &str, settings: ModuleSettings) -> Self {
        let pool = Arc::new(SessionPool::new(&settings.socket_path, POOL_CAPACITY));
        ModuleContext {
            name: name.to_string(),
            settings,
            pool,
            handlers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module's own settings file.
    pub fn settings(&self) -> &serde_yaml::Value {
        &self.settings.module
    }

    /// Connections to the daemon. Handlers that call back into the daemon
    /// keep a clone of this.
    pub fn pool(&self) -> Arc<SessionPool> {
        self.pool.clone()
    }

    pub async fn register_node_type(&self, node_type: NodeType) -> anyhow::Result<()> {
        let id = node_type.id.clone();
        let mut session = self.pool.session().await.context("could not reach the daemon")?;
        session
            .register_node_type(node_type)
            .await
            .with_context(|| format!("could not register node type {id}"))?;
        self.pool.free(session);
        tracing::debug!(module = %self.name, node_type = %id, "node type registered");
        Ok(())
    }

    /// Answer a signal once setup is done.
    pub fn handle(&mut self, handler: impl SignalHandler) {
        self.handlers.push(Arc::new(handler));
    }
}

/// Run a module against the daemon configured in `config_dir`.
///
/// Returns only when the connection to the daemon is lost or setup fails.
pub async fn run_module(
    name: &str,
    config_dir: &Path,
    setup: impl AsyncFnOnce(&mut ModuleContext) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let settings = ModuleSettings::load(config_dir, name)?;
    let mut ctx = ModuleContext::new(name, settings);
    setup(&mut ctx)
        .await
        .with_context(|| format!("setup of module {name} failed"))?;

    // subscriptions must be in place before the daemon starts serving
    let socket = &ctx.settings.socket_path;
    let mut signals = MonstiClient::connect(socket)
        .await
        .with_context(|| format!("could not connect to {}", socket.display()))?;
    subscribe_signals(&mut signals, &ctx.handlers).await?;
    let mut session = ctx.pool.session().await?;
    session.module_init_done(name).await?;
    ctx.pool.free(session);
    tracing::info!(module = name, handlers = ctx.handlers.len(), "module initialized");

    answer_signals(&mut signals, &ctx.handlers)
        .await
        .context("lost the connection to the daemon")
}

/// Entry point of a module binary. The config directory is the first
/// command line argument; logs go to stderr, which the daemon forwards.
pub async fn start_module(
    name: &str,
    setup: impl AsyncFnOnce(&mut ModuleContext) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .without_time()
        .try_init();
    let config_dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .with_context(|| format!("usage: monsti-{name} <config-dir>"))?;
    run_module(name, &config_dir, setup).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn settings_locate_the_socket_and_module_file() {
        let dir = TempDir::new().expect("tmp");
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            "directories:\n  data: data\n  share: share\n  run: run\n",
        )
        .expect("write");
        let settings = ModuleSettings::load(dir.path(), "hello").expect("load");
        assert_eq!(settings.socket_path, dir.path().join("run").join(SOCKET_NAME));
        assert!(settings.module.is_null());

        std::fs::write(dir.path().join("hello.yaml"), "greeting: hi\n").expect("write");
        let settings = ModuleSettings::load(dir.path(), "hello").expect("load");
        assert_eq!(settings.module["greeting"].as_str(), Some("hi"));
    }

    #[test]
    fn missing_daemon_settings_fail() {
        let dir = TempDir::new().expect("tmp");
        let err = ModuleSettings::load(dir.path(), "hello").expect_err("no monsti.yaml");
        assert!(err.to_string().contains("monsti.yaml"));
    }
}
