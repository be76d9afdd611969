//! Daemon lifecycle.
//!
//! Startup order:
//! 1. Load settings and sites
//! 2. Open the RPC socket so modules can connect
//! 3. Start the modules and wait until all of them reported
//! 4. Freeze the node type registry and serve HTTP
//!
//! Shutdown stops HTTP and RPC through one broadcast channel, then kills
//! the modules.

use crate::{
    config::{HostConfig, MonstiSettings},
    error::{HostResult, io_error},
    http::spawn_http_server,
    modules::Modules,
    service::Monsti,
};
use monsti_rpc::RpcServer;
use std::{future::Future, path::Path, sync::Arc};
use tokio::sync::broadcast;

/// Run the daemon configured in `config_dir` until `shutdown` resolves.
pub async fn run(config_dir: &Path, shutdown: impl Future<Output = ()>) -> HostResult<()> {
    let settings = MonstiSettings::load(config_dir)?;
    let config = HostConfig::from_settings(&settings)?;
    let monsti = Arc::new(Monsti::new(settings, config)?);
    run_with(monsti, shutdown).await
}

pub async fn run_with(monsti: Arc<Monsti>, shutdown: impl Future<Output = ()>) -> HostResult<()> {
    let socket = monsti.config().socket_path.clone();
    if let Some(run_dir) = socket.parent() {
        std::fs::create_dir_all(run_dir).map_err(|e| io_error(run_dir, e))?;
    }
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let server = RpcServer::bind(&socket, monsti.clone(), shutdown_tx.clone())?;
    tracing::info!(socket = %socket.display(), "RPC server listening");
    let rpc = tokio::spawn(async move {
        if let Err(err) = server.run().await {
            tracing::error!("rpc server error: {err}");
        }
    });

    let started = Modules::start(
        monsti.settings(),
        monsti.barrier(),
        monsti.config().module_init_timeout,
    )
    .await;
    let mut modules = match started {
        Ok(modules) => modules,
        Err(err) => {
            let _ = shutdown_tx.send(());
            let _ = rpc.await;
            return Err(err);
        }
    };
    monsti.freeze_node_types();
    tracing::info!(modules = ?modules.names(), sites = ?monsti.site_names(), "monsti is ready");

    let http = spawn_http_server(monsti.clone(), shutdown_tx.clone());
    shutdown.await;
    tracing::info!("shutting down");
    let _ = shutdown_tx.send(());
    modules.shutdown().await;
    let _ = http.await;
    let _ = rpc.await;
    Ok(())
}
