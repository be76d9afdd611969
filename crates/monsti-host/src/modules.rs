//! Module processes and the startup barrier.
//!
//! Each configured module runs as `monsti-<name> <config-dir>`. The daemon
//! waits until every module reported `ModuleInitDone` before it serves
//! HTTP traffic.

use crate::{
    config::MonstiSettings,
    error::{HostError, HostResult},
};
use parking_lot::Mutex;
use std::{collections::HashMap, path::PathBuf, process::Stdio, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, Command},
    sync::oneshot,
};

/// One pending init-done report per expected module.
#[derive(Debug, Default)]
pub struct ModuleBarrier {
    pending: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl ModuleBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect `name` to report its initialization; the receiver fires when
    /// it does.
    pub fn expect(&self, name: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(name.to_string(), tx);
        rx
    }

    /// Record an init-done report. Returns false if `name` was not
    /// expected or already reported.
    pub fn done(&self, name: &str) -> bool {
        match self.pending.lock().remove(name) {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn waiting(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Path of a module's executable.
pub fn module_program(settings: &MonstiSettings, name: &str) -> PathBuf {
    let file = format!("monsti-{name}");
    match &settings.module_path {
        Some(dir) => dir.join(file),
        None => PathBuf::from(file),
    }
}

async fn forward_stderr(name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(module = %name, "{line}"),
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(module = %name, %err, "could not read module output");
                break;
            }
        }
    }
}

/// Running module processes.
#[derive(Debug, Default)]
pub struct Modules {
    children: Vec<(String, Child)>,
}

impl Modules {
    /// Start every configured module and wait until each reported its
    /// initialization through `barrier`.
    pub async fn start(
        settings: &MonstiSettings,
        barrier: &ModuleBarrier,
        timeout: Duration,
    ) -> HostResult<Self> {
        let mut modules = Modules::default();
        let mut reports = Vec::new();
        for name in &settings.modules {
            let report = barrier.expect(name);
            let program = module_program(settings, name);
            let mut child = Command::new(&program)
                .arg(&settings.config_dir)
                .stdin(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| HostError::Module(format!("could not start {}: {e}", program.display())))?;
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(forward_stderr(name.clone(), stderr));
            }
            tracing::info!(module = %name, "module started");
            modules.children.push((name.clone(), child));
            reports.push(report);
        }
        for ((name, child), report) in modules.children.iter_mut().zip(reports) {
            let waited = tokio::time::timeout(timeout, async {
                tokio::select! {
                    reported = report => reported.map_err(|_| format!("module {name} was dropped")),
                    status = child.wait() => Err(match status {
                        Ok(status) => format!("module {name} exited during initialization: {status}"),
                        Err(err) => format!("module {name} failed: {err}"),
                    }),
                }
            })
            .await;
            match waited {
                Ok(Ok(())) => tracing::info!(module = %name, "module ready"),
                Ok(Err(message)) => return Err(HostError::Module(message)),
                Err(_) => {
                    return Err(HostError::Module(format!(
                        "module {name} did not finish its initialization within {timeout:?}"
                    )));
                }
            }
        }
        Ok(modules)
    }

    pub fn names(&self) -> Vec<&str> {
        self.children.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Kill all modules and reap them.
    pub async fn shutdown(&mut self) {
        for (name, child) in &mut self.children {
            if let Err(err) = child.start_kill() {
                tracing::debug!(module = %name, %err, "module already gone");
            }
            let _ = child.wait().await;
        }
        self.children.clear();
    }
}
