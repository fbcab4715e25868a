//! Child-process supervisor
//!
//! Runs each runtime as `<interpreter> [interpreter_args] <script>`.
//! The runtime's identity and arguments are passed through the environment;
//! stdin stays open as the control channel and carries one JSON message per
//! line. Closing stdin asks the process to exit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::ProcessSupervisor;
use crate::config::SupervisorConfig;
use crate::domain::{ArtifactKey, RuntimeArg, RuntimeConfig, RuntimeId, StrategyItemType};
use crate::error::{KeeperError, Result};
use crate::store::{normalize_args, RuntimeStore};

/// Entry file inside an installed bundle directory
const BUNDLE_ENTRY: &str = "index.js";

/// Messages written to a live process's stdin
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ControlMessage<'a> {
    Args {
        args: Vec<RuntimeArg>,
    },
    Action {
        action: &'a str,
        payload: serde_json::Value,
    },
}

/// Control channel of one process. Writers clone it out of the process map
/// so a stalled pipe never holds the map lock.
type ControlChannel = Arc<Mutex<ChildStdin>>;

struct LiveProcess {
    child: Child,
    stdin: Option<ControlChannel>,
    started_at: DateTime<Utc>,
}

impl LiveProcess {
    fn is_live(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Snapshot of a live process for status output
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub id: RuntimeId,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

pub struct LocalSupervisor {
    store: Arc<dyn RuntimeStore>,
    config: SupervisorConfig,
    source_root: PathBuf,
    processes: RwLock<HashMap<RuntimeId, LiveProcess>>,
}

impl LocalSupervisor {
    pub fn new(
        store: Arc<dyn RuntimeStore>,
        config: SupervisorConfig,
        source_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            config,
            source_root: source_root.into(),
            processes: RwLock::new(HashMap::new()),
        }
    }

    /// Live processes; entries whose process already exited are dropped
    pub async fn list_running(&self) -> Vec<ProcessInfo> {
        let mut processes = self.processes.write().await;
        processes.retain(|_, p| p.is_live());
        let mut infos: Vec<ProcessInfo> = processes
            .iter()
            .map(|(id, p)| ProcessInfo {
                id: *id,
                pid: p.child.id(),
                started_at: p.started_at,
            })
            .collect();
        infos.sort_by_key(|i| i.id);
        infos
    }

    /// Resolve the file the interpreter should execute
    fn script_path(&self, runtime: &RuntimeConfig) -> Result<PathBuf> {
        let path = match runtime.strategy.kind {
            StrategyItemType::Local => {
                let relative = runtime.strategy.path.as_deref().ok_or_else(|| {
                    KeeperError::ConfigInvalid(format!(
                        "local strategy {} has no path",
                        runtime.strategy.name
                    ))
                })?;
                join_relative(&self.source_root, relative)?
            }
            StrategyItemType::Bundle => {
                let bundles = self.config.bundles_path.as_deref().ok_or_else(|| {
                    KeeperError::ConfigInvalid("no bundles directory configured".to_string())
                })?;
                join_relative(bundles, &runtime.strategy.id)?.join(BUNDLE_ENTRY)
            }
        };

        if !path.is_file() {
            return Err(KeeperError::ConfigInvalid(format!(
                "strategy file {} does not exist",
                path.display()
            )));
        }
        Ok(path)
    }

    fn command_for(&self, id: RuntimeId, runtime: &RuntimeConfig, script: &Path) -> Result<Command> {
        let args = normalize_args(&runtime.args, runtime.exchange.as_deref());
        let artifacts = ArtifactKey::for_runtime(id);

        let mut command = Command::new(&self.config.interpreter);
        command
            .args(&self.config.interpreter_args)
            .arg(script)
            .current_dir(&self.source_root)
            .env("RUNTIME_ID", id.to_string())
            .env("RUNTIME_PREFIX", &runtime.prefix)
            .env("RUNTIME_ARTIFACTS", artifacts.as_str())
            .env("RUNTIME_ARGS", serde_json::to_string(&args)?)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        Ok(command)
    }

    async fn send(&self, id: RuntimeId, message: &ControlMessage<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let channel = {
            let mut processes = self.processes.write().await;
            let process = processes
                .get_mut(&id)
                .filter(|p| p.stdin.is_some())
                .ok_or(KeeperError::NotRunning(id))?;
            if !process.is_live() {
                return Err(KeeperError::NotRunning(id));
            }
            process.stdin.clone().ok_or(KeeperError::NotRunning(id))?
        };

        let limit = Duration::from_millis(self.config.control_timeout_ms);
        let write = async {
            let mut stdin = channel.lock().await;
            stdin.write_all(&line).await?;
            stdin.flush().await
        };
        match tokio::time::timeout(limit, write).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!("Runtime {} is not reading its control channel", id);
                Err(KeeperError::ControlTimeout(id))
            }
        }
    }

    /// Close the control channel, wait out the grace period, then kill
    async fn shutdown(&self, id: RuntimeId, mut process: LiveProcess) {
        drop(process.stdin.take());

        let grace = Duration::from_millis(self.config.stop_timeout_ms);
        match tokio::time::timeout(grace, process.child.wait()).await {
            Ok(Ok(status)) => debug!("Runtime {} exited with {}", id, status),
            Ok(Err(e)) => warn!("Failed waiting for runtime {}: {}", id, e),
            Err(_) => {
                warn!("Runtime {} did not exit within {:?}, killing", id, grace);
                if let Err(e) = process.child.kill().await {
                    error!("Failed to kill runtime {}: {}", id, e);
                }
            }
        }
    }
}

/// Join a `/`-separated relative path, refusing to escape `root`
fn join_relative(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in relative.split('/').filter(|s| !s.is_empty()) {
        if segment == ".." || segment == "." {
            return Err(KeeperError::ConfigInvalid(format!(
                "path {} leaves the strategy root",
                relative
            )));
        }
        path.push(segment);
    }
    Ok(path)
}

#[async_trait]
impl ProcessSupervisor for LocalSupervisor {
    async fn register(&self, id: RuntimeId) -> Result<()> {
        if self.check(id).await {
            debug!("Runtime {} already live, nothing to register", id);
            return Ok(());
        }

        let runtime = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| KeeperError::runtime_not_found(id))?;
        let script = self.script_path(&runtime)?;
        let mut command = self.command_for(id, &runtime, &script)?;

        let mut child = command
            .spawn()
            .map_err(|e| KeeperError::Spawn(format!("{}: {}", self.config.interpreter, e)))?;
        let stdin = child.stdin.take().map(|stdin| Arc::new(Mutex::new(stdin)));

        info!(
            "Started runtime {} ({}) pid={:?} script={}",
            id,
            runtime.name,
            child.id(),
            script.display()
        );

        self.processes.write().await.insert(
            id,
            LiveProcess {
                child,
                stdin,
                started_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn stop(&self, id: RuntimeId) -> Result<()> {
        let process = self.processes.write().await.remove(&id);
        match process {
            Some(process) => {
                info!("Stopping runtime {}", id);
                self.shutdown(id, process).await;
            }
            None => debug!("Runtime {} is not live, nothing to stop", id),
        }
        Ok(())
    }

    async fn stop_all(&self, remove: bool) -> Result<Vec<RuntimeId>> {
        let drained: Vec<(RuntimeId, LiveProcess)> = {
            let mut processes = self.processes.write().await;
            processes.retain(|id, process| {
                let live = process.is_live();
                if !live {
                    debug!("Runtime {} already exited", id);
                }
                live
            });
            processes.drain().collect()
        };
        let mut ids: Vec<RuntimeId> = drained.iter().map(|(id, _)| *id).collect();
        ids.sort_unstable();

        info!("Stopping {} runtime(s) (remove={})", ids.len(), remove);
        futures::future::join_all(
            drained
                .into_iter()
                .map(|(id, process)| self.shutdown(id, process)),
        )
        .await;

        if remove {
            for id in &ids {
                if let Err(e) = self.store.remove(*id).await {
                    warn!("Failed to remove runtime {} after stop: {}", id, e);
                }
            }
        }

        Ok(ids)
    }

    async fn check(&self, id: RuntimeId) -> bool {
        let mut processes = self.processes.write().await;
        let Some(process) = processes.get_mut(&id) else {
            return false;
        };
        if process.is_live() {
            return true;
        }
        debug!("Runtime {} exited on its own, forgetting it", id);
        processes.remove(&id);
        false
    }

    async fn force_update_process_args(&self, id: RuntimeId) -> Result<()> {
        if !self.check(id).await {
            return Err(KeeperError::NotRunning(id));
        }

        let runtime = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| KeeperError::runtime_not_found(id))?;
        let args = normalize_args(&runtime.args, runtime.exchange.as_deref());

        debug!("Pushing {} argument(s) to runtime {}", args.len(), id);
        self.send(id, &ControlMessage::Args { args }).await
    }

    async fn force_report_action(
        &self,
        id: RuntimeId,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        debug!("Forwarding action {} to runtime {}", action, id);
        self.send(id, &ControlMessage::Action { action, payload })
            .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::domain::{RuntimeType, StrategyItem};
    use crate::store::InMemoryRuntimeStore;

    /// Appends every control line to `<artifacts>.out` until stdin closes
    const ECHO_SCRIPT: &str = "while read -r line; do echo \"$line\" >> \"$RUNTIME_ARTIFACTS.out\"; done\n";

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        store: Arc<InMemoryRuntimeStore>,
        supervisor: LocalSupervisor,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        std::fs::write(root.join("echo.sh"), ECHO_SCRIPT).unwrap();

        let store = Arc::new(InMemoryRuntimeStore::new());
        let config = SupervisorConfig {
            interpreter: "sh".to_string(),
            stop_timeout_ms: 2000,
            ..SupervisorConfig::default()
        };
        let supervisor = LocalSupervisor::new(store.clone(), config, &root);
        Fixture {
            _dir: dir,
            root,
            store,
            supervisor,
        }
    }

    fn runtime(path: Option<&str>, kind: StrategyItemType) -> RuntimeConfig {
        RuntimeConfig::new(
            "acc",
            "echo",
            StrategyItem {
                id: "echo".to_string(),
                name: "echo".to_string(),
                kind,
                path: path.map(String::from),
            },
            RuntimeType::Market,
        )
    }

    async fn wait_for_file(path: &Path) -> String {
        for _ in 0..100 {
            if let Ok(content) = std::fs::read_to_string(path) {
                if !content.is_empty() {
                    return content;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} never written", path.display());
    }

    #[tokio::test]
    async fn test_register_action_and_stop() {
        let fx = fixture();
        let id = fx
            .store
            .save(&runtime(Some("echo.sh"), StrategyItemType::Local))
            .await
            .unwrap();

        fx.supervisor.register(id).await.unwrap();
        assert!(fx.supervisor.check(id).await);
        assert_eq!(fx.supervisor.list_running().await.len(), 1);

        fx.supervisor
            .force_report_action(id, "pause", serde_json::json!({"reason": "test"}))
            .await
            .unwrap();

        let out = fx
            .root
            .join(format!("{}.out", ArtifactKey::for_runtime(id)));
        let written = wait_for_file(&out).await;
        assert!(written.contains(r#""type":"action""#));
        assert!(written.contains(r#""action":"pause""#));

        fx.supervisor.stop(id).await.unwrap();
        assert!(!fx.supervisor.check(id).await);
        // idempotent
        fx.supervisor.stop(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_register_failures() {
        let fx = fixture();
        assert!(fx.supervisor.register(404).await.unwrap_err().is_not_found());

        let missing = fx
            .store
            .save(&runtime(Some("missing.sh"), StrategyItemType::Local))
            .await
            .unwrap();
        assert!(matches!(
            fx.supervisor.register(missing).await,
            Err(KeeperError::ConfigInvalid(_))
        ));

        let bundle = fx
            .store
            .save(&runtime(None, StrategyItemType::Bundle))
            .await
            .unwrap();
        assert!(matches!(
            fx.supervisor.register(bundle).await,
            Err(KeeperError::ConfigInvalid(_))
        ));

        let escaping = fx
            .store
            .save(&runtime(Some("../echo.sh"), StrategyItemType::Local))
            .await
            .unwrap();
        assert!(matches!(
            fx.supervisor.register(escaping).await,
            Err(KeeperError::ConfigInvalid(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("echo.sh"), ECHO_SCRIPT).unwrap();
        let store = Arc::new(InMemoryRuntimeStore::new());
        let supervisor = LocalSupervisor::new(
            store.clone(),
            SupervisorConfig {
                interpreter: "/nonexistent/interpreter".to_string(),
                ..SupervisorConfig::default()
            },
            dir.path(),
        );

        let id = store
            .save(&runtime(Some("echo.sh"), StrategyItemType::Local))
            .await
            .unwrap();
        assert!(matches!(
            supervisor.register(id).await,
            Err(KeeperError::Spawn(_))
        ));
        assert!(!supervisor.check(id).await);
    }

    #[tokio::test]
    async fn test_not_running_control_messages() {
        let fx = fixture();
        assert!(matches!(
            fx.supervisor.force_update_process_args(1).await,
            Err(KeeperError::NotRunning(1))
        ));
        assert!(matches!(
            fx.supervisor
                .force_report_action(1, "noop", serde_json::Value::Null)
                .await,
            Err(KeeperError::NotRunning(1))
        ));
    }

    #[tokio::test]
    async fn test_stop_all_with_remove() {
        let fx = fixture();
        let a = fx
            .store
            .save(&runtime(Some("echo.sh"), StrategyItemType::Local))
            .await
            .unwrap();
        let b = fx
            .store
            .save(&runtime(Some("echo.sh"), StrategyItemType::Local))
            .await
            .unwrap();
        fx.supervisor.register(a).await.unwrap();
        fx.supervisor.register(b).await.unwrap();

        let stopped = fx.supervisor.stop_all(true).await.unwrap();
        assert_eq!(stopped, vec![a, b]);
        assert!(!fx.supervisor.check(a).await);
        assert!(fx.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_stalled_control_channel_does_not_block_supervisor() {
        let dir = tempfile::tempdir().unwrap();
        // never reads stdin, so the pipe fills up
        std::fs::write(dir.path().join("deaf.sh"), "exec sleep 30\n").unwrap();
        let store = Arc::new(InMemoryRuntimeStore::new());
        let supervisor = Arc::new(LocalSupervisor::new(
            store.clone(),
            SupervisorConfig {
                interpreter: "sh".to_string(),
                stop_timeout_ms: 200,
                control_timeout_ms: 5000,
                ..SupervisorConfig::default()
            },
            dir.path(),
        ));
        let id = store
            .save(&runtime(Some("deaf.sh"), StrategyItemType::Local))
            .await
            .unwrap();
        supervisor.register(id).await.unwrap();

        let sender = {
            let supervisor = supervisor.clone();
            let payload = serde_json::Value::String("x".repeat(256 * 1024));
            tokio::spawn(async move { supervisor.force_report_action(id, "flood", payload).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let limit = Duration::from_secs(3);
        let live = tokio::time::timeout(limit, supervisor.check(id)).await;
        assert_eq!(live.ok(), Some(true));
        let stopped = tokio::time::timeout(limit, supervisor.stop(id)).await;
        assert!(matches!(stopped, Ok(Ok(()))));
        assert!(!supervisor.check(id).await);

        // the writer gives up once the process is gone or the limit passes
        let sent = tokio::time::timeout(Duration::from_secs(10), sender)
            .await
            .unwrap()
            .unwrap();
        assert!(sent.is_err());
    }

    #[tokio::test]
    async fn test_control_message_times_out() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("deaf.sh"), "exec sleep 30\n").unwrap();
        let store = Arc::new(InMemoryRuntimeStore::new());
        let supervisor = LocalSupervisor::new(
            store.clone(),
            SupervisorConfig {
                interpreter: "sh".to_string(),
                stop_timeout_ms: 200,
                control_timeout_ms: 200,
                ..SupervisorConfig::default()
            },
            dir.path(),
        );
        let id = store
            .save(&runtime(Some("deaf.sh"), StrategyItemType::Local))
            .await
            .unwrap();
        supervisor.register(id).await.unwrap();

        let payload = serde_json::Value::String("x".repeat(256 * 1024));
        assert!(matches!(
            supervisor.force_report_action(id, "flood", payload).await,
            Err(KeeperError::ControlTimeout(_))
        ));
        assert!(supervisor.check(id).await);
        supervisor.stop(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_exited_processes_are_forgotten() {
        let fx = fixture();
        std::fs::write(fx.root.join("quick.sh"), "exit 0\n").unwrap();
        let quick = fx
            .store
            .save(&runtime(Some("quick.sh"), StrategyItemType::Local))
            .await
            .unwrap();
        let echo = fx
            .store
            .save(&runtime(Some("echo.sh"), StrategyItemType::Local))
            .await
            .unwrap();
        fx.supervisor.register(quick).await.unwrap();
        fx.supervisor.register(echo).await.unwrap();

        for _ in 0..100 {
            if fx.supervisor.list_running().await.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let running = fx.supervisor.list_running().await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, echo);

        let stopped = fx.supervisor.stop_all(false).await.unwrap();
        assert_eq!(stopped, vec![echo]);
    }
}
