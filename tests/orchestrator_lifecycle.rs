//! Lifecycle behaviour of the orchestrator against in-memory backends and a
//! scripted supervisor.

use async_trait::async_trait;
use botkeeper::cache::{InMemoryCache, RunningMarkers};
use botkeeper::domain::{RuntimeConfig, RuntimeId, RuntimeType, StrategyItem, StrategyItemType};
use botkeeper::error::{KeeperError, Result};
use botkeeper::events::{EventBus, Topic};
use botkeeper::orchestrator::{LockScope, ScriptOrchestrator};
use botkeeper::store::{InMemoryRuntimeStore, RuntimeStore};
use botkeeper::supervisor::ProcessSupervisor;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Supervisor whose `register` can be held open and made to fail per id
#[derive(Default)]
struct ScriptedSupervisor {
    live: Mutex<HashSet<RuntimeId>>,
    failing: Mutex<HashSet<RuntimeId>>,
    gate: Option<Arc<Gate>>,
}

struct Gate {
    entered: Notify,
    release: Notify,
}

impl ScriptedSupervisor {
    fn gated() -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let supervisor = Self {
            gate: Some(gate.clone()),
            ..Default::default()
        };
        (supervisor, gate)
    }

    fn fail(&self, id: RuntimeId) {
        self.failing.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl ProcessSupervisor for ScriptedSupervisor {
    async fn register(&self, id: RuntimeId) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.failing.lock().unwrap().contains(&id) {
            return Err(KeeperError::Spawn(format!("runtime {} refused to start", id)));
        }
        self.live.lock().unwrap().insert(id);
        Ok(())
    }

    async fn stop(&self, id: RuntimeId) -> Result<()> {
        self.live.lock().unwrap().remove(&id);
        Ok(())
    }

    async fn stop_all(&self, _remove: bool) -> Result<Vec<RuntimeId>> {
        let mut ids: Vec<RuntimeId> = self.live.lock().unwrap().drain().collect();
        ids.sort();
        Ok(ids)
    }

    async fn check(&self, id: RuntimeId) -> bool {
        self.live.lock().unwrap().contains(&id)
    }

    async fn force_update_process_args(&self, id: RuntimeId) -> Result<()> {
        if self.check(id).await {
            Ok(())
        } else {
            Err(KeeperError::NotRunning(id))
        }
    }

    async fn force_report_action(
        &self,
        id: RuntimeId,
        _action: &str,
        _payload: serde_json::Value,
    ) -> Result<()> {
        self.force_update_process_args(id).await
    }
}

struct Harness {
    orchestrator: Arc<ScriptOrchestrator>,
    supervisor: Arc<ScriptedSupervisor>,
    store: Arc<InMemoryRuntimeStore>,
    cache: Arc<InMemoryCache>,
}

fn harness(supervisor: ScriptedSupervisor, scope: LockScope) -> Harness {
    let supervisor = Arc::new(supervisor);
    let store = Arc::new(InMemoryRuntimeStore::new());
    let cache = Arc::new(InMemoryCache::new());
    let orchestrator = ScriptOrchestrator::new(
        supervisor.clone(),
        store.clone(),
        RunningMarkers::new(cache.clone()),
        EventBus::new(),
        scope,
    );
    Harness {
        orchestrator: Arc::new(orchestrator),
        supervisor,
        store,
        cache,
    }
}

fn runtime(name: &str) -> RuntimeConfig {
    RuntimeConfig::new(
        "acc-1",
        name,
        StrategyItem {
            id: "grid".to_string(),
            name: "grid".to_string(),
            kind: StrategyItemType::Local,
            path: Some("grid.ts".to_string()),
        },
        RuntimeType::Market,
    )
}

#[tokio::test]
async fn concurrent_start_is_rejected_while_one_is_in_flight() {
    let (supervisor, gate) = ScriptedSupervisor::gated();
    let h = harness(supervisor, LockScope::ProcessWide);

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(1).await })
    };
    gate.entered.notified().await;

    // same id and a different id are both refused under the process-wide lock
    assert!(matches!(
        h.orchestrator.run(1).await,
        Err(KeeperError::AlreadyStarting)
    ));
    assert!(matches!(
        h.orchestrator.run(2).await,
        Err(KeeperError::AlreadyStarting)
    ));

    gate.release.notify_one();
    first.await.unwrap().unwrap();

    assert!(h.orchestrator.markers().is_marked(1).await.unwrap());
    assert!(!h.orchestrator.markers().is_marked(2).await.unwrap());
    assert!(!h.orchestrator.is_starting(2));
}

#[tokio::test]
async fn per_runtime_lock_lets_other_ids_start() {
    let (supervisor, gate) = ScriptedSupervisor::gated();
    let h = harness(supervisor, LockScope::PerRuntime);

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(1).await })
    };
    gate.entered.notified().await;
    assert!(matches!(
        h.orchestrator.run(1).await,
        Err(KeeperError::AlreadyStarting)
    ));

    let second = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(2).await })
    };
    gate.entered.notified().await;

    gate.release.notify_one();
    gate.release.notify_one();
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(h.orchestrator.markers().ids().await.unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn stop_does_not_wait_for_an_in_flight_start() {
    let (supervisor, gate) = ScriptedSupervisor::gated();
    let h = harness(supervisor, LockScope::ProcessWide);

    let starting = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(1).await })
    };
    gate.entered.notified().await;

    h.orchestrator.stop(9, true).await.unwrap();

    gate.release.notify_one();
    starting.await.unwrap().unwrap();
}

#[tokio::test]
async fn marker_follows_run_and_soft_stop() {
    let h = harness(ScriptedSupervisor::default(), LockScope::ProcessWide);
    let key = h.orchestrator.markers().key(4);

    h.orchestrator.run(4).await.unwrap();
    assert_eq!(h.cache.get(&key).await.as_deref(), Some("1"));
    assert!(h.supervisor.check(4).await);

    h.orchestrator.stop(4, true).await.unwrap();
    assert_eq!(h.cache.get(&key).await, None);
    assert!(!h.supervisor.check(4).await);
}

#[tokio::test]
async fn failed_start_leaves_no_marker() {
    let supervisor = ScriptedSupervisor::default();
    supervisor.fail(8);
    let h = harness(supervisor, LockScope::ProcessWide);

    assert!(matches!(
        h.orchestrator.run(8).await,
        Err(KeeperError::Spawn(_))
    ));
    assert!(!h.orchestrator.markers().is_marked(8).await.unwrap());
    assert!(!h.orchestrator.is_starting(8));
}

#[tokio::test]
async fn restore_brings_back_marked_runtimes_and_isolates_failures() {
    let supervisor = ScriptedSupervisor::default();
    supervisor.fail(3);
    let h = harness(supervisor, LockScope::ProcessWide);

    for id in [5, 3, 7] {
        h.orchestrator.markers().mark(id).await.unwrap();
    }

    let report = h.orchestrator.restore().await.unwrap();
    assert_eq!(report.restored, vec![5, 7]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 3);
    assert!(h.supervisor.check(5).await);
    assert!(h.supervisor.check(7).await);
}

#[tokio::test]
async fn stop_all_forgets_markers_but_hard_stops_keep_them() {
    let h = harness(ScriptedSupervisor::default(), LockScope::ProcessWide);
    h.orchestrator.run(1).await.unwrap();
    h.orchestrator.run(2).await.unwrap();

    assert_eq!(h.orchestrator.stop_all(false, false).await.unwrap(), vec![1, 2]);
    assert!(!h.supervisor.check(1).await);
    assert_eq!(h.orchestrator.restore().await.unwrap().attempted(), 0);

    // shutdown path: hard-stop each live id so the next start restores them
    h.orchestrator.run(1).await.unwrap();
    h.orchestrator.run(2).await.unwrap();
    for id in [1, 2] {
        h.orchestrator.stop(id, false).await.unwrap();
    }
    assert!(!h.supervisor.check(2).await);

    let report = h.orchestrator.restore().await.unwrap();
    assert_eq!(report.restored, vec![1, 2]);
}

#[tokio::test]
async fn notifications_follow_lifecycle_calls() {
    let supervisor = ScriptedSupervisor::default();
    supervisor.fail(2);
    let h = harness(supervisor, LockScope::ProcessWide);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = h
        .orchestrator
        .events()
        .subscribe(Topic::SystemUpdateReport, move |n| {
            sink.lock().unwrap().push(n.runtime_ids.clone());
        });

    h.orchestrator.run(1).await.unwrap();
    let _ = h.orchestrator.run(2).await;
    h.orchestrator.stop(1, false).await.unwrap();

    subscription.unsubscribe();
    h.orchestrator.run(3).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![vec![1], vec![2], vec![1]]);
}

#[tokio::test]
async fn update_reaches_live_process_and_store_normalizes() {
    let h = harness(ScriptedSupervisor::default(), LockScope::ProcessWide);

    let mut config = runtime("grid-btc");
    config.exchange = Some("binance".to_string());
    let id = h.orchestrator.add_runtime(config).await.unwrap();
    h.orchestrator.run(id).await.unwrap();

    let mut stored = h.orchestrator.runtime(id).await.unwrap();
    assert_eq!(stored.prefix.len(), 6);
    assert_eq!(stored.exchange.as_deref(), Some("binance"));
    assert!(stored.args.iter().all(|a| a.key != "exchange"));

    stored.exchange = Some("kraken".to_string());
    h.orchestrator.update_runtime(id, stored.clone()).await.unwrap();

    let reloaded = h.store.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(reloaded.exchange.as_deref(), Some("kraken"));
    assert_eq!(reloaded.prefix, stored.prefix);

    let listed = h.orchestrator.runtime_list("acc-1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].is_enabled);
}
