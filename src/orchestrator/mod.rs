//! Script Orchestrator
//!
//! Reconciles persisted runtime configuration, live processes and the
//! running-marker set:
//! - `run` is single-flight under the start lock and marks the runtime on success
//! - `stop` / `stop_all` never wait for the start lock
//! - `restore` restarts every marked runtime, one at a time

pub mod lock;
pub mod runtimes;

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cache::RunningMarkers;
use crate::catalog::BundleCatalog;
use crate::domain::RuntimeId;
use crate::error::{KeeperError, Result};
use crate::events::{EventBus, Topic};
use crate::store::RuntimeStore;
use crate::supervisor::ProcessSupervisor;

pub use lock::{LockScope, StartGuard, StartLock};
pub use runtimes::RuntimeStatus;

/// Outcome of a recovery pass
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Ids started, in marker order
    pub restored: Vec<RuntimeId>,
    /// Ids that failed to start, with the reason
    pub failed: Vec<(RuntimeId, KeeperError)>,
}

impl RestoreReport {
    pub fn attempted(&self) -> usize {
        self.restored.len() + self.failed.len()
    }
}

pub struct ScriptOrchestrator {
    supervisor: Arc<dyn ProcessSupervisor>,
    store: Arc<dyn RuntimeStore>,
    markers: RunningMarkers,
    events: EventBus,
    start_lock: StartLock,
    catalog: Option<Arc<dyn BundleCatalog>>,
}

impl ScriptOrchestrator {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        store: Arc<dyn RuntimeStore>,
        markers: RunningMarkers,
        events: EventBus,
        scope: LockScope,
    ) -> Self {
        Self {
            supervisor,
            store,
            markers,
            events,
            start_lock: StartLock::new(scope),
            catalog: None,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn BundleCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn markers(&self) -> &RunningMarkers {
        &self.markers
    }

    pub fn is_starting(&self, id: RuntimeId) -> bool {
        self.start_lock.is_locked(id)
    }

    /// Start a runtime's process.
    ///
    /// Fails with `AlreadyStarting` while another start holds the lock. The
    /// lock is released however the start ends; the marker is only set when
    /// the process came up.
    pub async fn run(&self, id: RuntimeId) -> Result<()> {
        let guard = match self.start_lock.try_acquire(id) {
            Ok(guard) => guard,
            Err(e) => {
                warn!("Refusing to start runtime {}: {}", id, e);
                return Err(e);
            }
        };

        info!("Starting runtime {}", id);
        let result = self.start_and_mark(id).await;
        drop(guard);

        match &result {
            Ok(()) => info!("Runtime {} started", id),
            Err(e) => error!("Runtime {} failed to start: {}", id, e),
        }
        self.events.publish(Topic::SystemUpdateReport, vec![id]);
        result
    }

    async fn start_and_mark(&self, id: RuntimeId) -> Result<()> {
        self.supervisor.register(id).await?;
        if let Err(e) = self.markers.mark(id).await {
            // never leave a live process unmarked
            warn!("Could not mark runtime {}, stopping it: {}", id, e);
            if let Err(stop_err) = self.supervisor.stop(id).await {
                error!("Failed to stop unmarked runtime {}: {}", id, stop_err);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stop a runtime's process. A soft stop also forgets that it should be
    /// running, so recovery will not bring it back.
    pub async fn stop(&self, id: RuntimeId, soft: bool) -> Result<()> {
        info!("Stopping runtime {} (soft={})", id, soft);
        self.supervisor.stop(id).await?;
        if soft {
            self.markers.unmark(id).await?;
        }
        self.events.publish(Topic::SystemUpdateReport, vec![id]);
        Ok(())
    }

    /// Stop every live process and clear the markers of the returned ids.
    /// Returns the ids that were live.
    ///
    /// `soft` is only logged; markers are cleared either way. To stop
    /// everything but keep it restorable, hard-`stop` each live id instead.
    pub async fn stop_all(&self, remove: bool, soft: bool) -> Result<Vec<RuntimeId>> {
        let ids = self.supervisor.stop_all(remove).await?;
        info!(
            "Stopped {} runtime(s) (remove={}, soft={})",
            ids.len(),
            remove,
            soft
        );

        let results =
            futures::future::join_all(ids.iter().map(|id| self.markers.unmark(*id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                error!("Failed to clear running marker of runtime {}: {}", id, e);
            }
        }

        self.events.publish(Topic::SystemUpdateReport, ids.clone());
        Ok(ids)
    }

    /// Restart every runtime with a running marker, sequentially in marker
    /// order. A failing id is reported and skipped.
    pub async fn restore(&self) -> Result<RestoreReport> {
        let ids = self.markers.ids().await?;
        let mut report = RestoreReport::default();
        if ids.is_empty() {
            info!("No running markers, nothing to restore");
            return Ok(report);
        }

        info!("Restoring {} runtime(s): {:?}", ids.len(), ids);
        for id in ids {
            match self.run(id).await {
                Ok(()) => report.restored.push(id),
                Err(e) => {
                    error!("Could not restore runtime {}: {}", id, e);
                    report.failed.push((id, e));
                }
            }
        }

        info!(
            "Restore finished: {} started, {} failed",
            report.restored.len(),
            report.failed.len()
        );
        Ok(report)
    }
}
