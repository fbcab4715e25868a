//! Process supervision
//!
//! The orchestrator only talks to the `ProcessSupervisor` trait. Live process
//! handles never leave the implementation; they are addressed by runtime id.

pub mod local;

use async_trait::async_trait;

use crate::domain::RuntimeId;
use crate::error::Result;

pub use local::LocalSupervisor;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Load the configuration and start a bound live process.
    ///
    /// Fails with `NotFound` for an unknown id, `ConfigInvalid` when the
    /// configuration cannot be turned into a process, `Spawn` on launch failure.
    async fn register(&self, id: RuntimeId) -> Result<()>;

    /// No-op when nothing is live for `id`
    async fn stop(&self, id: RuntimeId) -> Result<()>;

    /// Stop everything live, deleting each stopped configuration when
    /// `remove` is set. Returns the ids that were live at call time.
    async fn stop_all(&self, remove: bool) -> Result<Vec<RuntimeId>>;

    /// Liveness query. May forget a process that already exited.
    async fn check(&self, id: RuntimeId) -> bool;

    /// Push the stored arguments into a live process without restarting it
    async fn force_update_process_args(&self, id: RuntimeId) -> Result<()>;

    /// Forward an out-of-band control message to a live process
    async fn force_report_action(
        &self,
        id: RuntimeId,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<()>;
}
