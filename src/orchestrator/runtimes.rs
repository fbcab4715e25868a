//! Runtime configuration operations exposed next to the lifecycle ones

use serde::Serialize;
use tracing::{debug, info};

use super::ScriptOrchestrator;
use crate::catalog::RemoteBundles;
use crate::domain::{RuntimeConfig, RuntimeId};
use crate::error::{KeeperError, Result};
use crate::events::Topic;

/// Stored configuration plus whether its process is live right now
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStatus {
    #[serde(flatten)]
    pub runtime: RuntimeConfig,
    pub is_enabled: bool,
}

impl ScriptOrchestrator {
    pub async fn runtime_list(&self, account_id: &str) -> Result<Vec<RuntimeStatus>> {
        let runtimes = self.store.list(account_id).await?;
        let mut statuses = Vec::with_capacity(runtimes.len());
        for runtime in runtimes {
            let is_enabled = match runtime.id {
                Some(id) => self.supervisor.check(id).await,
                None => false,
            };
            statuses.push(RuntimeStatus {
                runtime,
                is_enabled,
            });
        }
        Ok(statuses)
    }

    pub async fn runtime(&self, id: RuntimeId) -> Result<RuntimeConfig> {
        self.store
            .get_by_id(id)
            .await?
            .ok_or_else(|| KeeperError::runtime_not_found(id))
    }

    /// Persist a new configuration; any id on `config` is ignored
    pub async fn add_runtime(&self, mut config: RuntimeConfig) -> Result<RuntimeId> {
        config.id = None;
        let id = self.store.save(&config).await?;
        info!("Added runtime {} ({}) for account {}", id, config.name, config.account_id);
        self.events.publish(Topic::RuntimeConfigChanged, vec![id]);
        Ok(id)
    }

    /// Overwrite a stored configuration. A live process picks up the new
    /// arguments without restarting.
    pub async fn update_runtime(&self, id: RuntimeId, mut config: RuntimeConfig) -> Result<()> {
        config.id = Some(id);
        self.store.save(&config).await?;
        info!("Updated runtime {}", id);

        if self.supervisor.check(id).await {
            self.supervisor.force_update_process_args(id).await?;
            debug!("Pushed new arguments to live runtime {}", id);
        }

        self.events.publish(Topic::RuntimeConfigChanged, vec![id]);
        Ok(())
    }

    /// Stop the process if live, forget its marker, then delete the configuration
    pub async fn remove_runtime(&self, id: RuntimeId) -> Result<()> {
        if self.supervisor.check(id).await {
            self.stop(id, true).await?;
        } else {
            self.markers.unmark(id).await?;
        }
        self.store.remove(id).await?;
        info!("Removed runtime {}", id);
        self.events.publish(Topic::RuntimeConfigChanged, vec![id]);
        Ok(())
    }

    /// Forward an action to the live runtime owning `artifacts`.
    ///
    /// Silently ignored when the account has no such runtime or it is not running.
    pub async fn submit_report_action(
        &self,
        account_id: &str,
        artifacts: &str,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let runtimes = self.store.list(account_id).await?;
        let Some(id) = runtimes
            .iter()
            .find(|r| r.artifacts.as_ref().is_some_and(|a| a.as_str() == artifacts))
            .and_then(|r| r.id)
        else {
            debug!("No runtime of account {} owns artifacts {}", account_id, artifacts);
            return Ok(());
        };

        if !self.supervisor.check(id).await {
            debug!("Runtime {} is not running, dropping action {}", id, action);
            return Ok(());
        }

        self.supervisor.force_report_action(id, action, payload).await
    }

    pub async fn remote_bundles(&self, account_id: &str) -> Result<RemoteBundles> {
        let catalog = self.catalog.as_ref().ok_or_else(|| {
            KeeperError::Config(::config::ConfigError::NotFound("catalog.base_url".to_string()))
        })?;
        Ok(catalog.get_bundles(account_id).await?.into())
    }
}
