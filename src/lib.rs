pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestrator;
pub mod source;
pub mod store;
pub mod supervisor;

pub use cache::{InMemoryCache, KeyValueCache, PgCache, RunningMarkers};
pub use catalog::{BundleCatalog, HttpCatalog, RemoteBundles};
pub use config::AppConfig;
pub use domain::{ArtifactKey, RuntimeConfig, RuntimeId, StrategyItem};
pub use error::{KeeperError, Result};
pub use events::{EventBus, Notification, Subscription, Topic};
pub use orchestrator::{LockScope, RestoreReport, RuntimeStatus, ScriptOrchestrator};
pub use source::SourceTree;
pub use store::{InMemoryRuntimeStore, PgRuntimeStore, RuntimeStore};
pub use supervisor::{LocalSupervisor, ProcessSupervisor};
