//! Botkeeper CLI
//!
//! Commands:
//! - `botkeeper serve [--start <id>]...` - Restore marked runtimes and supervise them until shutdown
//! - `botkeeper runtime` - Inspect and edit runtime configurations
//! - `botkeeper strategy` - Manage strategy source files
//! - `botkeeper bundles` - List catalog bundles for an account

pub mod bundles;
pub mod runtime;
pub mod serve;
pub mod strategy;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{PgCache, RunningMarkers};
use crate::catalog::HttpCatalog;
use crate::config::AppConfig;
use crate::domain::RuntimeId;
use crate::events::EventBus;
use crate::orchestrator::{LockScope, ScriptOrchestrator};
use crate::store::postgres::{connect, migrate};
use crate::store::PgRuntimeStore;
use crate::supervisor::LocalSupervisor;

/// Strategy runtime keeper
#[derive(Parser, Debug)]
#[command(name = "botkeeper")]
#[command(author, version, about = "Lifecycle manager for long-running strategy runtimes")]
pub struct Cli {
    /// Directory holding default.toml and <BOTKEEPER_ENV>.toml
    #[arg(long, global = true, default_value = "config", env = "BOTKEEPER_CONFIG_DIR")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Restore previously running runtimes and keep them alive until Ctrl-C
    Serve {
        /// Also start these runtimes once restore is done
        #[arg(long = "start", value_name = "ID")]
        start: Vec<RuntimeId>,
    },

    /// Runtime configurations
    #[command(subcommand)]
    Runtime(runtime::RuntimeCommands),

    /// Strategy source files
    #[command(subcommand)]
    Strategy(strategy::StrategyCommands),

    /// Bundles published to the remote catalog for an account
    Bundles {
        account_id: String,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = load_config(&self.config_dir)?;
        match self.command {
            Commands::Serve { start } => serve::run(config, start).await,
            Commands::Runtime(cmd) => cmd.run(config).await,
            Commands::Strategy(cmd) => cmd.run(config),
            Commands::Bundles { account_id } => bundles::run(config, &account_id).await,
        }
    }
}

fn load_config(dir: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(dir)?;
    config
        .validate()
        .map_err(|problems| anyhow!("invalid configuration:\n  {}", problems.join("\n  ")))?;
    Ok(config)
}

/// Everything wired against Postgres
pub struct Services {
    pub pool: PgPool,
    pub supervisor: Arc<LocalSupervisor>,
    pub orchestrator: Arc<ScriptOrchestrator>,
}

impl Services {
    pub async fn connect(config: &AppConfig) -> crate::error::Result<Self> {
        let pool = connect(&config.database.url, config.database.max_connections).await?;
        migrate(&pool).await?;

        let store = Arc::new(PgRuntimeStore::from_pool(pool.clone()));
        let markers = RunningMarkers::new(Arc::new(PgCache::from_pool(pool.clone())));
        let supervisor = Arc::new(LocalSupervisor::new(
            store.clone(),
            config.supervisor.clone(),
            &config.source.path,
        ));

        let mut orchestrator = ScriptOrchestrator::new(
            supervisor.clone(),
            store,
            markers,
            EventBus::new(),
            LockScope::ProcessWide,
        );
        if config.catalog.base_url.is_some() {
            orchestrator =
                orchestrator.with_catalog(Arc::new(HttpCatalog::from_config(&config.catalog)?));
        }

        Ok(Self {
            pool,
            supervisor,
            orchestrator: Arc::new(orchestrator),
        })
    }
}

/// Contents of `path`, or stdin for `-`
fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(path)?)
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
