//! Runtime configuration commands
//!
//! botkeeper runtime list <account>        - Configurations with their running marker
//! botkeeper runtime show <id>             - One configuration
//! botkeeper runtime save <file> [--id N]  - Create, or update with --id, from JSON
//! botkeeper runtime remove <id>           - Delete an unmarked configuration
//! botkeeper runtime mark <id>             - Start it on the next `serve`
//! botkeeper runtime unmark <id>           - Keep the next `serve` from starting it
//!
//! Live processes belong to `serve`; these commands only touch stored state.
//! `serve --start <id>` starts a runtime right away.

use anyhow::{bail, Result};
use clap::Subcommand;
use serde::Serialize;
use std::path::PathBuf;

use super::{print_json, read_input, Services};
use crate::config::AppConfig;
use crate::domain::{RuntimeConfig, RuntimeId};
use crate::logging::init_logging_simple;
use crate::orchestrator::{RuntimeStatus, ScriptOrchestrator};

#[derive(Subcommand, Debug)]
pub enum RuntimeCommands {
    /// List an account's runtimes
    List {
        account_id: String,
    },

    /// Show one runtime
    Show {
        id: RuntimeId,
    },

    /// Create or update a runtime from a JSON document (`-` reads stdin)
    Save {
        file: PathBuf,

        /// Update this runtime instead of creating one
        #[arg(long)]
        id: Option<RuntimeId>,
    },

    /// Delete a runtime that is not marked as running
    Remove {
        id: RuntimeId,
    },

    /// Mark a runtime so the next `serve` starts it
    Mark {
        id: RuntimeId,
    },

    /// Clear a runtime's running marker
    Unmark {
        id: RuntimeId,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeListing {
    #[serde(flatten)]
    status: RuntimeStatus,
    /// Will be started by the next `serve`
    marked: bool,
}

impl RuntimeCommands {
    pub async fn run(self, config: AppConfig) -> Result<()> {
        init_logging_simple();
        let services = Services::connect(&config).await?;
        let orchestrator = &services.orchestrator;

        match self {
            Self::List { account_id } => {
                let mut listings = Vec::new();
                for status in orchestrator.runtime_list(&account_id).await? {
                    let marked = match status.runtime.id {
                        Some(id) => orchestrator.markers().is_marked(id).await?,
                        None => false,
                    };
                    listings.push(RuntimeListing { status, marked });
                }
                print_json(&listings)?;
            }
            Self::Show { id } => {
                print_json(&orchestrator.runtime(id).await?)?;
            }
            Self::Save { file, id } => {
                let runtime: RuntimeConfig = serde_json::from_str(&read_input(&file)?)?;
                let id = match id {
                    Some(id) => {
                        orchestrator.update_runtime(id, runtime).await?;
                        if orchestrator.markers().is_marked(id).await? {
                            eprintln!(
                                "Runtime {} is marked as running; a live process under \
                                 `serve` keeps its old arguments until it is restarted",
                                id
                            );
                        }
                        id
                    }
                    None => orchestrator.add_runtime(runtime).await?,
                };
                print_json(&orchestrator.runtime(id).await?)?;
            }
            Self::Remove { id } => {
                remove_unmarked(orchestrator, id).await?;
                println!("Removed runtime {}", id);
            }
            Self::Mark { id } => {
                mark(orchestrator, id).await?;
                println!("Runtime {} will be started by the next serve", id);
            }
            Self::Unmark { id } => {
                orchestrator.markers().unmark(id).await?;
                println!("Runtime {} will not be started by the next serve", id);
            }
        }

        services.pool.close().await;
        Ok(())
    }
}

/// Mark an existing runtime as running
async fn mark(orchestrator: &ScriptOrchestrator, id: RuntimeId) -> Result<()> {
    orchestrator.runtime(id).await?;
    orchestrator.markers().mark(id).await?;
    Ok(())
}

/// Delete a runtime unless `serve` may be running it
async fn remove_unmarked(orchestrator: &ScriptOrchestrator, id: RuntimeId) -> Result<()> {
    if orchestrator.markers().is_marked(id).await? {
        bail!(
            "runtime {} is marked as running; unmark it and stop it under `serve` first",
            id
        );
    }
    orchestrator.remove_runtime(id).await?;
    Ok(())
}
