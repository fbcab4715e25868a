//! Strategy source commands
//!
//! botkeeper strategy list                  - Strategies with their declared arguments
//! botkeeper strategy content <path>        - Print one file
//! botkeeper strategy tree                  - Whole source tree as JSON
//! botkeeper strategy save <path> <file>    - Write a file (`-` reads stdin)
//! botkeeper strategy remove <path>         - Delete a file or directory
//! botkeeper strategy rename <old> <new>    - Move a file or directory
//!
//! Paths are relative to the source root, `/`-separated.

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use super::{print_json, read_input};
use crate::config::AppConfig;
use crate::logging::init_logging_simple;
use crate::source::SourceTree;

#[derive(Subcommand, Debug)]
pub enum StrategyCommands {
    /// List strategies available to runtimes
    List,

    /// Print a strategy file
    Content {
        path: String,
    },

    /// Dump the source tree with file contents
    Tree,

    /// Create or overwrite a strategy file
    Save {
        path: String,
        /// Source of the new content (`-` for stdin)
        file: PathBuf,
    },

    /// Delete a strategy file or directory
    Remove {
        path: String,
    },

    /// Move a strategy file or directory
    Rename {
        old: String,
        new: String,
        /// Write this content to the old path before moving it
        #[arg(long)]
        content: Option<PathBuf>,
    },
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl StrategyCommands {
    pub fn run(self, config: AppConfig) -> Result<()> {
        init_logging_simple();
        let tree = SourceTree::from_config(&config.source);

        match self {
            Self::List => print_json(&tree.get_strategies()?)?,
            Self::Content { path } => {
                let content = tree.get_content(&path)?;
                print!("{}", content.content);
            }
            Self::Tree => print_json(&tree.get_file_tree()?)?,
            Self::Save { path, file } => {
                tree.save_strategy(&segments(&path), &read_input(&file)?)?;
                println!("Saved {}", path);
            }
            Self::Remove { path } => {
                tree.remove_strategy(&segments(&path))?;
                println!("Removed {}", path);
            }
            Self::Rename { old, new, content } => {
                let content = content.map(|file| read_input(&file)).transpose()?;
                tree.rename_strategy(&segments(&old), &segments(&new), content.as_deref())?;
                println!("Renamed {} -> {}", old, new);
            }
        }
        Ok(())
    }
}
