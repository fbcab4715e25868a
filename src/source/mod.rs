//! Strategy source files
//!
//! Plain files under a root directory. Paths handed in and out are
//! root-relative and `/`-separated on every platform. There is no locking:
//! concurrent writers to the same path are last-writer-wins.

pub mod defined_args;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{EngineMode, SourceConfig};
use crate::domain::{FileNode, FileTreeContent, LocalStrategy, StrategyContent, StrategyItemType};
use crate::error::{KeeperError, Result};

pub use defined_args::parse_defined_args;

/// Subdirectory with example strategies shipped alongside user files
pub const EXAMPLES_DIR: &str = "examples";

const SCRIPT_EXTENSIONS: [&str; 2] = ["js", "ts"];

/// Listing mode reported for local strategies
const LOCAL_STRATEGY_MODE: &str = "runtime";

fn is_script(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SCRIPT_EXTENSIONS.contains(&e))
}

/// `true` for names like `main.ts`; such segments are files, everything else a directory
fn has_extension(segment: &str) -> bool {
    match segment.rsplit_once('.') {
        Some((_, ext)) => {
            !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
        }
        None => false,
    }
}

/// File text with invalid UTF-8 replaced, so one odd file never fails a listing
fn read_text(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn not_found(path: &str, e: io::Error) -> KeeperError {
    if e.kind() == io::ErrorKind::NotFound {
        KeeperError::NotFound(format!("strategy file {}", path))
    } else {
        KeeperError::Filesystem(e)
    }
}

pub struct SourceTree {
    root: PathBuf,
    engine_mode: EngineMode,
}

impl SourceTree {
    pub fn new(root: impl Into<PathBuf>, engine_mode: EngineMode) -> Self {
        Self {
            root: root.into(),
            engine_mode,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(&config.path, config.engine_mode)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for root-relative segments; `..` and empty segments are refused
    fn resolve<S: AsRef<str>>(&self, segments: &[S]) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in segments {
            let segment = segment.as_ref();
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains(['/', '\\']) {
                return Err(KeeperError::Filesystem(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid path segment {:?}", segment),
                )));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn split(path: &str) -> Vec<&str> {
        path.split('/').filter(|s| !s.is_empty()).collect()
    }

    fn join<S: AsRef<str>>(segments: &[S]) -> String {
        segments
            .iter()
            .map(|s| s.as_ref())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Script files directly in `dir`, sorted by name, as (filename, segments)
    fn scripts_in(&self, prefix: &[&str]) -> Result<Vec<(String, Vec<String>)>> {
        let dir = self.resolve(prefix)?;
        let mut files: Vec<(String, Vec<String>)> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_script(name))
            .map(|name| {
                let mut segments: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
                segments.push(name.clone());
                (name, segments)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Strategies available to runtimes.
    ///
    /// A file whose `definedArgs` cannot be extracted is still listed, with
    /// `defined_args = None`, and a warning is logged.
    pub fn get_strategies(&self) -> Result<Vec<LocalStrategy>> {
        let mut files = self.scripts_in(&[])?;

        if self.engine_mode.shows_examples() && self.root.join(EXAMPLES_DIR).is_dir() {
            files.extend(self.scripts_in(&[EXAMPLES_DIR])?);
        }

        let mut strategies = Vec::with_capacity(files.len());
        for (filename, segments) in files {
            let content = read_text(&self.resolve(&segments)?)?;

            let defined_args = match parse_defined_args(&content, filename.ends_with(".ts")) {
                Ok(args) => args,
                Err(e) => {
                    warn!(
                        "An error occurred while parsing definedArgs ({}): {}",
                        filename, e
                    );
                    None
                }
            };

            let name = Path::new(&filename)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&filename)
                .to_string();

            strategies.push(LocalStrategy {
                id: name.clone(),
                name,
                path: Self::join(&segments),
                kind: StrategyItemType::Local,
                defined_args,
                mode: LOCAL_STRATEGY_MODE.to_string(),
            });
        }

        debug!("Listed {} local strategies", strategies.len());
        Ok(strategies)
    }

    /// Raw text of a strategy file
    pub fn get_content(&self, path: &str) -> Result<StrategyContent> {
        let full = self.resolve(&Self::split(path))?;
        let content = read_text(&full).map_err(|e| not_found(path, e))?;
        Ok(StrategyContent {
            strategy: path.to_string(),
            content,
        })
    }

    /// Whole source tree with file contents, entries sorted by name
    pub fn get_file_tree(&self) -> Result<Vec<FileNode>> {
        self.walk(&[])
    }

    fn walk(&self, prefix: &[String]) -> Result<Vec<FileNode>> {
        let dir = self.resolve(prefix)?;
        let mut entries: Vec<fs::DirEntry> = fs::read_dir(&dir)?.collect::<io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());

        let mut nodes = Vec::with_capacity(entries.len());
        for entry in entries {
            let Ok(name) = entry.file_name().into_string() else {
                warn!("Skipping non UTF-8 entry in {}", dir.display());
                continue;
            };
            let mut segments = prefix.to_vec();
            segments.push(name.clone());
            let path = Self::join(&segments);

            if entry.file_type()?.is_dir() {
                let children = self.walk(&segments)?;
                nodes.push(FileNode::Dir {
                    path,
                    name,
                    children,
                });
            } else {
                let content = read_text(&entry.path())?;
                nodes.push(FileNode::File {
                    path,
                    name,
                    content,
                });
            }
        }
        Ok(nodes)
    }

    pub fn get_file_tree_strategy_content<S: AsRef<str>>(
        &self,
        segments: &[S],
    ) -> Result<FileTreeContent> {
        let path = Self::join(segments);
        let full = self.resolve(segments)?;
        let content = read_text(&full).map_err(|e| not_found(&path, e))?;
        let filename = segments
            .last()
            .map(|s| s.as_ref().to_string())
            .unwrap_or_default();

        Ok(FileTreeContent {
            path,
            filename,
            content,
        })
    }

    /// Write `content` to the last segment, creating missing directories for
    /// the segments before it. Overwrites an existing file.
    pub fn save_strategy<S: AsRef<str>>(&self, segments: &[S], content: &str) -> Result<()> {
        let Some((file, dirs)) = segments.split_last() else {
            return Err(KeeperError::Filesystem(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty strategy path",
            )));
        };
        if !has_extension(file.as_ref()) {
            return Err(KeeperError::Filesystem(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} has no file extension", file.as_ref()),
            )));
        }

        fs::create_dir_all(self.resolve(dirs)?)?;

        let full = self.resolve(segments)?;
        fs::write(&full, content)?;
        info!("Saved strategy {}", Self::join(segments));
        Ok(())
    }

    /// Delete a file, or a directory with everything under it
    pub fn remove_strategy<S: AsRef<str>>(&self, segments: &[S]) -> Result<()> {
        let path = Self::join(segments);
        let full = self.resolve(segments)?;
        let metadata = fs::metadata(&full).map_err(|e| not_found(&path, e))?;

        if metadata.is_dir() {
            fs::remove_dir_all(&full)?;
        } else {
            fs::remove_file(&full)?;
        }
        info!("Removed strategy {}", path);
        Ok(())
    }

    /// Move a file or directory; when non-empty `content` is given it is
    /// written to the old path first.
    pub fn rename_strategy<S: AsRef<str>, T: AsRef<str>>(
        &self,
        old: &[S],
        new: &[T],
        content: Option<&str>,
    ) -> Result<()> {
        let old_path = Self::join(old);
        let from = self.resolve(old)?;
        let to = self.resolve(new)?;

        if let Some(content) = content.filter(|c| !c.is_empty()) {
            fs::write(&from, content)?;
        } else if !from.exists() {
            return Err(KeeperError::NotFound(format!("strategy file {}", old_path)));
        }

        fs::rename(&from, &to).map_err(|e| not_found(&old_path, e))?;
        info!("Renamed strategy {} -> {}", old_path, Self::join(new));
        Ok(())
    }
}
