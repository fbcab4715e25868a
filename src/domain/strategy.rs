use serde::{Deserialize, Serialize};

use super::runtime::StrategyItemType;

/// Argument a strategy declares it accepts, with its default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDefinedArg {
    pub key: String,
    #[serde(default)]
    pub default_value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Locally authored strategy as shown in the strategy picker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStrategy {
    pub id: String,
    pub name: String,
    /// Root-relative, `/`-separated
    pub path: String,
    #[serde(rename = "type")]
    pub kind: StrategyItemType,
    /// `None` when the file declares nothing or could not be parsed
    pub defined_args: Option<Vec<StrategyDefinedArg>>,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyContent {
    pub strategy: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTreeContent {
    pub path: String,
    pub filename: String,
    pub content: String,
}

/// Node of the strategy source tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileNode {
    File {
        path: String,
        name: String,
        content: String,
    },
    Dir {
        path: String,
        name: String,
        children: Vec<FileNode>,
    },
}

impl FileNode {
    pub fn name(&self) -> &str {
        match self {
            FileNode::File { name, .. } | FileNode::Dir { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            FileNode::File { path, .. } | FileNode::Dir { path, .. } => path,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileNode::Dir { .. })
    }
}
