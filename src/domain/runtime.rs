use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Database identity of a runtime configuration
pub type RuntimeId = i32;

/// Argument key reserved for the runtime's exchange
pub const EXCHANGE_ARG_KEY: &str = "exchange";

/// Where a strategy's code comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyItemType {
    /// Source file under the strategy root
    Local,
    /// Package installed from the remote catalog
    Bundle,
}

impl StrategyItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyItemType::Local => "local",
            StrategyItemType::Bundle => "bundle",
        }
    }
}

impl TryFrom<&str> for StrategyItemType {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "local" => Ok(StrategyItemType::Local),
            "bundle" => Ok(StrategyItemType::Bundle),
            _ => Err(format!("Unknown strategy type: {}", s)),
        }
    }
}

impl fmt::Display for StrategyItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    Market,
    System,
}

impl RuntimeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeType::Market => "market",
            RuntimeType::System => "system",
        }
    }
}

impl TryFrom<&str> for RuntimeType {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "market" => Ok(RuntimeType::Market),
            "system" => Ok(RuntimeType::System),
            _ => Err(format!("Unknown runtime type: {}", s)),
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to the code a runtime executes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: StrategyItemType,
    /// Root-relative path for local strategies
    #[serde(default)]
    pub path: Option<String>,
}

/// Argument value as entered by the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Number(n) => write!(f, "{}", n),
            ArgValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Text(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::Text(s)
    }
}

impl From<i64> for ArgValue {
    fn from(n: i64) -> Self {
        ArgValue::Number(n.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeArg {
    pub key: String,
    pub value: ArgValue,
}

impl RuntimeArg {
    pub fn new(key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Persisted description of one strategy instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Absent until first persisted
    #[serde(default)]
    pub id: Option<RuntimeId>,
    pub account_id: String,
    pub name: String,
    /// Short identifier; an empty value gets a random one on save
    #[serde(default)]
    pub prefix: String,
    /// Sole source of truth for the `exchange` argument
    #[serde(default)]
    pub exchange: Option<String>,
    pub strategy: StrategyItem,
    pub runtime_type: RuntimeType,
    /// Never contains the `exchange` key once loaded
    #[serde(default)]
    pub args: Vec<RuntimeArg>,
    /// Derived from `id` when loaded from storage
    #[serde(default, skip_deserializing)]
    pub artifacts: Option<ArtifactKey>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RuntimeConfig {
    /// Fresh, unsaved configuration
    pub fn new(
        account_id: impl Into<String>,
        name: impl Into<String>,
        strategy: StrategyItem,
        runtime_type: RuntimeType,
    ) -> Self {
        Self {
            id: None,
            account_id: account_id.into(),
            name: name.into(),
            prefix: String::new(),
            exchange: None,
            strategy,
            runtime_type,
            args: Vec::new(),
            artifacts: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Value of a generic argument by key
    pub fn arg(&self, key: &str) -> Option<&ArgValue> {
        self.args.iter().find(|a| a.key == key).map(|a| &a.value)
    }
}

/// Identifies the output artifacts of a live process
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// Deterministic key over an ordered list of parts
    pub fn from_parts(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(parts.join("::").as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    /// Key for the artifacts of a runtime process
    pub fn for_runtime(id: RuntimeId) -> Self {
        Self::from_parts(&[&id.to_string(), "runtime"])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
