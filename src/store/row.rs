//! Mapping between persisted runtime rows and `RuntimeConfig`
//!
//! Storage keeps the strategy reference as flat columns and the exchange as
//! one of the serialized arguments. Both directions are pure functions so the
//! Postgres and in-memory backends share them.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::domain::{
    ArgValue, ArtifactKey, RuntimeArg, RuntimeConfig, RuntimeId, RuntimeType, StrategyItem,
    StrategyItemType, EXCHANGE_ARG_KEY,
};
use crate::error::{KeeperError, Result};

/// Length of generated runtime prefixes
pub const PREFIX_LEN: usize = 6;

/// Random short identifier for runtimes saved without a prefix
pub fn generate_prefix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PREFIX_LEN)
        .map(char::from)
        .collect()
}

/// Drop every incoming `exchange` entry and append the one derived from the
/// dedicated field, so at most one survives.
pub fn normalize_args(args: &[RuntimeArg], exchange: Option<&str>) -> Vec<RuntimeArg> {
    let mut normalized: Vec<RuntimeArg> = args
        .iter()
        .filter(|arg| arg.key != EXCHANGE_ARG_KEY)
        .cloned()
        .collect();

    if let Some(exchange) = exchange.filter(|e| !e.is_empty()) {
        normalized.push(RuntimeArg::new(EXCHANGE_ARG_KEY, exchange));
    }

    normalized
}

/// A `runtimes` row as read from storage
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeRow {
    pub id: RuntimeId,
    pub account_id: String,
    pub name: String,
    pub prefix: String,
    pub strategy: String,
    pub strategy_id: String,
    pub strategy_type: String,
    pub strategy_path: Option<String>,
    pub runtime_type: String,
    /// JSON array of `{key, value}`
    pub args: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RuntimeRow {
    /// Rebuild the typed configuration from flat columns.
    pub fn into_config(self) -> Result<RuntimeConfig> {
        let stored: Vec<RuntimeArg> = serde_json::from_str(&self.args).map_err(|e| {
            KeeperError::ConfigInvalid(format!("runtime {} has malformed args: {}", self.id, e))
        })?;

        let exchange = stored
            .iter()
            .find(|arg| arg.key == EXCHANGE_ARG_KEY)
            .map(|arg| arg.value.to_string());
        let args = stored
            .into_iter()
            .filter(|arg| arg.key != EXCHANGE_ARG_KEY)
            .collect();

        let kind = StrategyItemType::try_from(self.strategy_type.as_str())
            .map_err(KeeperError::ConfigInvalid)?;
        let runtime_type = RuntimeType::try_from(self.runtime_type.as_str())
            .map_err(KeeperError::ConfigInvalid)?;

        Ok(RuntimeConfig {
            id: Some(self.id),
            account_id: self.account_id,
            name: self.name,
            prefix: self.prefix,
            exchange,
            strategy: StrategyItem {
                id: self.strategy_id,
                name: self.strategy,
                kind,
                path: self.strategy_path,
            },
            runtime_type,
            args,
            artifacts: Some(ArtifactKey::for_runtime(self.id)),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        })
    }
}

/// Column values written by an insert or update
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeWrite {
    pub account_id: String,
    pub name: String,
    pub prefix: String,
    pub strategy: String,
    pub strategy_id: String,
    pub strategy_type: String,
    pub strategy_path: Option<String>,
    pub runtime_type: String,
    pub args: String,
}

impl RuntimeWrite {
    /// Flatten a configuration for persistence, folding `exchange` into the
    /// arguments and assigning a prefix when none was supplied.
    pub fn prepare(config: &RuntimeConfig) -> Result<Self> {
        let args = normalize_args(&config.args, config.exchange.as_deref());
        let prefix = if config.prefix.trim().is_empty() {
            generate_prefix()
        } else {
            config.prefix.clone()
        };

        Ok(Self {
            account_id: config.account_id.clone(),
            name: config.name.clone(),
            prefix,
            strategy: config.strategy.name.clone(),
            strategy_id: config.strategy.id.clone(),
            strategy_type: config.strategy.kind.as_str().to_string(),
            strategy_path: config.strategy.path.clone(),
            runtime_type: config.runtime_type.as_str().to_string(),
            args: serde_json::to_string(&args)?,
        })
    }

    /// Decoded arguments, as they will be stored
    pub fn decoded_args(&self) -> Vec<RuntimeArg> {
        serde_json::from_str(&self.args).unwrap_or_default()
    }
}

/// Display helper used in log lines
pub(crate) fn describe_args(args: &[RuntimeArg]) -> String {
    args.iter()
        .map(|a| match &a.value {
            ArgValue::Number(n) => format!("{}={}", a.key, n),
            ArgValue::Text(s) => format!("{}={:?}", a.key, s),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
