//! Remote bundle catalog passthrough
//!
//! The catalog is owned elsewhere; this module only fetches an account's
//! bundle lists and reshapes them for callers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::CatalogConfig;
use crate::domain::StrategyDefinedArg;
use crate::error::{KeeperError, Result};

/// Bundle entry as served by the catalog
#[derive(Debug, Clone, Deserialize)]
pub struct StoreBundleResponse {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub defined_args: Option<Vec<StrategyDefinedArg>>,
    #[serde(rename = "bundleName")]
    pub bundle_name: String,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreBundlesResponse {
    #[serde(default)]
    pub bundles: Vec<StoreBundleResponse>,
    #[serde(default)]
    pub app_bundles: Vec<StoreBundleResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub defined_args: Option<Vec<StrategyDefinedArg>>,
    pub bundle_name: String,
    pub mode: Option<String>,
}

impl From<StoreBundleResponse> for BundleSummary {
    fn from(bundle: StoreBundleResponse) -> Self {
        Self {
            id: bundle.id,
            name: bundle.name,
            version: bundle.version,
            defined_args: bundle.defined_args,
            bundle_name: bundle.bundle_name,
            mode: bundle.mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBundles {
    pub bundles: Vec<BundleSummary>,
    pub app_bundles: Vec<BundleSummary>,
}

impl From<StoreBundlesResponse> for RemoteBundles {
    fn from(response: StoreBundlesResponse) -> Self {
        Self {
            bundles: response.bundles.into_iter().map(Into::into).collect(),
            app_bundles: response.app_bundles.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
pub trait BundleCatalog: Send + Sync {
    async fn get_bundles(&self, account_id: &str) -> Result<StoreBundlesResponse>;
}

/// Catalog reached over HTTP at `<base_url>/bundles?accountId=...`
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &CatalogConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| {
                KeeperError::Config(::config::ConfigError::NotFound("catalog.base_url".to_string()))
            })?;
        Self::new(base_url, Duration::from_millis(config.timeout_ms))
    }
}

#[async_trait]
impl BundleCatalog for HttpCatalog {
    async fn get_bundles(&self, account_id: &str) -> Result<StoreBundlesResponse> {
        let url = format!("{}/bundles", self.base_url);
        debug!("Fetching bundles for account {} from {}", account_id, url);

        let response = self
            .client
            .get(&url)
            .query(&[("accountId", account_id)])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}
