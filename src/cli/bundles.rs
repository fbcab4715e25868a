use anyhow::Result;

use super::print_json;
use crate::catalog::{BundleCatalog, HttpCatalog, RemoteBundles};
use crate::config::AppConfig;
use crate::logging::init_logging_simple;

pub async fn run(config: AppConfig, account_id: &str) -> Result<()> {
    init_logging_simple();
    let catalog = HttpCatalog::from_config(&config.catalog)?;
    let bundles = RemoteBundles::from(catalog.get_bundles(account_id).await?);
    print_json(&bundles)
}
