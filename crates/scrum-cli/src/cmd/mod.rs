pub mod call;
pub mod init;
pub mod rpc;
pub mod serve;
pub mod status;

use anyhow::Context;
use scrum_core::{Config, Services, SqliteStore};
use std::path::Path;
use std::sync::Arc;

/// Load the config and open the store it points at.
pub fn open_services(root: &Path) -> anyhow::Result<(Config, Services)> {
    let config = Config::load(root).context("failed to load .scrum/config.yaml")?;
    for w in config.validate() {
        tracing::warn!(level = ?w.level, "config: {}", w.message);
    }
    let db = config.db_path(root);
    let store = SqliteStore::open(&db)
        .with_context(|| format!("failed to open store at {}", db.display()))?;
    tracing::debug!(path = %db.display(), "store opened");
    let services = Services::from_config(Arc::new(store), &config);
    Ok((config, services))
}
