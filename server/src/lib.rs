//! HTTP backend for the raffle: SQLite persistence, catalog seeding, winner notification, and
//! the axum surface over [`raffle_execution::Raffle`].

use anyhow::Context;
use raffle_execution::{Raffle, StaticDirectory};
use std::sync::Arc;
use tracing::{info, warn};

mod api;
mod catalog;
mod config;
mod notify;
mod store;

pub use api::Api;
pub use catalog::{Catalog, CatalogUser};
pub use config::ServerConfig;
pub use notify::{ServerNotifier, WebhookNotifier};
pub use store::SqliteStore;

pub type Engine = Raffle<SqliteStore, ServerNotifier, StaticDirectory>;

/// Process-wide state shared by every request.
pub struct Server {
    pub config: ServerConfig,
    raffle: Engine,
}

impl Server {
    pub fn new(config: ServerConfig, raffle: Engine) -> Self {
        Self { config, raffle }
    }

    /// Opens the store, seeds the catalog, and wires the engine described by `config`.
    pub async fn open(config: ServerConfig) -> anyhow::Result<Self> {
        let store = match &config.database_path {
            Some(path) => {
                info!(path = %path.display(), "using sqlite store");
                SqliteStore::open(path)?
            }
            None => {
                info!("using in-memory store");
                SqliteStore::open_in_memory()?
            }
        };
        let catalog = match &config.catalog_path {
            Some(path) => Catalog::load(path)?,
            None => Catalog::default(),
        };
        catalog.seed(&store).await.context("seed catalog")?;

        let notifier = ServerNotifier::from_url(config.notify_webhook_url.as_deref())
            .context("build notifier")?;
        let directory = catalog.directory();
        if directory.is_empty() {
            warn!("user directory is empty; winner notifications will be skipped");
        } else {
            info!(contacts = directory.len(), "user directory loaded");
        }
        let raffle = Raffle::new(
            Arc::new(store),
            Arc::new(notifier),
            Arc::new(directory),
            config.engine_config(),
        );
        Ok(Self::new(config, raffle))
    }

    pub fn raffle(&self) -> &Engine {
        &self.raffle
    }
}
