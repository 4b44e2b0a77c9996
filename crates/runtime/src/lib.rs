use std::sync::Arc;

use anyhow::{Context, Result};
use roomcast_auth::Authenticator;
use roomcast_config::AppConfig;
use roomcast_database::{initialize_database, DatabaseConnection, SqliteStore};
use roomcast_realtime::Coordinator;
use tracing::{info, warn};

pub mod telemetry {
    use anyhow::Result;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_env_filter(env_filter)
            .with_target(true)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Everything a running server needs, wired together.
#[derive(Clone)]
pub struct BackendServices {
    pub database: DatabaseConnection,
    pub store: Arc<SqliteStore>,
    pub authenticator: Arc<Authenticator>,
    pub coordinator: Coordinator,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        config
            .realtime
            .validate()
            .context("invalid realtime configuration")?;
        let pool = initialize_database(&config.database)
            .await
            .context("failed to initialise database")?;
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let authenticator = Arc::new(Authenticator::new(store.clone(), &config.auth));
        let coordinator = Coordinator::new(
            store.clone(),
            authenticator.clone(),
            config.realtime.clone(),
        );
        coordinator.start_background_tasks().await;

        info!(database = %config.database.url, "backend services ready");

        Ok(Self {
            database: DatabaseConnection::from_pool(pool),
            store,
            authenticator,
            coordinator,
        })
    }

    /// Stop background work and close the pool.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
        self.database.close().await;
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
