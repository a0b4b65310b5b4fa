//! Database connection pool and repository accessors.

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::database::identities::PgIdentityStore;
use crate::database::logs::LogRepository;
use crate::database::migrations;
use crate::database::stats::StatsRepository;
use crate::error::Result;

pub struct DatabasePool {
    pool: PgPool,
    identities: PgIdentityStore,
    logs: LogRepository,
    stats: StatsRepository,
}

impl DatabasePool {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        info!("connected to PostgreSQL");

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        let identities = PgIdentityStore::new(pool.clone());
        let logs = LogRepository::new(pool.clone());
        let stats = StatsRepository::new(pool.clone());
        Self {
            pool,
            identities,
            logs,
            stats,
        }
    }

    /// Apply pending schema migrations. Returns how many ran so the caller
    /// can decide whether to replay stored logs.
    pub async fn migrate(&self) -> Result<usize> {
        migrations::run(&self.pool).await
    }

    pub fn identities(&self) -> &PgIdentityStore {
        &self.identities
    }

    /// Owned identity store handle, for sharing as `Arc<dyn IdentityStore>`.
    pub fn identity_store(&self) -> PgIdentityStore {
        self.identities.clone()
    }

    pub fn logs(&self) -> &LogRepository {
        &self.logs
    }

    pub fn stats(&self) -> &StatsRepository {
        &self.stats
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
