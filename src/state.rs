use std::{sync::Arc, time::Duration};

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    clock::SystemClock,
    config::AppConfig,
    repository::postgres::{PgInvoiceRepository, PgLeaseRepository},
    services::{
        billing_engine::{BillingEngine, BillingPolicy},
        notifications::HttpNotifier,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: reqwest::Client,
    /// `None` when no database is configured.
    pub engine: Option<Arc<BillingEngine>>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;
        let config = Arc::new(config);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;

        let db_pool = match config.database_url.as_deref() {
            Some(url) => Some(
                PgPoolOptions::new()
                    .max_connections(config.db_pool_max_connections.max(1))
                    .min_connections(config.db_pool_min_connections)
                    .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds))
                    .idle_timeout(Duration::from_secs(config.db_pool_idle_timeout_seconds))
                    .connect_lazy(url)?,
            ),
            None => {
                tracing::warn!("DATABASE_URL is not set; billing jobs are disabled");
                None
            }
        };

        let engine = db_pool.as_ref().map(|pool| {
            Arc::new(BillingEngine::new(
                Arc::new(PgLeaseRepository::new(pool.clone())),
                Arc::new(PgInvoiceRepository::new(pool.clone())),
                Arc::new(HttpNotifier::new(
                    pool.clone(),
                    http_client.clone(),
                    Arc::clone(&config),
                )),
                Arc::new(SystemClock::new(config.scheduler_timezone)),
                BillingPolicy::from_config(&config),
            ))
        });

        Ok(Self {
            config,
            db_pool,
            http_client,
            engine,
        })
    }

    #[cfg(test)]
    pub fn for_tests(config: AppConfig, engine: Arc<BillingEngine>) -> Self {
        Self {
            config: Arc::new(config),
            db_pool: None,
            http_client: reqwest::Client::new(),
            engine: Some(engine),
        }
    }
}
