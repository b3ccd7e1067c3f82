use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: reqwest::Client,
    /// user id -> profile role
    pub role_cache: Cache<String, String>,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = match config.supabase_db_url.as_deref() {
            Some(url) => Some(
                PgPoolOptions::new()
                    .max_connections(config.db_pool_max_connections.max(1))
                    .min_connections(config.db_pool_min_connections)
                    .acquire_timeout(Duration::from_secs(config.db_pool_acquire_timeout_seconds))
                    .idle_timeout(Duration::from_secs(config.db_pool_idle_timeout_seconds))
                    .connect_lazy(url)?,
            ),
            None => {
                tracing::warn!("SUPABASE_DB_URL is not set; database-backed routes will fail");
                None
            }
        };

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let role_cache = Cache::builder()
            .max_capacity(config.role_cache_max_entries)
            .time_to_live(Duration::from_secs(config.role_cache_ttl_seconds.max(1)))
            .build();

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
            role_cache,
        })
    }
}
