use std::sync::Arc;

use leadroute_core::config::{AppConfig, ConfigError, LoadOptions};
use leadroute_db::{connect_with_config, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::sse::EventHub;

const EVENT_HUB_CAPACITY: usize = 256;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub event_hub: Arc<EventHub>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    Ok(Application { config, db_pool, event_hub: Arc::new(EventHub::new(EVENT_HUB_CAPACITY)) })
}

#[cfg(test)]
mod tests {
    use leadroute_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn memory_options() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_exposes_the_routing_tables() {
        let app = bootstrap(memory_options()).await.expect("bootstrap with memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN \
             ('leads', 'lead_facts', 'business_units', 'bu_skus', 'rule_sets', \
              'rule_conditions', 'routing_runs', 'routing_recommendations', \
              'recommendation_skus', 'agent_logs', 'assignments', \
              'delegation_sessions', 'delegation_steps')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("count routing tables");
        assert_eq!(table_count, 13, "bootstrap should expose the full routing schema");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_a_non_sqlite_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://nope".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }
}
