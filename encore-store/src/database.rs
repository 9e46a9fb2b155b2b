use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

const MAX_CONNECTIONS: u32 = 5;

/// Connection pool for the seat and hold tables.
#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        info!("Postgres pool ready ({} connections)", MAX_CONNECTIONS);
        Ok(Self { pool })
    }

    /// Creates or upgrades the options, seats and holds tables.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Applying seat and hold schema migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Seat and hold schema is up to date.");
        Ok(())
    }
}
