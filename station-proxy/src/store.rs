use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::collections::HashSet;
use std::str::FromStr;
use tokio::sync::Mutex;

/// Durable on/off flag per user.
///
/// Turning a station on when it is already on (or off when already off) is a
/// [`Error::Conflict`]. A user without a record is off.
#[async_trait]
pub trait StationStore: Send + Sync {
    async fn status(&self, user_id: &str) -> Result<bool>;

    async fn turn_on(&self, user_id: &str) -> Result<()>;

    async fn turn_off(&self, user_id: &str) -> Result<()>;
}

fn already(user_id: &str, state: &str) -> Error {
    Error::Conflict(format!("{} station is already {}", user_id, state))
}

/// SQLite-backed station flags. Each mutation is a single conditional
/// statement inside its own transaction.
#[derive(Clone)]
pub struct SqliteStationStore {
    db: SqlitePool,
}

impl SqliteStationStore {
    /// Open (creating if needed) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // every connection to an in-memory database sees a different database
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };

        Self::new(pool).await
    }

    pub async fn new(db: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stations (
                user_id TEXT PRIMARY KEY NOT NULL,
                active INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&db)
        .await?;

        Ok(Self { db })
    }
}

#[async_trait]
impl StationStore for SqliteStationStore {
    async fn status(&self, user_id: &str) -> Result<bool> {
        let active = sqlx::query_scalar::<_, bool>("SELECT active FROM stations WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;

        Ok(active.unwrap_or(false))
    }

    async fn turn_on(&self, user_id: &str) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO stations (user_id, active)
            VALUES (?, 1)
            ON CONFLICT(user_id) DO UPDATE SET active = 1
            WHERE stations.active = 0
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(already(user_id, "on"));
        }

        tx.commit().await?;
        tracing::info!("station turned on for {}", user_id);
        Ok(())
    }

    async fn turn_off(&self, user_id: &str) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let result = sqlx::query("UPDATE stations SET active = 0 WHERE user_id = ? AND active = 1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(already(user_id, "off"));
        }

        tx.commit().await?;
        tracing::info!("station turned off for {}", user_id);
        Ok(())
    }
}

/// In-process station flags, for tests and throwaway deployments.
#[derive(Default)]
pub struct MemoryStationStore {
    active: Mutex<HashSet<String>>,
}

impl MemoryStationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StationStore for MemoryStationStore {
    async fn status(&self, user_id: &str) -> Result<bool> {
        Ok(self.active.lock().await.contains(user_id))
    }

    async fn turn_on(&self, user_id: &str) -> Result<()> {
        if !self.active.lock().await.insert(user_id.to_string()) {
            return Err(already(user_id, "on"));
        }
        Ok(())
    }

    async fn turn_off(&self, user_id: &str) -> Result<()> {
        if !self.active.lock().await.remove(user_id) {
            return Err(already(user_id, "off"));
        }
        Ok(())
    }
}
