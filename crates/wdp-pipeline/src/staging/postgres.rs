//! PostgreSQL staging store
//!
//! Rows live in `staging_weather_data` (see `migrations/`). A batch is written
//! inside one transaction, so a failed append leaves no partial batch behind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};
use wdp_common::types::{BatchHandle, RawItem, StagedRecord};

use super::StagingStore;
use crate::config::DatabaseConfig;
use crate::error::{PipelineError, Result, Stage};

/// Rows per INSERT statement; 10 binds per row keeps us well under the
/// 65535 bind-parameter limit.
const INSERT_CHUNK_ROWS: usize = 1000;

#[derive(Debug, sqlx::FromRow)]
struct StagedRow {
    subject: String,
    temperature: Option<f64>,
    feels_like: Option<f64>,
    humidity: Option<f64>,
    pressure: Option<f64>,
    description: Option<String>,
    wind_speed: Option<f64>,
    fetch_time: Option<DateTime<Utc>>,
    event_time_epoch: Option<i64>,
    batch_handle: DateTime<Utc>,
}

impl From<StagedRow> for StagedRecord {
    fn from(row: StagedRow) -> Self {
        Self {
            subject: row.subject,
            temperature: row.temperature,
            feels_like: row.feels_like,
            humidity: row.humidity,
            pressure: row.pressure,
            description: row.description,
            wind_speed: row.wind_speed,
            fetch_time: row.fetch_time,
            event_time_epoch: row.event_time_epoch,
            batch_handle: BatchHandle::from_datetime(row.batch_handle),
        }
    }
}

/// Staging store backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgStagingStore {
    pool: PgPool,
}

impl PgStagingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| {
                PipelineError::Unavailable(format!("failed to connect to staging database: {e}"))
            })?;

        info!(max_connections = config.max_connections, "Connected to staging database");
        Ok(Self::new(pool))
    }

    /// Apply pending migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| PipelineError::Unavailable(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Run `SELECT 1` against the database
    pub async fn ping(&self) -> Result<()> {
        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PipelineError::Unavailable(format!("connection test failed: {e}")))?;
        debug!(result = one, "Staging database connection test succeeded");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StagingStore for PgStagingStore {
    async fn append(&self, items: &[RawItem], batch: BatchHandle) -> Result<()> {
        let persist = |e: sqlx::Error| PipelineError::persist(Stage::Extract, Some(batch), e.to_string());

        let mut tx = self.pool.begin().await.map_err(persist)?;

        for chunk in items.chunks(INSERT_CHUNK_ROWS) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO staging_weather_data (subject, temperature, feels_like, humidity, \
                 pressure, description, wind_speed, fetch_time, event_time_epoch, batch_handle) ",
            );
            builder.push_values(chunk, |mut row, item| {
                row.push_bind(item.subject.as_str())
                    .push_bind(item.temperature)
                    .push_bind(item.feels_like)
                    .push_bind(item.humidity)
                    .push_bind(item.pressure)
                    .push_bind(item.description.as_str())
                    .push_bind(item.wind_speed)
                    .push_bind(item.fetch_time)
                    .push_bind(item.event_time_epoch)
                    .push_bind(batch.as_datetime());
            });
            builder.build().execute(&mut *tx).await.map_err(persist)?;
        }

        tx.commit().await.map_err(persist)?;

        debug!(%batch, records = items.len(), "Inserted batch into staging table");
        Ok(())
    }

    async fn query(&self, batch: BatchHandle) -> Result<Vec<StagedRecord>> {
        let rows: Vec<StagedRow> = sqlx::query_as(
            r#"
            SELECT
                subject, temperature, feels_like, humidity, pressure,
                description, wind_speed, fetch_time, event_time_epoch, batch_handle
            FROM staging_weather_data
            WHERE batch_handle = $1
            "#,
        )
        .bind(batch.as_datetime())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::persist(Stage::Transform, Some(batch), e.to_string()))?;

        Ok(rows.into_iter().map(StagedRecord::from).collect())
    }
}
