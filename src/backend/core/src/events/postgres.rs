//! PostgreSQL event storage.
//!
//! Appends for one user are serialized with a transaction-scoped advisory
//! lock; the `(user_id, idempotency_key)` unique constraint backs it up.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::event::{AppendOutcome, EventId, EventQuery, NewEvent, StoredEvent, UserId};
use super::storage::EventStorage;
use crate::config::DatabaseConfig;
use crate::error::{KernelError, Result};

/// Event storage backed by the `life_events` table.
#[derive(Clone)]
pub struct PgEventStorage {
    pool: PgPool,
}

impl PgEventStorage {
    /// Connect using the database section of the config.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| KernelError::from(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const SELECT_COLUMNS: &str =
    "SELECT seq, event_id, user_id, ts, day, event_type, metadata, idempotency_key FROM life_events";

#[async_trait]
impl EventStorage for PgEventStorage {
    #[instrument(skip(self, events), fields(user_id = %user, count = events.len()))]
    async fn append_batch(&self, user: &UserId, events: Vec<NewEvent>) -> Result<AppendOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(user.as_str())
            .execute(&mut *tx)
            .await?;

        let keys: Vec<String> = events.iter().map(|e| e.idempotency_key.clone()).collect();
        let existing = sqlx::query_as::<_, EventRow>(&format!(
            "{} WHERE user_id = $1 AND idempotency_key = ANY($2) ORDER BY seq ASC",
            SELECT_COLUMNS
        ))
        .bind(user.as_str())
        .bind(&keys)
        .fetch_all(&mut *tx)
        .await?;

        if !existing.is_empty() {
            tx.rollback().await?;
            debug!(key = %existing[0].idempotency_key, "Duplicate idempotency key");
            return Ok(AppendOutcome::Duplicate(
                existing
                    .into_iter()
                    .map(|row| StoredEvent::from(row).to_ref())
                    .collect(),
            ));
        }

        let mut refs = Vec::with_capacity(events.len());
        for event in events {
            let event_id = EventId::new();
            let (seq,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO life_events (event_id, user_id, ts, day, event_type, metadata, idempotency_key)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING seq
                "#,
            )
            .bind(event_id.0)
            .bind(user.as_str())
            .bind(event.timestamp)
            .bind(event.day)
            .bind(&event.event_type)
            .bind(&event.metadata)
            .bind(&event.idempotency_key)
            .fetch_one(&mut *tx)
            .await?;

            refs.push(event.into_stored(event_id, seq as u64).to_ref());
        }

        tx.commit().await?;
        Ok(AppendOutcome::Appended(refs))
    }

    #[instrument(skip(self), fields(user_id = %user))]
    async fn query(&self, user: &UserId, query: &EventQuery) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"{}
            WHERE user_id = $1
              AND ($2::timestamptz IS NULL OR ts >= $2)
              AND ($3::text IS NULL OR idempotency_key = $3)
            ORDER BY ts ASC, seq ASC"#,
            SELECT_COLUMNS
        ))
        .bind(user.as_str())
        .bind(query.since)
        .bind(query.idempotency_key.as_deref())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredEvent::from).collect())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    seq: i64,
    event_id: Uuid,
    user_id: String,
    ts: DateTime<Utc>,
    day: NaiveDate,
    event_type: String,
    metadata: serde_json::Value,
    idempotency_key: String,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        Self {
            id: EventId(row.event_id),
            user_id: UserId(row.user_id),
            seq: row.seq as u64,
            timestamp: row.ts,
            day: row.day,
            event_type: row.event_type,
            metadata: row.metadata,
            idempotency_key: row.idempotency_key,
        }
    }
}
