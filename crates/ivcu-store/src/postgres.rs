//! Postgres-backed [`EventStore`].
//!
//! Uses runtime-checked `sqlx::query` rather than the `query!` macros:
//! the `ivcu_events` table is created by migrations that may not exist yet
//! at compile time in a fresh checkout.

use async_trait::async_trait;
use ivcu_projector::{replay, replay_to};
use ivcu_types::{Event, EventPayload, IvcuState};
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::{EventStore, StoreError};

pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(e.into()))
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<Event, StoreError> {
        let payload_json: serde_json::Value = row.try_get("payload")?;
        let event_type: String = row.try_get("event_type")?;
        let mut tagged = payload_json.clone();
        if let serde_json::Value::Object(ref mut map) = tagged {
            map.insert(
                "event_type".to_string(),
                serde_json::Value::String(event_type),
            );
        }
        let payload: EventPayload = serde_json::from_value(tagged)
            .map_err(|e| StoreError::Internal(anyhow::anyhow!(e)))?;
        Ok(Event {
            event_id: row.try_get("event_id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            sequence_number: row.try_get::<i64, _>("sequence_number")? as u64,
            payload,
            timestamp: row.try_get("occurred_at")?,
            actor_id: row.try_get("actor_id")?,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: u64,
        payload: EventPayload,
        actor_id: Option<String>,
    ) -> Result<Event, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Per-aggregate advisory lock: serializes concurrent appenders on
        // the same aggregate without taking a row lock on a table that may
        // have zero rows for a brand-new aggregate.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(aggregate_id.to_string())
            .execute(&mut *tx)
            .await?;

        let actual: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence_number), 0) FROM ivcu_events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&mut *tx)
        .await?;
        let actual = actual as u64;

        if actual != expected_version {
            tx.rollback().await.ok();
            return Err(StoreError::VersionConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        let event = Event {
            event_id: Uuid::new_v4(),
            aggregate_id,
            sequence_number: actual + 1,
            payload,
            timestamp: chrono::Utc::now(),
            actor_id,
        };
        let payload_json = serde_json::to_value(&event.payload)
            .map_err(|e| StoreError::Internal(anyhow::anyhow!(e)))?;

        sqlx::query(
            r#"
            INSERT INTO ivcu_events
                (event_id, aggregate_id, sequence_number, event_type, payload, occurred_at, actor_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.event_id)
        .bind(event.aggregate_id)
        .bind(event.sequence_number as i64)
        .bind(event.event_type())
        .bind(&payload_json)
        .bind(event.timestamp)
        .bind(&event.actor_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(event)
    }

    async fn events(&self, aggregate_id: Uuid) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, aggregate_id, sequence_number, event_type, payload, occurred_at, actor_id
            FROM ivcu_events
            WHERE aggregate_id = $1
            ORDER BY sequence_number
            "#,
        )
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(StoreError::NotFound(aggregate_id));
        }
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn events_since(
        &self,
        aggregate_id: Uuid,
        after_version: u64,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, aggregate_id, sequence_number, event_type, payload, occurred_at, actor_id
            FROM ivcu_events
            WHERE aggregate_id = $1 AND sequence_number > $2
            ORDER BY sequence_number
            "#,
        )
        .bind(aggregate_id)
        .bind(after_version as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_event).collect()
    }

    async fn state(&self, aggregate_id: Uuid) -> Result<IvcuState, StoreError> {
        let events = self.events(aggregate_id).await?;
        let count = events.len();
        let state = replay(&events)?;
        if state.version as usize != count {
            warn!(%aggregate_id, "replayed version does not match stored event count");
        }
        Ok(state)
    }

    async fn state_at(&self, aggregate_id: Uuid, version: u64) -> Result<IvcuState, StoreError> {
        let events = self.events(aggregate_id).await?;
        Ok(replay_to(&events, version)?)
    }
}
