//! The durable message store contract.
//!
//! `spec.md` §6.1 treats persistence as an external collaborator specified
//! only by contract: the engine is stateless across restarts, and anything
//! durable lives behind [`QueueMessageStore`]. Grounded on the teacher's
//! `rustpress-jobs::queue::Queue` trait and `JobRow`, but demoted from a
//! concrete `sqlx::PgPool` struct to a trait so the Postgres adapter can be
//! optional (`postgres-store` feature) while an in-memory implementation
//! backs tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::job::{JobPriority, JobResult, JobType};

/// A unit of durable work as the store sees it: a free-form JSON payload
/// plus the bookkeeping fields the engine needs to dequeue and retry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: Uuid,
    pub job_type: String,
    pub priority: JobPriority,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub processed: bool,
    /// The handler's final results, written back by
    /// [`QueueMessageStore::update`] once an execution finishes
    /// (`spec.md` §3, §6.4 — the only serialized artifact the engine
    /// produces, treated as opaque).
    pub result: Option<Vec<JobResult>>,
    pub created_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(job_type: impl Into<String>, priority: JobPriority, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            priority,
            payload,
            attempt: 0,
            processed: false,
            result: None,
            created_at: now,
            available_at: now,
        }
    }

    pub fn job_type_ref(&self) -> JobType {
        JobType::get_or_create(&self.job_type)
    }
}

/// Fields `QueueMessageStore::update` may change on an existing message —
/// `spec.md` §6.1's `update(id, {isProcessed?, result?})`. `None` leaves a
/// field untouched.
#[derive(Debug, Clone, Default)]
pub struct QueueMessageUpdate {
    pub processed: Option<bool>,
    pub result: Option<Vec<JobResult>>,
}

/// Filter used by [`QueueMessageStore::list`] and the scheduler's
/// store-backed draining mode (`SourceMode::Store`).
#[derive(Debug, Clone, Default)]
pub struct QueueMessageFilter {
    pub job_type: Option<String>,
    pub processed: Option<bool>,
    pub available_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// The durable collaborator the engine never implements itself in
/// production — only consults through this contract.
#[async_trait]
pub trait QueueMessageStore: Send + Sync {
    async fn insert(&self, message: QueueMessage) -> Result<()>;
    async fn list(&self, filter: QueueMessageFilter) -> Result<Vec<QueueMessage>>;
    /// Apply the given fields to the message with `id`; fields left as
    /// `None` in `update` are untouched (`spec.md` §6.1).
    async fn update(&self, id: Uuid, update: QueueMessageUpdate) -> Result<()>;
    async fn update_attempt(&self, id: Uuid, attempt: u32, available_at: DateTime<Utc>) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<QueueMessage>>;
}

/// Reference in-memory implementation used by tests and by embedders that
/// don't need cross-restart durability.
#[derive(Default)]
pub struct InMemoryStore {
    messages: Mutex<HashMap<Uuid, QueueMessage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueMessageStore for InMemoryStore {
    async fn insert(&self, message: QueueMessage) -> Result<()> {
        self.messages.lock().insert(message.id, message);
        Ok(())
    }

    async fn list(&self, filter: QueueMessageFilter) -> Result<Vec<QueueMessage>> {
        let messages = self.messages.lock();
        let mut out: Vec<QueueMessage> = messages
            .values()
            .filter(|m| {
                filter
                    .job_type
                    .as_ref()
                    .map(|t| t == &m.job_type)
                    .unwrap_or(true)
                    && filter.processed.map(|p| p == m.processed).unwrap_or(true)
                    && filter
                        .available_before
                        .map(|t| m.available_at <= t)
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        out.sort_by_key(|m| m.created_at);
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn update(&self, id: Uuid, update: QueueMessageUpdate) -> Result<()> {
        if let Some(message) = self.messages.lock().get_mut(&id) {
            if let Some(processed) = update.processed {
                message.processed = processed;
            }
            if let Some(result) = update.result {
                message.result = Some(result);
            }
        }
        Ok(())
    }

    async fn update_attempt(&self, id: Uuid, attempt: u32, available_at: DateTime<Utc>) -> Result<()> {
        if let Some(message) = self.messages.lock().get_mut(&id) {
            message.attempt = attempt;
            message.available_at = available_at;
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueMessage>> {
        Ok(self.messages.lock().get(&id).cloned())
    }
}

#[cfg(feature = "postgres-store")]
pub mod postgres {
    //! Durable adapter grounded on the teacher's `rustpress-jobs::queue`
    //! `SELECT ... FOR UPDATE SKIP LOCKED` dequeue pattern. Feature-gated
    //! because the engine core treats the store as an external contract
    //! (`spec.md` §6.1), not a hard dependency.

    use super::*;
    use sqlx::PgPool;
    use sqlx::Row;

    pub struct PostgresStore {
        pool: PgPool,
        table: String,
    }

    impl PostgresStore {
        pub fn new(pool: PgPool) -> Self {
            Self {
                pool,
                table: "queue_messages".to_string(),
            }
        }

        pub fn with_table(mut self, table: impl Into<String>) -> Self {
            self.table = table.into();
            self
        }
    }

    fn decode_row(row: &sqlx::postgres::PgRow) -> Result<QueueMessage> {
        let priority_val: i32 = row.try_get("priority").unwrap_or(2);
        let priority = match priority_val {
            1 => JobPriority::Low,
            3 => JobPriority::Medium,
            4 => JobPriority::High,
            5 => JobPriority::Critical,
            _ => JobPriority::Normal,
        };
        let result: Option<serde_json::Value> = row
            .try_get("result")
            .map_err(|e| crate::error::Error::store_with_source("row decode", e))?;
        let result = result
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| crate::error::Error::store_with_source("failed to decode stored job result", e))?;

        Ok(QueueMessage {
            id: row.try_get("id").map_err(|e| crate::error::Error::store_with_source("row decode", e))?,
            job_type: row.try_get("job_type").map_err(|e| crate::error::Error::store_with_source("row decode", e))?,
            priority,
            payload: row.try_get("payload").map_err(|e| crate::error::Error::store_with_source("row decode", e))?,
            attempt: row.try_get::<i32, _>("attempt").map_err(|e| crate::error::Error::store_with_source("row decode", e))? as u32,
            processed: row.try_get("processed").map_err(|e| crate::error::Error::store_with_source("row decode", e))?,
            result,
            created_at: row.try_get("created_at").map_err(|e| crate::error::Error::store_with_source("row decode", e))?,
            available_at: row.try_get("available_at").map_err(|e| crate::error::Error::store_with_source("row decode", e))?,
        })
    }

    #[async_trait]
    impl QueueMessageStore for PostgresStore {
        async fn insert(&self, message: QueueMessage) -> Result<()> {
            let query = format!(
                "INSERT INTO {} (id, job_type, priority, payload, attempt, processed, result, created_at, available_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                self.table
            );
            let result = message
                .result
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| crate::error::Error::store_with_source("failed to encode job result", e))?;
            sqlx::query(&query)
                .bind(message.id)
                .bind(&message.job_type)
                .bind(message.priority as i32)
                .bind(&message.payload)
                .bind(message.attempt as i32)
                .bind(message.processed)
                .bind(result)
                .bind(message.created_at)
                .bind(message.available_at)
                .execute(&self.pool)
                .await
                .map_err(|e| crate::error::Error::store_with_source("failed to insert queue message", e))?;
            Ok(())
        }

        async fn list(&self, filter: QueueMessageFilter) -> Result<Vec<QueueMessage>> {
            let query = format!(
                "SELECT id, job_type, priority, payload, attempt, processed, result, created_at, available_at
                 FROM {}
                 WHERE ($1::text IS NULL OR job_type = $1)
                   AND ($2::bool IS NULL OR processed = $2)
                   AND ($3::timestamptz IS NULL OR available_at <= $3)
                 ORDER BY created_at ASC
                 LIMIT $4
                 FOR UPDATE SKIP LOCKED",
                self.table
            );
            let rows = sqlx::query(&query)
                .bind(filter.job_type)
                .bind(filter.processed)
                .bind(filter.available_before)
                .bind(filter.limit.unwrap_or(100) as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| crate::error::Error::store_with_source("failed to list queue messages", e))?;

            rows.iter().map(decode_row).collect()
        }

        async fn update(&self, id: Uuid, update: QueueMessageUpdate) -> Result<()> {
            let result = update
                .result
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| crate::error::Error::store_with_source("failed to encode job result", e))?;
            let query = format!(
                "UPDATE {} SET processed = COALESCE($2, processed), result = COALESCE($3, result) WHERE id = $1",
                self.table
            );
            sqlx::query(&query)
                .bind(id)
                .bind(update.processed)
                .bind(result)
                .execute(&self.pool)
                .await
                .map_err(|e| crate::error::Error::store_with_source("failed to update queue message", e))?;
            Ok(())
        }

        async fn update_attempt(&self, id: Uuid, attempt: u32, available_at: DateTime<Utc>) -> Result<()> {
            let query = format!(
                "UPDATE {} SET attempt = $2, available_at = $3 WHERE id = $1",
                self.table
            );
            sqlx::query(&query)
                .bind(id)
                .bind(attempt as i32)
                .bind(available_at)
                .execute(&self.pool)
                .await
                .map_err(|e| crate::error::Error::store_with_source("failed to update queue message attempt", e))?;
            Ok(())
        }

        async fn get(&self, id: Uuid) -> Result<Option<QueueMessage>> {
            let query = format!(
                "SELECT id, job_type, priority, payload, attempt, processed, result, created_at, available_at
                 FROM {}
                 WHERE id = $1",
                self.table
            );
            let row = sqlx::query(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| crate::error::Error::store_with_source("failed to fetch queue message", e))?;

            row.as_ref().map(decode_row).transpose()
        }
    }
}
