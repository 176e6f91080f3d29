//! `PostgreSQL` [`RequestStore`] implementation.
//!
//! Writes that depend on the current request row (`add_keys`,
//! `update_status`) lock it with `SELECT ... FOR UPDATE` inside a
//! transaction, so conflicting writers for the same request serialize.
//! Key rows are committed before the status flips to `successful`, and key
//! rows are never deleted from a `successful` request, so a read-committed
//! reader that sees `successful` always sees the whole batch.

use std::time::Duration;

use async_trait::async_trait;
use provisioner_core::{GeneratedKey, RequestId, RequestStatus, ValidatorRequest};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;
use tracing::info;

use crate::storage::error::StoreError;
use crate::storage::store::{check_batch, check_transition, RequestSnapshot, RequestStore};

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS validator_requests (
        request_id     TEXT PRIMARY KEY,
        created_at     BIGINT NOT NULL,
        status         TEXT NOT NULL,
        num_validators BIGINT NOT NULL,
        fee_recipient  TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS validator_keys (
        key_id        TEXT PRIMARY KEY,
        request_id    TEXT NOT NULL REFERENCES validator_requests(request_id),
        key_material  TEXT NOT NULL,
        fee_recipient TEXT NOT NULL,
        position      BIGINT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS validator_keys_request_id_idx ON validator_keys (request_id)",
];

const SELECT_REQUEST: &str = "SELECT request_id, created_at, status, num_validators, fee_recipient \
     FROM validator_requests WHERE request_id = $1";

const SELECT_REQUEST_FOR_UPDATE: &str = "SELECT request_id, created_at, status, num_validators, fee_recipient \
     FROM validator_requests WHERE request_id = $1 FOR UPDATE";

/// `(request_id, created_at, status, num_validators, fee_recipient)`
type RequestRow = (String, i64, String, i64, String);

/// `PostgreSQL`-backed request store.
#[derive(Clone)]
pub struct PostgresRequestStore {
    pool: PgPool,
}

impl PostgresRequestStore {
    /// Connects to `url` and creates the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection or schema setup fails.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(StoreError::unavailable)?;
        let store = Self::from_pool(pool);
        store.initialize().await?;
        Ok(store)
    }

    /// Wraps an existing pool. Call [`initialize`](Self::initialize) before use.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates tables and indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if any DDL statement fails.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(StoreError::unavailable)?;
        }
        info!("PostgreSQL schema ready");
        Ok(())
    }
}

fn row_to_request(row: RequestRow) -> Result<ValidatorRequest, StoreError> {
    let (request_id, created_at, status, num_validators, fee_recipient) = row;
    Ok(ValidatorRequest {
        request_id: RequestId::from(request_id),
        created_at,
        status: status.parse().map_err(StoreError::unavailable)?,
        num_keys: u32::try_from(num_validators)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                StoreError::unavailable(format!("invalid num_validators {num_validators}"))
            })?,
        fee_recipient,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

async fn lock_request(
    conn: &mut PgConnection,
    id: &RequestId,
) -> Result<ValidatorRequest, StoreError> {
    let row: Option<RequestRow> = sqlx::query_as(SELECT_REQUEST_FOR_UPDATE)
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(StoreError::unavailable)?;
    row.map(row_to_request)
        .transpose()?
        .ok_or_else(|| StoreError::NotFound(id.clone()))
}

async fn count_keys(conn: &mut PgConnection, id: &RequestId) -> Result<usize, StoreError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM validator_keys WHERE request_id = $1")
        .bind(id.as_str())
        .fetch_one(&mut *conn)
        .await
        .map_err(StoreError::unavailable)?;
    usize::try_from(count).map_err(StoreError::unavailable)
}

#[async_trait]
impl RequestStore for PostgresRequestStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn create(&self, request: &ValidatorRequest) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO validator_requests \
             (request_id, created_at, status, num_validators, fee_recipient) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(request.request_id.as_str())
        .bind(request.created_at)
        .bind(RequestStatus::Pending.as_str())
        .bind(i64::from(request.num_keys))
        .bind(&request.fee_recipient)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::AlreadyExists(request.request_id.clone())
            } else {
                StoreError::unavailable(e)
            }
        })?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: &RequestId,
        status: RequestStatus,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::unavailable)?;
        let request = lock_request(&mut tx, id).await?;
        let stored_keys = count_keys(&mut tx, id).await?;
        check_transition(&request, status, stored_keys)?;

        if status == RequestStatus::Failed && stored_keys > 0 {
            sqlx::query("DELETE FROM validator_keys WHERE request_id = $1")
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(StoreError::unavailable)?;
        }
        sqlx::query("UPDATE validator_requests SET status = $1 WHERE request_id = $2")
            .bind(status.as_str())
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::unavailable)?;

        tx.commit().await.map_err(StoreError::unavailable)
    }

    async fn add_keys(
        &self,
        id: &RequestId,
        keys: &[GeneratedKey],
        fee_recipient: &str,
    ) -> Result<(), StoreError> {
        // Dropping `tx` on any error path rolls the whole batch back.
        let mut tx = self.pool.begin().await.map_err(StoreError::unavailable)?;
        let request = lock_request(&mut tx, id).await?;
        let existing = count_keys(&mut tx, id).await?;
        check_batch(&request, existing, keys)?;

        for (position, key) in (0_i64..).zip(keys) {
            sqlx::query(
                "INSERT INTO validator_keys \
                 (key_id, request_id, key_material, fee_recipient, position) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&key.key_id)
            .bind(id.as_str())
            .bind(&key.material)
            .bind(fee_recipient)
            .bind(position)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::BatchRejected {
                        id: id.clone(),
                        reason: format!("key id already stored: {}", key.key_id),
                    }
                } else {
                    StoreError::unavailable(e)
                }
            })?;
        }

        tx.commit().await.map_err(StoreError::unavailable)
    }

    async fn read(&self, id: &RequestId) -> Result<RequestSnapshot, StoreError> {
        let row: Option<RequestRow> = sqlx::query_as(SELECT_REQUEST)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
        let request = row
            .map(row_to_request)
            .transpose()?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        let keys = if request.status == RequestStatus::Successful {
            let rows: Vec<(String,)> = sqlx::query_as(
                "SELECT key_id FROM validator_keys WHERE request_id = $1 ORDER BY position",
            )
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
            rows.into_iter().map(|(key_id,)| key_id).collect()
        } else {
            Vec::new()
        };
        Ok(RequestSnapshot { request, keys })
    }

    async fn stored_key_count(&self, id: &RequestId) -> Result<usize, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::unavailable)?;
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT request_id FROM validator_requests WHERE request_id = $1")
                .bind(id.as_str())
                .fetch_optional(&mut *conn)
                .await
                .map_err(StoreError::unavailable)?;
        if exists.is_none() {
            return Err(StoreError::NotFound(id.clone()));
        }
        count_keys(&mut conn, id).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(())
    }
}
