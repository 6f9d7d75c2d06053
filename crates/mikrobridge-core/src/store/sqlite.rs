//! SQLite-backed store implementation.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};

use crate::error::BridgeError;

use super::{InboxRecord, InsertOutcome, NewOutboxJob, OutboxJob, QueueCounts, Store};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool. Migrations must already have
    /// run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a database file path.
    ///
    /// Creates parent directories and the database file as needed, connects
    /// in WAL mode so the loops and the ingress can write concurrently, and
    /// runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| BridgeError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| BridgeError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| BridgeError::Database {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }
}

async fn insert_job(
    executor: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
    job: &NewOutboxJob,
    now: DateTime<Utc>,
) -> Result<i64, BridgeError> {
    let headers_json = serde_json::to_string(&job.headers)?;
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO outbox (method, url, headers_json, body, idempotency_key, correlation_id,
                            retry_count, next_attempt_ts, state, created_ts, updated_ts, last_status)
        VALUES (?, ?, ?, ?, ?, ?, 0, ?, 'pending', ?, ?, 0)
        RETURNING id
        "#,
    )
    .bind(&job.method)
    .bind(&job.url)
    .bind(&headers_json)
    .bind(&job.body)
    .bind(&job.idempotency_key)
    .bind(&job.correlation_id)
    .bind(job.next_attempt_ts)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

#[async_trait::async_trait]
impl Store for SqliteStore {
    async fn inbox_insert(
        &self,
        key: &str,
        source: Option<&str>,
        payload: &[u8],
    ) -> Result<InsertOutcome, BridgeError> {
        let now = Utc::now();

        // Empty keys never dedupe; store them as NULL so the unique index
        // ignores them.
        if key.is_empty() {
            let id = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO inbox (idempotency_key, source, payload, state, created_ts, updated_ts)
                VALUES (NULL, ?, ?, 'pending', ?, ?)
                RETURNING id
                "#,
            )
            .bind(source)
            .bind(payload)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;

            return Ok(InsertOutcome { stored: true, id });
        }

        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO inbox (idempotency_key, source, payload, state, created_ts, updated_ts)
            VALUES (?, ?, ?, 'pending', ?, ?)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(key)
        .bind(source)
        .bind(payload)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(id) => Ok(InsertOutcome { stored: true, id }),
            None => {
                let id = sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM inbox WHERE idempotency_key = ?",
                )
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
                Ok(InsertOutcome { stored: false, id })
            }
        }
    }

    async fn inbox_claim_next(&self) -> Result<Option<InboxRecord>, BridgeError> {
        // Single statement: select-then-update races are impossible.
        let record = sqlx::query_as::<_, InboxRecord>(
            r#"
            UPDATE inbox
            SET state = 'processing', updated_ts = ?1
            WHERE id = (
                SELECT id FROM inbox
                WHERE state = 'pending'
                ORDER BY created_ts ASC, id ASC
                LIMIT 1
            )
            RETURNING id, idempotency_key, source, payload, state,
                      created_ts, updated_ts, last_error
            "#,
        )
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn inbox_mark_done(&self, id: i64) -> Result<(), BridgeError> {
        sqlx::query("UPDATE inbox SET state = 'done', updated_ts = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn inbox_mark_failed(&self, id: i64, error: &str) -> Result<(), BridgeError> {
        sqlx::query(
            "UPDATE inbox SET state = 'failed', last_error = ?, updated_ts = ? WHERE id = ?",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn inbox_release(&self, id: i64, error: &str) -> Result<(), BridgeError> {
        sqlx::query(
            r#"
            UPDATE inbox
            SET state = 'pending', last_error = ?, updated_ts = ?
            WHERE id = ? AND state = 'processing'
            "#,
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn outbox_insert(&self, job: &NewOutboxJob) -> Result<i64, BridgeError> {
        insert_job(&self.pool, job, Utc::now()).await
    }

    async fn outbox_complete_inbox(
        &self,
        inbox_id: i64,
        jobs: &[NewOutboxJob],
    ) -> Result<(), BridgeError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        for job in jobs {
            insert_job(&mut *tx, job, now).await?;
        }

        sqlx::query(
            "UPDATE inbox SET state = 'done', updated_ts = ? WHERE id = ? AND state = 'processing'",
        )
        .bind(now)
        .bind(inbox_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn outbox_claim_next_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxJob>, BridgeError> {
        let job = sqlx::query_as::<_, OutboxJob>(
            r#"
            UPDATE outbox
            SET state = 'sending', updated_ts = ?2
            WHERE id = (
                SELECT id FROM outbox
                WHERE state = 'pending' AND next_attempt_ts <= ?1
                ORDER BY next_attempt_ts ASC, retry_count ASC, created_ts ASC, id ASC
                LIMIT 1
            )
            RETURNING id, method, url, headers_json, body, idempotency_key, correlation_id,
                      retry_count, next_attempt_ts, state, created_ts, updated_ts,
                      last_status, last_error
            "#,
        )
        .bind(now)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn outbox_reschedule(
        &self,
        id: i64,
        retry_count: i64,
        next_attempt_ts: DateTime<Utc>,
        last_error: &str,
        last_status: i64,
    ) -> Result<(), BridgeError> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET state = 'pending', retry_count = ?, next_attempt_ts = ?,
                last_error = ?, last_status = ?, updated_ts = ?
            WHERE id = ?
            "#,
        )
        .bind(retry_count)
        .bind(next_attempt_ts)
        .bind(last_error)
        .bind(last_status)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn outbox_mark_done(&self, id: i64, last_status: i64) -> Result<(), BridgeError> {
        sqlx::query(
            "UPDATE outbox SET state = 'done', last_status = ?, updated_ts = ? WHERE id = ?",
        )
        .bind(last_status)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn outbox_mark_permanent(
        &self,
        id: i64,
        reason: &str,
        last_status: i64,
    ) -> Result<(), BridgeError> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET state = 'failed_permanent', last_error = ?, last_status = ?, updated_ts = ?
            WHERE id = ?
            "#,
        )
        .bind(reason)
        .bind(last_status)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn outbox_get(&self, id: i64) -> Result<Option<OutboxJob>, BridgeError> {
        let job = sqlx::query_as::<_, OutboxJob>(
            r#"
            SELECT id, method, url, headers_json, body, idempotency_key, correlation_id,
                   retry_count, next_attempt_ts, state, created_ts, updated_ts,
                   last_status, last_error
            FROM outbox
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn counts(&self) -> Result<QueueCounts, BridgeError> {
        let inbox_pending = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM inbox WHERE state = 'pending'",
        )
        .fetch_one(&self.pool)
        .await?;

        let outbox_pending = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM outbox WHERE state = 'pending'",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueCounts {
            inbox_pending,
            outbox_pending,
        })
    }

    async fn recover_inflight(&self) -> Result<u64, BridgeError> {
        let now = Utc::now();

        let inbox = sqlx::query(
            "UPDATE inbox SET state = 'pending', updated_ts = ? WHERE state = 'processing'",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        let outbox = sqlx::query(
            "UPDATE outbox SET state = 'pending', updated_ts = ? WHERE state = 'sending'",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(inbox.rows_affected() + outbox.rows_affected())
    }
}
