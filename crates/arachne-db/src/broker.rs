use std::time::Duration;

use arachne_core::broker::{Broker, StreamEntry};
use arachne_core::error::AppError;
use sqlx::postgres::PgListener;
use sqlx::{PgPool, Pool, Postgres};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// PostgreSQL-backed broker.
///
/// Counters and flags live in `broker_kv`, the dedup set in `broker_sets`
/// (a primary-key insert is the atomic set-add), queues in `broker_queue`
/// popped with `FOR UPDATE SKIP LOCKED`, results in `broker_stream`, and the
/// control channel rides on `LISTEN/NOTIFY`.
#[derive(Clone)]
pub struct PgBroker {
    pool: Pool<Postgres>,
    poll_interval: Duration,
}

impl PgBroker {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// How often a blocking pop re-checks an empty queue.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn try_pop(&self, queue: &str) -> Result<Option<String>, AppError> {
        sqlx::query_scalar::<_, String>(
            r#"
            DELETE FROM broker_queue
            WHERE id = (
                SELECT id FROM broker_queue
                WHERE queue_key = $1
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING payload
            "#,
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await
        .map_err(broker_error)
    }
}

fn broker_error(e: sqlx::Error) -> AppError {
    AppError::BrokerError(e.to_string())
}

impl Broker for PgBroker {
    async fn incr(&self, key: &str) -> Result<i64, AppError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO broker_kv (key, value) VALUES ($1, '1')
            ON CONFLICT (key) DO UPDATE
            SET value = (broker_kv.value::BIGINT + 1)::TEXT
            RETURNING value::BIGINT
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await
        .map_err(broker_error)
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO broker_sets (set_key, member) VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(set)
        .bind(member)
        .execute(&self.pool)
        .await
        .map_err(broker_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS(SELECT 1 FROM broker_sets WHERE set_key = $1 AND member = $2)"#,
        )
        .bind(set)
        .bind(member)
        .fetch_one(&self.pool)
        .await
        .map_err(broker_error)
    }

    async fn set_card(&self, set: &str) -> Result<u64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM broker_sets WHERE set_key = $1"#)
                .bind(set)
                .fetch_one(&self.pool)
                .await
                .map_err(broker_error)?;

        Ok(count as u64)
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<(), AppError> {
        sqlx::query(r#"INSERT INTO broker_queue (queue_key, payload) VALUES ($1, $2)"#)
            .bind(queue)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(broker_error)?;

        Ok(())
    }

    async fn pop_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, AppError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.try_pop(queue).await? {
                return Ok(Some(payload));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::time::sleep(remaining.min(self.poll_interval)).await;
        }
    }

    async fn queue_len(&self, queue: &str) -> Result<u64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM broker_queue WHERE queue_key = $1"#)
                .bind(queue)
                .fetch_one(&self.pool)
                .await
                .map_err(broker_error)?;

        Ok(count as u64)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<(), AppError> {
        sqlx::query(r#"SELECT pg_notify($1, $2)"#)
            .bind(channel)
            .bind(message)
            .execute(&self.pool)
            .await
            .map_err(broker_error)?;

        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::UnboundedReceiver<String>, AppError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(broker_error)?;
        listener.listen(channel).await.map_err(broker_error)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tx.closed() => break,
                    next = listener.try_recv() => match next {
                        Ok(Some(notification)) => {
                            let _ = tx.send(notification.payload().to_string());
                        }
                        // Connection lost: close the receiver so the caller resubscribes.
                        Ok(None) => {
                            tracing::warn!(%channel, "Listener connection lost");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(%channel, error = %e, "Listener failed");
                            break;
                        }
                    },
                }
            }
        });

        Ok(rx)
    }

    async fn stream_append(&self, stream: &str, payload: &str) -> Result<u64, AppError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO broker_stream (stream_key, payload) VALUES ($1, $2) RETURNING id"#,
        )
        .bind(stream)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(broker_error)?;

        Ok(id as u64)
    }

    async fn stream_range(&self, stream: &str) -> Result<Vec<StreamEntry>, AppError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"SELECT id, payload FROM broker_stream WHERE stream_key = $1 ORDER BY id"#,
        )
        .bind(stream)
        .fetch_all(&self.pool)
        .await
        .map_err(broker_error)?;

        Ok(rows
            .into_iter()
            .map(|(id, payload)| StreamEntry {
                id: id as u64,
                payload,
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        sqlx::query_scalar::<_, String>(r#"SELECT value FROM broker_kv WHERE key = $1"#)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(broker_error)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO broker_kv (key, value) VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(broker_error)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(broker_error)?;
        for statement in [
            r#"DELETE FROM broker_kv WHERE key = $1"#,
            r#"DELETE FROM broker_sets WHERE set_key = $1"#,
            r#"DELETE FROM broker_queue WHERE queue_key = $1"#,
            r#"DELETE FROM broker_stream WHERE stream_key = $1"#,
        ] {
            sqlx::query(statement)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(broker_error)?;
        }
        tx.commit().await.map_err(broker_error)?;
        Ok(())
    }
}
