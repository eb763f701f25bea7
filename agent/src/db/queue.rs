//! Durable copy of the pending-write queue.

use moi_engine::{LocalId, PendingWrite, RecordId};
use sqlx::Row;

use super::Pool;
use crate::error::{AppError, Result};

/// What a previous session left behind.
#[derive(Debug, Default)]
pub struct PersistedQueue {
    /// Queued writes in FIFO order.
    pub writes: Vec<PendingWrite>,
    /// Remote ids of records first created offline.
    pub ids: Vec<(LocalId, RecordId)>,
}

/// SQLite-backed queue store. Rows are keyed by the write's local id.
#[derive(Debug, Clone)]
pub struct QueueStore {
    pool: Pool,
}

impl QueueStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Load the persisted queue and id map.
    pub async fn load(&self) -> Result<PersistedQueue> {
        let rows = sqlx::query("SELECT local_id, body FROM pending_writes ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut writes = Vec::with_capacity(rows.len());
        for row in rows {
            let local_id: String = row.try_get("local_id")?;
            let body: String = row.try_get("body")?;
            let write: PendingWrite = serde_json::from_str(&body).map_err(|e| {
                AppError::Internal(format!("corrupt queued write {local_id}: {e}"))
            })?;
            writes.push(write);
        }

        let rows = sqlx::query("SELECT local_id, record_id FROM id_map")
            .fetch_all(&self.pool)
            .await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let local_id: String = row.try_get("local_id")?;
            let record_id: String = row.try_get("record_id")?;
            match local_id.parse::<LocalId>() {
                Ok(local_id) => ids.push((local_id, record_id)),
                Err(e) => tracing::warn!(local_id = %local_id, "Skipping id map row: {}", e),
            }
        }

        Ok(PersistedQueue { writes, ids })
    }

    /// Append `write` at the tail.
    pub async fn insert(&self, write: &PendingWrite) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_writes (local_id, collection, retry_count, created_at, body)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (local_id) DO NOTHING
            "#,
        )
        .bind(write.local_id().to_string())
        .bind(write.collection().as_str())
        .bind(i64::from(write.retry_count()))
        .bind(write.created_at() as i64)
        .bind(encode(write)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store the new retry count of a requeued write, keeping its position.
    pub async fn update(&self, write: &PendingWrite) -> Result<()> {
        sqlx::query("UPDATE pending_writes SET retry_count = ?, body = ? WHERE local_id = ?")
            .bind(i64::from(write.retry_count()))
            .bind(encode(write)?)
            .bind(write.local_id().to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Drop the row of a write that left the queue.
    pub async fn remove(&self, local_id: &LocalId) -> Result<()> {
        sqlx::query("DELETE FROM pending_writes WHERE local_id = ?")
            .bind(local_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Remember the remote id assigned to a record created offline.
    pub async fn save_id(&self, local_id: &LocalId, id: &RecordId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO id_map (local_id, record_id) VALUES (?, ?)
            ON CONFLICT (local_id) DO UPDATE SET record_id = excluded.record_id
            "#,
        )
        .bind(local_id.to_string())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Forget everything (session end).
    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM pending_writes")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM id_map").execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Number of queued rows.
    pub async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_writes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

fn encode(write: &PendingWrite) -> Result<String> {
    serde_json::to_string(write).map_err(|e| AppError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, run_migrations};
    use moi_engine::RecordRef;
    use serde_json::json;

    async fn store() -> QueueStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        QueueStore::new(pool)
    }

    fn create(n: u64) -> PendingWrite {
        PendingWrite::create(LocalId::new(n), "participants", json!({ "n": n }), n).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_keeps_order() {
        let store = store().await;
        let writes: Vec<_> = (1..=3).map(create).collect();
        for write in &writes {
            store.insert(write).await.unwrap();
        }

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.writes, writes);
        assert!(loaded.ids.is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_update() {
        let store = store().await;
        let first = create(1);
        let second = PendingWrite::update(
            LocalId::new(2),
            "participants",
            RecordRef::Local(first.local_id().clone()),
            json!({ "n": 2 }),
            2,
        )
        .unwrap();
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        store.remove(first.local_id()).await.unwrap();
        store.save_id(first.local_id(), &"participants_9".to_string()).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.writes, vec![second]);
        assert_eq!(
            loaded.ids,
            vec![(first.local_id().clone(), "participants_9".to_string())]
        );
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_ignored() {
        let store = store().await;
        let write = create(1);
        store.insert(&write).await.unwrap();
        store.insert(&write).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = store().await;
        store.insert(&create(1)).await.unwrap();
        store
            .save_id(&LocalId::new(1), &"participants_1".to_string())
            .await
            .unwrap();

        store.clear().await.unwrap();

        let loaded = store.load().await.unwrap();
        assert!(loaded.writes.is_empty());
        assert!(loaded.ids.is_empty());
    }
}
