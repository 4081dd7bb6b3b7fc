//! Record persistence using SQLite.
//!
//! Every collection lives in one `records` table as JSON documents keyed by
//! `(collection, id)`. rusqlite is blocking, so each call runs on the
//! blocking pool; the connection mutex is never held across an await.

use super::StateStore;
use crate::error::StoreError;
use crate::model::Record;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// SQLite-backed store for one collection.
pub struct SqliteStore<E: Record> {
    conn: Arc<Mutex<Connection>>,
    _record: PhantomData<fn() -> E>,
}

impl<E: Record> SqliteStore<E> {
    /// Opens (or creates) the database and ensures the table exists.
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path).map_err(|e| {
            StoreError::Connection(format!("Failed to open state DB at {}: {}", db_path, e))
        })?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id         TEXT NOT NULL,
                body       TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );",
        )
        .map_err(|e| StoreError::Backend(format!("Failed to create records table: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            _record: PhantomData,
        })
    }

    /// Store for another collection over the same connection.
    pub fn share<F: Record>(&self) -> SqliteStore<F> {
        SqliteStore {
            conn: Arc::clone(&self.conn),
            _record: PhantomData,
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("state DB mutex poisoned".to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {}", e)))?
    }
}

fn decode<E: Record>(id: &str, body: &str) -> Result<E, StoreError> {
    serde_json::from_str(body).map_err(|e| {
        StoreError::Serialisation(format!("{} '{}' is not a valid document: {}", E::COLLECTION, id, e))
    })
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl<E: Record> StateStore<E> for SqliteStore<E> {
    async fn find_all(&self) -> Result<Vec<E>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, body FROM records WHERE collection = ?1 ORDER BY id ASC")
                .map_err(backend)?;
            let rows = stmt
                .query_map(params![E::COLLECTION], |row| {
                    let id: String = row.get(0)?;
                    let body: String = row.get(1)?;
                    Ok((id, body))
                })
                .map_err(backend)?;

            let mut records = Vec::new();
            for row in rows {
                let (id, body) = row.map_err(backend)?;
                records.push(decode::<E>(&id, &body)?);
            }
            Ok(records)
        })
        .await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<E>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
                    params![E::COLLECTION, id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;

            body.map(|b| decode::<E>(&id, &b)).transpose()
        })
        .await
    }

    async fn save(&self, entity: &E) -> Result<(), StoreError> {
        let id = entity.id().to_string();
        let body =
            serde_json::to_string(entity).map_err(|e| StoreError::Serialisation(e.to_string()))?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO records (collection, id, body, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (collection, id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                params![E::COLLECTION, id, body, Utc::now().to_rfc3339()],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                    params![E::COLLECTION, id],
                )
                .map_err(backend)?;
            Ok(removed > 0)
        })
        .await
    }
}
