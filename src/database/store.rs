//! Store connection and collection-scoped transactions

use std::str::FromStr;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, Transaction};
use tracing::{debug, info, warn};

use super::codec;
use super::models::SongSource;
use super::schema::{self, Collection};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// Access requested for a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
}

/// Process-wide handle to the local store
#[derive(Debug, Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Open (creating if needed) the database described by `config`
    pub async fn open(config: &EngineConfig) -> Result<Self> {
        let db_path = config.database_path();

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::StoreUnavailable(format!(
                    "failed to create data directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        // WAL keeps UI reads from being blocked by background writes
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::StoreUnavailable(format!("failed to open {}: {e}", db_path.display()))
            })?;

        info!("Opened store at {}", db_path.display());
        Self::initialize(pool).await
    }

    /// Open a private in-memory store. Every handle cloned from it sees the
    /// same data; dropping the last one discards it.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        // A memory database lives and dies with its connection, so pin one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        Self::initialize(pool).await
    }

    async fn initialize(pool: Pool<Sqlite>) -> Result<Self> {
        schema::run_migrations(&pool).await.map_err(|e| match e {
            Error::Sqlite(source) => Error::StoreUnavailable(source.to_string()),
            other => other,
        })?;
        Ok(Self { pool })
    }

    /// Open a transaction bound to `collections`.
    ///
    /// Read-write scopes take the write lock up front, so concurrent writers
    /// queue on the busy timeout instead of failing on lock upgrade.
    pub async fn begin(&self, collections: &[Collection], mode: Mode) -> Result<Scope> {
        let tx = match mode {
            Mode::ReadOnly => self.pool.begin().await?,
            Mode::ReadWrite => self.pool.begin_with("BEGIN IMMEDIATE").await?,
        };
        Ok(Scope {
            tx,
            collections: collections.to_vec(),
            mode,
        })
    }

    /// Run `body` inside a transaction over `collections`.
    ///
    /// `Ok` commits and `Err` rolls back. If `body` panics the scope is
    /// dropped, which also rolls back.
    ///
    /// ```ignore
    /// let song = store
    ///     .with_collections(&[Collection::Songs], Mode::ReadOnly, move |scope| {
    ///         async move { scope.get::<SongRecord>(Collection::Songs, &id).await }.boxed()
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_collections<T, F>(
        &self,
        collections: &[Collection],
        mode: Mode,
        body: F,
    ) -> Result<T>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut Scope) -> BoxFuture<'s, Result<T>> + Send,
    {
        let mut scope = self.begin(collections, mode).await?;
        match body(&mut scope).await {
            Ok(value) => {
                scope.commit().await?;
                Ok(value)
            }
            Err(err) => {
                scope.rollback().await;
                Err(err)
            }
        }
    }
}

/// An open transaction restricted to a set of collections
pub struct Scope {
    tx: Transaction<'static, Sqlite>,
    collections: Vec<Collection>,
    mode: Mode,
}

impl Scope {
    fn check(&self, collection: Collection, write: bool) -> Result<()> {
        if !self.collections.contains(&collection) {
            return Err(Error::OutOfScope(collection));
        }
        if write && self.mode == Mode::ReadOnly {
            return Err(Error::ReadOnlyScope(collection));
        }
        Ok(())
    }

    /// Raw stored document, undecoded
    pub async fn get_raw(&mut self, collection: Collection, id: &str) -> Result<Option<String>> {
        self.check(collection, false)?;
        let sql = format!("SELECT data FROM {} WHERE id = ?", collection.table());
        let raw = sqlx::query_scalar::<_, String>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(raw)
    }

    /// Decoded document; a record that fails to decode is `CorruptRecord`
    pub async fn get<T: DeserializeOwned>(
        &mut self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<T>> {
        match self.get_raw(collection, id).await? {
            Some(raw) => codec::decode(collection, id, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Insert or overwrite a document
    pub async fn put<T: Serialize>(&mut self, collection: Collection, id: &str, value: &T) -> Result<()> {
        self.check(collection, true)?;
        let data = codec::encode(collection, id, value)?;
        let sql = format!(
            "INSERT INTO {} (id, data) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            collection.table()
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(&data)
            .execute(&mut *self.tx)
            .await?;
        debug!("put {}/{}", collection, id);
        Ok(())
    }

    /// Insert a document only if `id` is free. Returns whether it was written.
    pub async fn insert_new<T: Serialize>(
        &mut self,
        collection: Collection,
        id: &str,
        value: &T,
    ) -> Result<bool> {
        self.check(collection, true)?;
        let data = codec::encode(collection, id, value)?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} (id, data) VALUES (?, ?)",
            collection.table()
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .bind(&data)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn contains(&mut self, collection: Collection, id: &str) -> Result<bool> {
        self.check(collection, false)?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", collection.table());
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(count > 0)
    }

    /// Delete one record. Returns whether it existed.
    pub async fn delete(&mut self, collection: Collection, id: &str) -> Result<bool> {
        self.check(collection, true)?;
        let sql = format!("DELETE FROM {} WHERE id = ?", collection.table());
        let result = sqlx::query(&sql)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every record of a collection
    pub async fn clear(&mut self, collection: Collection) -> Result<u64> {
        self.check(collection, true)?;
        let sql = format!("DELETE FROM {}", collection.table());
        let result = sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    /// Record ids in insertion order
    pub async fn keys(&mut self, collection: Collection) -> Result<Vec<String>> {
        self.check(collection, false)?;
        let sql = format!("SELECT id FROM {} ORDER BY rowid", collection.table());
        let keys = sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(keys)
    }

    pub async fn get_source(&mut self, id: &str) -> Result<Option<SongSource>> {
        self.check(Collection::SongSources, false)?;
        let row = sqlx::query_as::<_, (String, Vec<u8>)>(
            "SELECT mime_type, payload FROM song_sources WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|(mime_type, payload)| SongSource {
            id: id.to_string(),
            payload,
            mime_type,
        }))
    }

    pub async fn put_source(&mut self, source: &SongSource) -> Result<()> {
        self.check(Collection::SongSources, true)?;
        sqlx::query(
            r#"
            INSERT INTO song_sources (id, mime_type, payload) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET mime_type = excluded.mime_type, payload = excluded.payload
            "#,
        )
        .bind(&source.id)
        .bind(&source.mime_type)
        .bind(&source.payload)
        .execute(&mut *self.tx)
        .await?;
        debug!("put songSources/{} ({} bytes)", source.id, source.payload.len());
        Ok(())
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) {
        if let Err(e) = self.tx.rollback().await {
            warn!("Failed to roll back transaction: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Book;
    use futures_util::FutureExt;

    #[tokio::test]
    async fn test_schema_is_created_once() {
        let store = Store::open_in_memory().await.unwrap();
        schema::run_migrations(&store.pool).await.unwrap();

        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_newer_schema_version_is_unavailable() {
        let store = Store::open_in_memory().await.unwrap();
        sqlx::query("PRAGMA user_version = 7")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = schema::run_migrations(&store.pool).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_scope_commits_on_ok() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .with_collections(&[Collection::Books], Mode::ReadWrite, |scope| {
                async move { scope.put(Collection::Books, "b1", &Book::new("b1")).await }.boxed()
            })
            .await
            .unwrap();

        let book = store
            .with_collections(&[Collection::Books], Mode::ReadOnly, |scope| {
                async move { scope.get::<Book>(Collection::Books, "b1").await }.boxed()
            })
            .await
            .unwrap();
        assert_eq!(book, Some(Book::new("b1")));
    }

    #[tokio::test]
    async fn test_scope_rolls_back_on_err() {
        let store = Store::open_in_memory().await.unwrap();
        let result: Result<()> = store
            .with_collections(&[Collection::Books], Mode::ReadWrite, |scope| {
                async move {
                    scope.put(Collection::Books, "b1", &Book::new("b1")).await?;
                    Err(Error::constraint("abort"))
                }
                .boxed()
            })
            .await;
        assert!(matches!(result, Err(Error::ConstraintViolation(_))));

        let mut scope = store.begin(&[Collection::Books], Mode::ReadOnly).await.unwrap();
        assert!(!scope.contains(Collection::Books, "b1").await.unwrap());
    }

    #[tokio::test]
    async fn test_dropped_scope_rolls_back() {
        let store = Store::open_in_memory().await.unwrap();
        {
            let mut scope = store.begin(&[Collection::Books], Mode::ReadWrite).await.unwrap();
            scope.put(Collection::Books, "b1", &Book::new("b1")).await.unwrap();
        }

        let mut scope = store.begin(&[Collection::Books], Mode::ReadOnly).await.unwrap();
        assert!(scope.keys(Collection::Books).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scope_rejects_other_collections_and_readonly_writes() {
        let store = Store::open_in_memory().await.unwrap();
        let mut scope = store.begin(&[Collection::Songs], Mode::ReadOnly).await.unwrap();

        let err = scope.get_raw(Collection::Markers, "m1").await.unwrap_err();
        assert!(matches!(err, Error::OutOfScope(Collection::Markers)));

        let err = scope.delete(Collection::Songs, "s1").await.unwrap_err();
        assert!(matches!(err, Error::ReadOnlyScope(Collection::Songs)));
    }

    #[tokio::test]
    async fn test_insert_new_does_not_overwrite() {
        let store = Store::open_in_memory().await.unwrap();
        let mut scope = store.begin(&[Collection::Books], Mode::ReadWrite).await.unwrap();

        let mut book = Book::new("b1");
        assert!(scope.insert_new(Collection::Books, "b1", &book).await.unwrap());
        book.song_refs.push("x".into());
        assert!(!scope.insert_new(Collection::Books, "b1", &book).await.unwrap());

        let stored: Book = scope.get(Collection::Books, "b1").await.unwrap().unwrap();
        assert!(stored.song_refs.is_empty());
        scope.commit().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_writers_queue_behind_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let store = Store::open(&config).await.unwrap();

        let mut first = store.begin(&[Collection::Books], Mode::ReadWrite).await.unwrap();
        first.put(Collection::Books, "b1", &Book::new("b1")).await.unwrap();

        let other = store.clone();
        let second = tokio::spawn(async move {
            let mut scope = other.begin(&[Collection::Books], Mode::ReadWrite).await?;
            let saw_first = scope.contains(Collection::Books, "b1").await?;
            scope.put(Collection::Books, "b2", &Book::new("b2")).await?;
            scope.commit().await?;
            Ok::<_, Error>(saw_first)
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        first.commit().await.unwrap();

        // the second writer only starts once the first has committed
        assert!(second.await.unwrap().unwrap());
        let mut scope = store.begin(&[Collection::Books], Mode::ReadOnly).await.unwrap();
        assert_eq!(
            scope.keys(Collection::Books).await.unwrap(),
            vec!["b1".to_string(), "b2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_source_payload_is_stored_as_is() {
        let store = Store::open_in_memory().await.unwrap();
        let source = SongSource {
            id: "intro".into(),
            payload: (0u8..=255).collect(),
            mime_type: "audio/flac".into(),
        };

        let mut scope = store
            .begin(&[Collection::SongSources], Mode::ReadWrite)
            .await
            .unwrap();
        scope.put_source(&source).await.unwrap();
        assert_eq!(scope.get_source("intro").await.unwrap(), Some(source));
        assert_eq!(scope.get_source("other").await.unwrap(), None);
    }
}
