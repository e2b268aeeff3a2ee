//! Collection schema and the one-time schema setup

use std::fmt;

use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::error::{Error, Result};

/// Schema version written to `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

/// The five record collections of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Books,
    Songs,
    SongSources,
    Markers,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Books,
        Collection::Songs,
        Collection::SongSources,
        Collection::Markers,
        Collection::Settings,
    ];

    /// Backing SQLite table
    pub fn table(self) -> &'static str {
        match self {
            Collection::Books => "books",
            Collection::Songs => "songs",
            Collection::SongSources => "song_sources",
            Collection::Markers => "markers",
            Collection::Settings => "settings",
        }
    }

    /// Name used in logs and errors
    pub fn name(self) -> &'static str {
        match self {
            Collection::Books => "books",
            Collection::Songs => "songs",
            Collection::SongSources => "songSources",
            Collection::Markers => "markers",
            Collection::Settings => "settings",
        }
    }

    /// Whether records of this collection are JSON documents in a `data` column
    pub fn is_document(self) -> bool {
        !matches!(self, Collection::SongSources)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Create the collections on first use and check the stored schema version
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    let found: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;

    match found {
        0 => {
            create_collections(pool).await?;
            sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
                .execute(pool)
                .await?;
            info!("Created store schema version {}", SCHEMA_VERSION);
            Ok(())
        }
        SCHEMA_VERSION => Ok(()),
        other => Err(Error::StoreUnavailable(format!(
            "store schema version {other} is not supported (expected {SCHEMA_VERSION})"
        ))),
    }
}

async fn create_collections(pool: &Pool<Sqlite>) -> Result<()> {
    // Document collections: one JSON record per id
    for collection in Collection::ALL.into_iter().filter(|c| c.is_document()) {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY NOT NULL,
                data TEXT NOT NULL
            )",
            collection.table()
        ))
        .execute(pool)
        .await?;
    }

    // Binary audio stays out of the JSON collections
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS song_sources (
            id TEXT PRIMARY KEY NOT NULL,
            mime_type TEXT NOT NULL,
            payload BLOB NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
