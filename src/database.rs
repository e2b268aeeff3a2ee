//! Local persistence for books, songs, markers, settings and tags
//! Uses SQLite via sqlx, one table per collection

pub mod codec;
mod models;
pub mod ops;
mod repository;
mod schema;
mod store;

pub use models::*;
pub use ops::{BookDocument, MarkerDocument, SongDocument};
pub use repository::SyncManager;
pub use schema::{Collection, SCHEMA_VERSION};
pub use store::{Mode, Scope, Store};
