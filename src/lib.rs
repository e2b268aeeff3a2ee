//! Songmarks - local persistence and sync engine for a song practice workspace
//!
//! A book lists songs, songs carry binary audio and time-coded markers,
//! markers carry tags. Everything lives in an embedded SQLite store that
//! heals dangling references on read.

pub mod config;
pub mod database;
pub mod error;
pub mod tags;

pub use config::EngineConfig;
pub use database::{
    Book, Hydrated, ImportSummary, LoadedBook, Marker, MarkerField, Settings, Song, SongField,
    SongSource, SourceType, SyncManager, Theme, Warning,
};
pub use error::{Error, Result};
pub use tags::TagIndex;
