//! SyncManager - main entry point of the engine
//! Delegates to ops modules for actual operations

use parking_lot::RwLock;
use tracing::{error, info, warn};

use super::ops::{self, BookDocument};
use super::store::Store;
use super::{Hydrated, ImportSummary, LoadedBook, Marker, MarkerField, Settings, Song, SongField};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::tags::TagIndex;

/// Persistence engine for one workspace
///
/// Holds the store handle, the id of the active book and the tag index of
/// that book, kept current by the marker and tag operations. Without a
/// store (it could not be opened) the engine is detached: reads come back
/// empty and writes fail with `StoreUnavailable`.
#[derive(Debug)]
pub struct SyncManager {
    store: Option<Store>,
    book_id: RwLock<Option<String>>,
    tags: RwLock<TagIndex>,
}

impl SyncManager {
    /// Open the store described by `config`, degrading to a detached engine
    pub async fn open(config: &EngineConfig) -> Self {
        match Self::try_open(config).await {
            Ok(manager) => manager,
            Err(e) => {
                error!("Persistence disabled for this session: {}", e);
                Self::detached()
            }
        }
    }

    pub async fn try_open(config: &EngineConfig) -> Result<Self> {
        Ok(Self::with_store(Store::open(config).await?))
    }

    /// Engine over a fresh in-memory store
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::with_store(Store::open_in_memory().await?))
    }

    pub fn with_store(store: Store) -> Self {
        Self {
            store: Some(store),
            book_id: RwLock::new(None),
            tags: RwLock::new(TagIndex::default()),
        }
    }

    pub fn detached() -> Self {
        Self {
            store: None,
            book_id: RwLock::new(None),
            tags: RwLock::new(TagIndex::default()),
        }
    }

    /// Whether changes reach the store
    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Active book id, known after the first load
    pub fn book_id(&self) -> Option<String> {
        self.book_id.read().clone()
    }

    /// Snapshot of the tag index of the active book
    pub fn tag_index(&self) -> TagIndex {
        self.tags.read().clone()
    }

    pub fn store(&self) -> Result<&Store> {
        self.store
            .as_ref()
            .ok_or_else(|| Error::StoreUnavailable("engine is running without a store".into()))
    }

    fn set_book_id(&self, id: Option<String>) {
        *self.book_id.write() = id;
    }

    /// Id of the active book, picking or creating one if none is active
    async fn active_book_id(&self) -> Result<String> {
        if let Some(id) = self.book_id() {
            return Ok(id);
        }

        let store = self.store()?;
        let id = match ops::first_book_id(store).await? {
            Some(id) => id,
            None => {
                let id = ops::generate_id("book");
                ops::create_book(store, &id).await?;
                id
            }
        };
        self.set_book_id(Some(id.clone()));
        Ok(id)
    }

    // ============ Book Operations ============

    /// Returns whether a new book was created
    pub async fn create_book(&self, id: &str) -> Result<bool> {
        ops::create_book(self.store()?, id).await
    }

    /// Remove the book record; its songs stay reachable by id
    pub async fn delete_book(&self, id: &str) -> Result<bool> {
        let removed = ops::delete_book(self.store()?, id).await?;
        if self.book_id().as_deref() == Some(id) {
            self.set_book_id(None);
        }
        Ok(removed)
    }

    /// Load book `id` (or the first book) and make it active.
    ///
    /// A store failure yields an empty workspace instead of an error.
    pub async fn load_book(&self, id: Option<&str>) -> LoadedBook {
        let Some(store) = &self.store else {
            warn!("No store, starting with an empty workspace");
            return LoadedBook::default();
        };

        match ops::load_book(store, id).await {
            Ok(loaded) => {
                self.set_book_id(loaded.book_id.clone());
                *self.tags.write() = loaded.tags.clone();
                loaded
            }
            Err(e) => {
                error!("Failed to load book: {}", e);
                LoadedBook::default()
            }
        }
    }

    // ============ Song Operations ============

    /// Store a new song and append it to the active book. Returns the
    /// stored id, derived from the title when `song.id` is blank.
    pub async fn create_song(&self, song: &Song) -> Result<String> {
        let book_id = self.active_book_id().await?;
        let id = ops::create_song(self.store()?, &book_id, song).await?;

        let mut tags = self.tags.write();
        for marker in &song.markers {
            tags.index_marker(marker);
        }
        Ok(id)
    }

    /// Hydrated song; `None` also drops the id from the active book
    pub async fn get_song(&self, id: &str) -> Result<Option<Hydrated>> {
        let store = self.store()?;
        let hydrated = ops::fetch_song(store, id).await?;

        if hydrated.is_none() {
            if let Some(book_id) = self.book_id() {
                match ops::remove_song_refs(store, &book_id, &[id.to_string()]).await {
                    Ok(0) => {}
                    Ok(_) => info!("Removed missing song {} from book {}", id, book_id),
                    Err(e) => warn!("Failed to unlink missing song {}: {}", id, e),
                }
            }
        }
        Ok(hydrated)
    }

    pub async fn delete_song(&self, song: &Song) -> Result<()> {
        let book_id = self.active_book_id().await?;
        ops::delete_song(self.store()?, Some(&book_id), song).await?;

        let mut tags = self.tags.write();
        for marker_id in song.marker_refs.iter().chain(song.markers.iter().map(|m| &m.id)) {
            tags.forget_marker(marker_id);
        }
        Ok(())
    }

    pub async fn update_song_field(&self, song: &Song, field: SongField) -> Result<()> {
        ops::update_song_field(self.store()?, &song.id, field).await
    }

    // ============ Marker Operations ============

    pub async fn create_marker(&self, marker: &Marker) -> Result<()> {
        ops::create_marker(self.store()?, marker).await?;
        self.tags.write().index_marker(marker);
        Ok(())
    }

    pub async fn get_marker(&self, song_id: &str, id: &str) -> Result<Marker> {
        ops::get_marker(self.store()?, song_id, id).await
    }

    pub async fn delete_marker(&self, marker: &Marker) -> Result<()> {
        ops::delete_marker(self.store()?, marker).await?;
        self.tags.write().forget_marker(&marker.id);
        Ok(())
    }

    /// `marker` is the caller's copy before the change; its tags are what the
    /// index is moved away from when the tags change
    pub async fn update_marker_field(&self, marker: &Marker, field: MarkerField) -> Result<()> {
        let new_tags = match &field {
            MarkerField::Tags(tags) => Some(tags.clone()),
            _ => None,
        };
        ops::update_marker_field(self.store()?, marker, field).await?;

        if let Some(new_tags) = new_tags {
            let mut tags = self.tags.write();
            for name in marker.tags.difference(&new_tags) {
                tags.unapply(name, &marker.id);
            }
            for name in &new_tags {
                tags.apply(name, &marker.id);
            }
        }
        Ok(())
    }

    // ============ Tag Operations ============

    pub async fn create_tag(&self, name: &str) -> Result<()> {
        ops::create_tag(self.store()?, name).await?;
        self.tags.write().insert_name(name);
        Ok(())
    }

    /// `detached` are the markers the caller already removed `name` from,
    /// usually the output of [`crate::TagIndex::detach`]
    pub async fn delete_tag(&self, name: &str, detached: &[Marker]) -> Result<()> {
        ops::delete_tag(self.store()?, name, detached).await?;
        self.tags.write().remove_name(name);
        Ok(())
    }

    pub async fn list_tags(&self) -> Result<Vec<String>> {
        ops::list_tags(self.store()?).await
    }

    // ============ Settings Operations ============

    /// Stored settings, or defaults when nothing can be read
    pub async fn load_settings(&self) -> Settings {
        let Some(store) = &self.store else {
            return Settings::default();
        };

        ops::load_settings(store).await.unwrap_or_else(|e| {
            error!("Failed to load settings: {}", e);
            Settings::default()
        })
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        ops::save_settings(self.store()?, settings).await
    }

    // ============ Import / Export ============

    /// Replace the workspace with the book in `text` and make it active.
    /// The tag index is rebuilt from the imported book.
    pub async fn import_book(&self, text: &str) -> Result<ImportSummary> {
        let store = self.store()?;
        let summary = ops::import_book(store, text).await?;
        self.set_book_id(Some(summary.book_id.clone()));

        match ops::load_book(store, Some(&summary.book_id)).await {
            Ok(loaded) => *self.tags.write() = loaded.tags,
            Err(e) => {
                warn!("Failed to rebuild tag index after import: {}", e);
                *self.tags.write() = TagIndex::default();
            }
        }
        Ok(summary)
    }

    pub async fn export_book(&self, book_id: &str) -> Result<BookDocument> {
        ops::export_book(self.store()?, book_id).await
    }

    pub async fn export_book_json(&self, book_id: &str) -> Result<String> {
        let document = self.export_book(book_id).await?;
        ops::document_to_json(&document)
    }
}
