//! Whole-book import and export
//!
//! The document is `{ "id", "songs": [ { ...metadata, "src", "markers" } ] }`
//! with audio carried as a base64 data URL.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    append_song_ref, check_marker_time, create_book, delete_all_books, fetch_song, get_book,
    merge_tags, validate_song, write_song,
};
use crate::database::codec;
use crate::database::store::Store;
use crate::database::{Collection, ImportSummary, Marker, Song, SongSource, SourceType};
use crate::error::{Error, Result};

/// Serializable form of a whole book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDocument {
    pub id: String,
    #[serde(default)]
    pub songs: Vec<SongDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongDocument {
    #[serde(alias = "slug")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub composer: String,
    #[serde(default)]
    pub tempo: Option<f64>,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub time_signature: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub duration: Option<f64>,
    /// Text-encoded audio
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub markers: Vec<MarkerDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDocument {
    pub id: String,
    pub time: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl SongDocument {
    fn from_song(song: &Song) -> Self {
        Self {
            id: song.id.clone(),
            title: song.title.clone(),
            composer: song.composer.clone(),
            tempo: song.tempo,
            key: song.key.clone(),
            time_signature: song.time_signature.clone(),
            notes: song.notes.clone(),
            source_type: song.source_type,
            duration: song.duration,
            src: song
                .audio
                .as_ref()
                .map(codec::encode_transport)
                .unwrap_or_default(),
            markers: song
                .markers
                .iter()
                .map(|m| MarkerDocument {
                    id: m.id.clone(),
                    time: m.time,
                    title: m.title.clone(),
                    tags: m.tags.clone(),
                })
                .collect(),
        }
    }

    fn into_song(self) -> std::result::Result<Song, String> {
        let (mime_type, payload) = codec::decode_transport(&self.src)
            .map_err(|e| format!("song {}: {e}", self.id))?;

        let mut song = Song::new(self.id.clone(), self.title);
        song.composer = self.composer;
        song.tempo = self.tempo;
        song.key = self.key;
        song.time_signature = self.time_signature;
        song.notes = self.notes;
        song.source_type = self.source_type;
        song.duration = self.duration;
        song.audio = Some(SongSource {
            id: self.id.clone(),
            payload,
            mime_type,
        });
        for marker in self.markers {
            check_marker_time(marker.time, song.duration)
                .map_err(|e| format!("song {}, marker {}: {e}", self.id, marker.id))?;
            song.push_marker(Marker {
                id: marker.id,
                song_id: self.id.clone(),
                time: marker.time,
                title: marker.title,
                tags: marker.tags,
            });
        }
        Ok(song)
    }
}

/// Parse and fully validate a book document without touching the store
pub fn parse_book_document(text: &str) -> Result<(String, Vec<Song>)> {
    let document: BookDocument =
        serde_json::from_str(text).map_err(|e| Error::InvalidDocument(e.to_string()))?;

    if document.id.trim().is_empty() {
        return Err(Error::InvalidDocument("book id must not be empty".into()));
    }

    let mut seen = HashSet::new();
    let mut marker_owners: HashMap<String, String> = HashMap::new();
    let mut songs = Vec::with_capacity(document.songs.len());
    for entry in document.songs {
        if !seen.insert(entry.id.clone()) {
            return Err(Error::InvalidDocument(format!(
                "song {} appears twice",
                entry.id
            )));
        }
        let song = entry.into_song().map_err(Error::InvalidDocument)?;
        validate_song(&song).map_err(|e| Error::InvalidDocument(e.to_string()))?;

        for marker in &song.markers {
            if let Some(owner) = marker_owners.insert(marker.id.clone(), song.id.clone()) {
                return Err(Error::InvalidDocument(format!(
                    "marker {} is used by songs {owner} and {}",
                    marker.id, song.id
                )));
            }
        }
        songs.push(song);
    }

    Ok((document.id, songs))
}

/// Replace the current book with the one in `text`.
///
/// The whole document is parsed and validated before anything is deleted,
/// so a malformed import leaves existing data untouched.
pub async fn import_book(store: &Store, text: &str) -> Result<ImportSummary> {
    let (book_id, songs) = parse_book_document(text)?;

    let removed = delete_all_books(store).await?;
    info!("Importing book {} (replacing {} existing)", book_id, removed);
    create_book(store, &book_id).await?;

    let mut summary = ImportSummary {
        book_id: book_id.clone(),
        songs: 0,
        markers: 0,
        failed: 0,
    };
    let mut tag_names = Vec::new();

    for song in &songs {
        let written = match write_song(store, song, true).await {
            Ok(()) => append_song_ref(store, &book_id, &song.id).await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => {
                summary.songs += 1;
                summary.markers += song.markers.len();
                tag_names.extend(song.markers.iter().flat_map(|m| m.tags.iter().cloned()));
            }
            Err(e) => {
                warn!("Failed to import song {}: {}", song.id, e);
                summary.failed += 1;
            }
        }
    }

    if let Err(e) = merge_tags(store, tag_names).await {
        warn!("Failed to merge imported tag names: {}", e);
    }

    info!(
        "Imported book {}: {} songs, {} markers, {} failed",
        summary.book_id, summary.songs, summary.markers, summary.failed
    );
    Ok(summary)
}

/// Read every song of a book into one document. Songs that no longer
/// resolve are skipped.
pub async fn export_book(store: &Store, book_id: &str) -> Result<BookDocument> {
    let book = get_book(store, book_id)
        .await?
        .ok_or_else(|| Error::not_found(Collection::Books, book_id))?;

    let mut songs = Vec::with_capacity(book.song_refs.len());
    for song_id in &book.song_refs {
        match fetch_song(store, song_id).await? {
            Some(hydrated) => songs.push(SongDocument::from_song(&hydrated.song)),
            None => warn!("Skipping missing song {} during export", song_id),
        }
    }

    Ok(BookDocument { id: book.id, songs })
}

pub fn document_to_json(document: &BookDocument) -> Result<String> {
    serde_json::to_string_pretty(document).map_err(|e| Error::InvalidDocument(e.to_string()))
}
