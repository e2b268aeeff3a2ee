//! In-memory records handed to and returned by the engine

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::tags::TagIndex;

/// Mime type used when a song is stored without a known audio format
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// The top-level record enumerating a user's songs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    /// Song ids in display order
    #[serde(default)]
    pub song_refs: Vec<String>,
}

impl Book {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            song_refs: Vec::new(),
        }
    }
}

/// How the audio of a song entered the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Upload,
    Recording,
    Import,
}

/// Binary audio of a song, stored 1:1 under the song id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongSource {
    pub id: String,
    pub payload: Vec<u8>,
    pub mime_type: String,
}

impl SongSource {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: Vec::new(),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
        }
    }
}

/// A song with its markers hydrated
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    /// Slug, stable across sessions
    pub id: String,
    pub title: String,
    pub composer: String,
    /// Beats per minute
    pub tempo: Option<f64>,
    pub key: String,
    pub time_signature: String,
    pub notes: String,
    pub source_type: SourceType,
    /// Length in seconds, if known
    pub duration: Option<f64>,
    pub marker_refs: Vec<String>,
    pub markers: Vec<Marker>,
    pub audio: Option<SongSource>,
}

impl Song {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            composer: String::new(),
            tempo: None,
            key: String::new(),
            time_signature: String::new(),
            notes: String::new(),
            source_type: SourceType::default(),
            duration: None,
            marker_refs: Vec::new(),
            markers: Vec::new(),
            audio: None,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_audio(mut self, payload: Vec<u8>, mime_type: impl Into<String>) -> Self {
        self.audio = Some(SongSource {
            id: self.id.clone(),
            payload,
            mime_type: mime_type.into(),
        });
        self
    }

    /// Attach a marker to this song, keeping `marker_refs` in step
    pub fn push_marker(&mut self, mut marker: Marker) {
        marker.song_id = self.id.clone();
        if !self.marker_refs.contains(&marker.id) {
            self.marker_refs.push(marker.id.clone());
        }
        self.markers.push(marker);
    }
}

/// A time-coded point inside a song
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub id: String,
    /// Owning song, implied by containment in its `marker_refs`
    pub song_id: String,
    /// Seconds from the start of the song
    pub time: f64,
    pub title: String,
    pub tags: BTreeSet<String>,
}

impl Marker {
    pub fn new(
        id: impl Into<String>,
        song_id: impl Into<String>,
        time: f64,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            song_id: song_id.into(),
            time,
            title: title.into(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tag(mut self, name: impl Into<String>) -> Self {
        self.tags.insert(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Dark,
    Light,
    System,
}

/// User preferences, stored as a singleton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub theme: Theme,
    /// Signed seek offsets offered by the transport controls
    pub skip_times: Vec<f64>,
    /// Seconds subtracted from the playhead when a marker is dropped live
    pub marker_time_adjustment: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            skip_times: vec![-10.0, -5.0, 5.0, 10.0],
            marker_time_adjustment: 0.0,
        }
    }
}

impl Settings {
    /// Marker time for a marker placed at `playhead`, never below zero
    pub fn adjusted_marker_time(&self, playhead: f64) -> f64 {
        (playhead - self.marker_time_adjustment).max(0.0)
    }
}

/// A single editable song metadata field
#[derive(Debug, Clone, PartialEq)]
pub enum SongField {
    Title(String),
    Composer(String),
    Tempo(Option<f64>),
    Key(String),
    TimeSignature(String),
    Notes(String),
    SourceType(SourceType),
    Duration(Option<f64>),
}

/// A single editable marker field
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerField {
    Time(f64),
    Title(String),
    Tags(BTreeSet<String>),
}

/// Data-loss conditions found while hydrating, surfaced instead of failing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Song metadata exists but its audio record does not
    MissingSource { song_id: String },
    /// A marker id in `marker_refs` did not resolve and was pruned
    DanglingMarker { song_id: String, marker_id: String },
    /// A song id in the book did not resolve and was pruned
    DanglingSong { book_id: String, song_id: String },
}

/// A song read back from the store, plus anything noticed on the way
#[derive(Debug, Clone, PartialEq)]
pub struct Hydrated {
    pub song: Song,
    pub warnings: Vec<Warning>,
}

/// Result of the startup load
#[derive(Debug, Clone, Default)]
pub struct LoadedBook {
    /// Active book id; `None` only when the store is unusable
    pub book_id: Option<String>,
    pub songs: Vec<Song>,
    pub tags: TagIndex,
    pub warnings: Vec<Warning>,
}

/// Outcome of a book import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub book_id: String,
    pub songs: usize,
    pub markers: usize,
    /// Songs whose records could not be written
    pub failed: usize,
}
