//! Conversion between in-memory records and their stored form
//!
//! Stateless. Song metadata and markers travel as JSON documents; audio
//! payloads bypass JSON and go to `songSources` untouched. The transport
//! helpers at the bottom produce the text form used by book export.

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::models::{DEFAULT_MIME_TYPE, Marker, Song, SongSource, SourceType};
use super::schema::Collection;
use crate::error::{Error, Result};

/// Song metadata as stored in `songs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongRecord {
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
    #[serde(default)]
    pub marker_refs: Vec<String>,
}

/// Marker as stored in `markers`. The owning song is not stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerRecord {
    pub id: String,
    pub time: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Drop audio and marker objects, keeping only marker ids
pub fn encode_song_metadata(song: &Song) -> SongRecord {
    SongRecord {
        id: song.id.clone(),
        title: song.title.clone(),
        composer: song.composer.clone(),
        tempo: song.tempo,
        key: song.key.clone(),
        time_signature: song.time_signature.clone(),
        notes: song.notes.clone(),
        source_type: song.source_type,
        duration: song.duration,
        marker_refs: song.marker_refs.clone(),
    }
}

/// Partial song: markers and audio are left for hydration
pub fn decode_song_metadata(record: SongRecord) -> Song {
    Song {
        id: record.id,
        title: record.title,
        composer: record.composer,
        tempo: record.tempo,
        key: record.key,
        time_signature: record.time_signature,
        notes: record.notes,
        source_type: record.source_type,
        duration: record.duration,
        marker_refs: record.marker_refs,
        markers: Vec::new(),
        audio: None,
    }
}

pub fn encode_marker(marker: &Marker) -> MarkerRecord {
    MarkerRecord {
        id: marker.id.clone(),
        time: marker.time,
        title: marker.title.clone(),
        tags: marker.tags.clone(),
    }
}

pub fn decode_marker(song_id: &str, record: MarkerRecord) -> Marker {
    Marker {
        id: record.id,
        song_id: song_id.to_string(),
        time: record.time,
        title: record.title,
        tags: record.tags,
    }
}

/// Serialize a record for a document collection
pub fn encode<T: Serialize>(collection: Collection, id: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::CorruptRecord {
        collection,
        id: id.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a stored document. Failures are `CorruptRecord`.
pub fn decode<T: DeserializeOwned>(collection: Collection, id: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| Error::CorruptRecord {
        collection,
        id: id.to_string(),
        reason: e.to_string(),
    })
}

/// `data:<mime>;base64,<payload>` form of a song's audio
pub fn encode_transport(source: &SongSource) -> String {
    format!(
        "data:{};base64,{}",
        source.mime_type,
        STANDARD.encode(&source.payload)
    )
}

/// Inverse of [`encode_transport`]. A bare base64 string is accepted too.
/// Returns `(mime_type, payload)`.
pub fn decode_transport(text: &str) -> std::result::Result<(String, Vec<u8>), String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok((DEFAULT_MIME_TYPE.to_string(), Vec::new()));
    }

    let (mime_type, encoded) = match text.strip_prefix("data:") {
        Some(rest) => {
            let (header, body) = rest
                .split_once(',')
                .ok_or_else(|| "data URL has no payload separator".to_string())?;
            let mime = header
                .strip_suffix(";base64")
                .ok_or_else(|| format!("data URL is not base64 encoded: {header}"))?;
            let mime = if mime.is_empty() {
                DEFAULT_MIME_TYPE
            } else {
                mime
            };
            (mime.to_string(), body)
        }
        None => (DEFAULT_MIME_TYPE.to_string(), text),
    };

    let payload = STANDARD
        .decode(encoded)
        .map_err(|e| format!("invalid base64 payload: {e}"))?;
    Ok((mime_type, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_song() -> Song {
        let mut song = Song::new("intro", "Intro").with_duration(95.5);
        song.composer = "J. Doe".into();
        song.tempo = Some(120.0);
        song.key = "D minor".into();
        song.time_signature = "3/4".into();
        song.notes = "watch the pickup".into();
        song.push_marker(Marker::new("m1", "intro", 12.0, "Verse"));
        song.audio = Some(SongSource {
            id: "intro".into(),
            payload: vec![1, 2, 3],
            mime_type: "audio/ogg".into(),
        });
        song
    }

    #[test]
    fn test_song_metadata_keeps_only_marker_ids() {
        let record = encode_song_metadata(&sample_song());
        assert_eq!(record.marker_refs, vec!["m1".to_string()]);

        let json = encode(Collection::Songs, "intro", &record).unwrap();
        assert!(json.contains("\"markerRefs\":[\"m1\"]"));
        assert!(json.contains("\"timeSignature\":\"3/4\""));
        assert!(!json.contains("payload"));
        assert!(!json.contains("Verse"));
    }

    #[test]
    fn test_decode_song_metadata_leaves_hydration_empty() {
        let song = decode_song_metadata(encode_song_metadata(&sample_song()));
        assert_eq!(song.title, "Intro");
        assert_eq!(song.tempo, Some(120.0));
        assert_eq!(song.marker_refs, vec!["m1".to_string()]);
        assert!(song.markers.is_empty());
        assert!(song.audio.is_none());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let record: SongRecord =
            decode(Collection::Songs, "bare", r#"{"id":"bare","unknown":1}"#).unwrap();
        assert_eq!(record.title, "");
        assert_eq!(record.source_type, SourceType::Upload);
        assert!(record.marker_refs.is_empty());
        assert!(record.duration.is_none());
    }

    #[test]
    fn test_malformed_json_is_corrupt_record() {
        let err = decode::<SongRecord>(Collection::Songs, "x", "{not json").unwrap_err();
        match err {
            Error::CorruptRecord { collection, id, .. } => {
                assert_eq!(collection, Collection::Songs);
                assert_eq!(id, "x");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_marker_record_does_not_store_song() {
        let marker = Marker::new("m1", "intro", 4.25, "Bridge").with_tag("loop");
        let json = encode(Collection::Markers, "m1", &encode_marker(&marker)).unwrap();
        assert!(!json.contains("intro"));

        let record: MarkerRecord = decode(Collection::Markers, "m1", &json).unwrap();
        assert_eq!(decode_marker("intro", record), marker);
    }

    #[test]
    fn test_transport_data_url() {
        let source = SongSource {
            id: "intro".into(),
            payload: b"RIFF....WAVE".to_vec(),
            mime_type: "audio/wav".into(),
        };
        let text = encode_transport(&source);
        assert!(text.starts_with("data:audio/wav;base64,"));

        let (mime, payload) = decode_transport(&text).unwrap();
        assert_eq!(mime, "audio/wav");
        assert_eq!(payload, source.payload);
    }

    #[test]
    fn test_transport_accepts_bare_base64_and_empty() {
        let (mime, payload) = decode_transport("AQID").unwrap();
        assert_eq!(mime, DEFAULT_MIME_TYPE);
        assert_eq!(payload, vec![1, 2, 3]);

        let (_, payload) = decode_transport("").unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_transport_rejects_garbage() {
        assert!(decode_transport("data:audio/wav,plain").is_err());
        assert!(decode_transport("data:audio/wav;base64").is_err());
        assert!(decode_transport("***").is_err());
    }
}
