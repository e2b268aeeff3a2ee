//! Song operations and hydration

use std::collections::HashSet;

use futures_util::FutureExt;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use super::{
    append_song_ref, check_duration, check_marker_time, check_tempo, delete_marker_record,
    get_marker_record, remove_song_refs, slugify,
};
use crate::database::codec::{self, MarkerRecord, SongRecord};
use crate::database::store::{Mode, Store};
use crate::database::{Collection, Hydrated, Song, SongField, SongSource, Warning};
use crate::error::{Error, Result};

const SONG_COLLECTIONS: [Collection; 3] = [
    Collection::Songs,
    Collection::SongSources,
    Collection::Markers,
];

/// Reject bad metadata values and out-of-range or repeated carried markers
pub fn validate_song(song: &Song) -> Result<()> {
    if song.id.trim().is_empty() {
        return Err(Error::constraint("song id must not be empty"));
    }
    check_duration(song.duration)?;
    check_tempo(song.tempo)?;

    let mut seen = HashSet::new();
    for marker in &song.markers {
        if !seen.insert(marker.id.as_str()) {
            return Err(Error::constraint(format!(
                "marker {} appears twice in song {}",
                marker.id, song.id
            )));
        }
        check_marker_time(marker.time, song.duration)?;
    }
    Ok(())
}

/// Write metadata, audio and the carried markers in one scope.
///
/// `marker_refs` is rebuilt from `song.markers`, so a song whose markers
/// were never hydrated is stored without refs. With `overwrite`, an
/// existing song is replaced and its markers that are no longer referenced
/// are deleted; without it an existing id is a constraint violation. A
/// carried marker id already stored for another song is rejected either
/// way.
pub async fn write_song(store: &Store, song: &Song, overwrite: bool) -> Result<()> {
    validate_song(song)?;

    let mut record = codec::encode_song_metadata(song);
    record.marker_refs = song.markers.iter().map(|m| m.id.clone()).collect();
    let source = match &song.audio {
        Some(audio) => SongSource {
            id: song.id.clone(),
            ..audio.clone()
        },
        None => SongSource::empty(song.id.clone()),
    };
    let markers: Vec<MarkerRecord> = song.markers.iter().map(codec::encode_marker).collect();

    store
        .with_collections(&SONG_COLLECTIONS, Mode::ReadWrite, move |scope| {
            async move {
                let previous = match scope.get_raw(Collection::Songs, &record.id).await? {
                    Some(_) if !overwrite => {
                        return Err(Error::constraint(format!(
                            "song {} already exists",
                            record.id
                        )));
                    }
                    // An unreadable previous record has no refs worth keeping
                    Some(raw) => codec::decode::<SongRecord>(Collection::Songs, &record.id, &raw)
                        .map(|p| p.marker_refs)
                        .unwrap_or_default(),
                    None => Vec::new(),
                };

                // Marker ids are global; never take over another song's marker
                for marker in &markers {
                    if !previous.contains(&marker.id)
                        && scope.contains(Collection::Markers, &marker.id).await?
                    {
                        return Err(Error::constraint(format!(
                            "marker {} already belongs to another song",
                            marker.id
                        )));
                    }
                }

                for stale in previous.iter().filter(|id| !record.marker_refs.contains(id)) {
                    scope.delete(Collection::Markers, stale).await?;
                }

                scope.put(Collection::Songs, &record.id, &record).await?;
                scope.put_source(&source).await?;
                for marker in &markers {
                    scope.put(Collection::Markers, &marker.id, marker).await?;
                }
                Ok(())
            }
            .boxed()
        })
        .await?;

    debug!("Wrote song {} with {} markers", song.id, song.markers.len());
    Ok(())
}

/// Create a song and append it to the book. Returns the stored id.
///
/// A blank id is derived from the title. Only `song.markers` is written;
/// `marker_refs` without hydrated markers are dropped (see [`write_song`]).
/// If the append fails, the song is stored but orphaned; the error is
/// returned so the caller knows.
pub async fn create_song(store: &Store, book_id: &str, song: &Song) -> Result<String> {
    let named;
    let song = if song.id.trim().is_empty() {
        let slug = slugify(&song.title);
        if slug.is_empty() {
            return Err(Error::constraint("song needs an id or a title to derive one from"));
        }
        let mut copy = song.clone();
        copy.id = slug;
        for marker in &mut copy.markers {
            marker.song_id = copy.id.clone();
        }
        named = copy;
        &named
    } else {
        song
    };

    write_song(store, song, false).await?;

    if let Err(e) = append_song_ref(store, book_id, &song.id).await {
        warn!("Song {} stored but not linked to book {}: {}", song.id, book_id, e);
        return Err(e);
    }

    info!("Created song {}", song.id);
    Ok(song.id.clone())
}

/// Read metadata, then audio, then every referenced marker in parallel.
///
/// `None` means the metadata is missing or unreadable. Marker ids that do
/// not resolve are pruned from the stored song.
pub async fn fetch_song(store: &Store, id: &str) -> Result<Option<Hydrated>> {
    let song_id = id.to_string();
    let (raw, source) = store
        .with_collections(
            &[Collection::Songs, Collection::SongSources],
            Mode::ReadOnly,
            move |scope| {
                async move {
                    let raw = scope.get_raw(Collection::Songs, &song_id).await?;
                    let source = scope.get_source(&song_id).await?;
                    Ok((raw, source))
                }
                .boxed()
            },
        )
        .await?;

    let Some(raw) = raw else {
        debug!("Song {} not found", id);
        return Ok(None);
    };
    let record: SongRecord = match codec::decode(Collection::Songs, id, &raw) {
        Ok(record) => record,
        Err(e) => {
            warn!("Treating song {} as absent: {}", id, e);
            return Ok(None);
        }
    };

    let mut warnings = Vec::new();
    let mut song = codec::decode_song_metadata(record);
    song.id = id.to_string();

    match source {
        Some(source) => song.audio = Some(source),
        None => {
            warn!("Song {} has no audio source record", id);
            warnings.push(Warning::MissingSource {
                song_id: id.to_string(),
            });
        }
    }

    let lookups = join_all(
        song.marker_refs
            .iter()
            .map(|marker_id| get_marker_record(store, marker_id)),
    )
    .await;

    let mut dangling = Vec::new();
    for (marker_id, lookup) in song.marker_refs.iter().zip(lookups) {
        match lookup {
            Ok(Some(record)) => song.markers.push(codec::decode_marker(id, record)),
            Ok(None) => dangling.push(marker_id.clone()),
            Err(e) if e.is_absent() => {
                warn!("Treating marker {} as absent: {}", marker_id, e);
                dangling.push(marker_id.clone());
            }
            // Store failure: keep the ref, skip the marker this time
            Err(e) => warn!("Failed to read marker {}: {}", marker_id, e),
        }
    }

    if !dangling.is_empty() {
        song.marker_refs.retain(|m| !dangling.contains(m));
        if let Err(e) = prune_marker_refs(store, id, &dangling).await {
            warn!("Failed to prune marker refs of song {}: {}", id, e);
        }
        warnings.extend(dangling.into_iter().map(|marker_id| Warning::DanglingMarker {
            song_id: id.to_string(),
            marker_id,
        }));
    }

    Ok(Some(Hydrated { song, warnings }))
}

/// Remove marker ids from a stored song's `marker_refs`
pub async fn prune_marker_refs(store: &Store, song_id: &str, marker_ids: &[String]) -> Result<()> {
    let count = marker_ids.len();
    let id = song_id.to_string();
    let marker_ids = marker_ids.to_vec();
    store
        .with_collections(&[Collection::Songs], Mode::ReadWrite, move |scope| {
            async move {
                let Some(mut record) = scope.get::<SongRecord>(Collection::Songs, &id).await?
                else {
                    return Ok(());
                };
                record.marker_refs.retain(|m| !marker_ids.contains(m));
                scope.put(Collection::Songs, &id, &record).await
            }
            .boxed()
        })
        .await?;

    info!("Pruned {} dangling marker refs from song {}", count, song_id);
    Ok(())
}

/// Delete metadata and audio together, then each marker, then the book ref.
///
/// Marker and book cleanup is best-effort: failures are logged as a partial
/// failure and the deletion still succeeds.
pub async fn delete_song(store: &Store, book_id: Option<&str>, song: &Song) -> Result<()> {
    let song_id = song.id.clone();
    let stored_refs = store
        .with_collections(
            &[Collection::Songs, Collection::SongSources],
            Mode::ReadWrite,
            move |scope| {
                async move {
                    let refs = match scope.get_raw(Collection::Songs, &song_id).await? {
                        Some(raw) => codec::decode::<SongRecord>(Collection::Songs, &song_id, &raw)
                            .map(|r| r.marker_refs)
                            .unwrap_or_default(),
                        None => Vec::new(),
                    };
                    scope.delete(Collection::Songs, &song_id).await?;
                    scope.delete(Collection::SongSources, &song_id).await?;
                    Ok(refs)
                }
                .boxed()
            },
        )
        .await?;

    let mut marker_ids: Vec<String> = Vec::new();
    let candidates = song
        .marker_refs
        .iter()
        .chain(song.markers.iter().map(|m| &m.id))
        .chain(stored_refs.iter());
    for id in candidates {
        if !marker_ids.contains(id) {
            marker_ids.push(id.clone());
        }
    }

    let results = join_all(marker_ids.iter().map(|id| delete_marker_record(store, id))).await;
    let mut attempted = marker_ids.len();
    let mut failed = 0;
    for (id, result) in marker_ids.iter().zip(&results) {
        if let Err(e) = result {
            warn!("Failed to delete marker {} of song {}: {}", id, song.id, e);
            failed += 1;
        }
    }

    if let Some(book_id) = book_id {
        attempted += 1;
        if let Err(e) = remove_song_refs(store, book_id, std::slice::from_ref(&song.id)).await {
            warn!("Failed to unlink song {} from book {}: {}", song.id, book_id, e);
            failed += 1;
        }
    }

    if failed > 0 {
        let partial = Error::PartialFailure {
            operation: format!("deleting song {}", song.id),
            attempted,
            failed,
        };
        warn!("{}", partial);
    }

    info!("Deleted song {} and {} markers", song.id, marker_ids.len());
    Ok(())
}

/// Read-modify-write of one metadata field; last writer wins
pub async fn update_song_field(store: &Store, song_id: &str, field: SongField) -> Result<()> {
    match &field {
        SongField::Tempo(tempo) => check_tempo(*tempo)?,
        SongField::Duration(duration) => check_duration(*duration)?,
        _ => {}
    }

    let id = song_id.to_string();
    store
        .with_collections(
            &[Collection::Songs, Collection::Markers],
            Mode::ReadWrite,
            move |scope| {
                async move {
                    let mut record: SongRecord = scope
                        .get(Collection::Songs, &id)
                        .await?
                        .ok_or_else(|| Error::not_found(Collection::Songs, id.as_str()))?;

                    // Shrinking the song must not strand existing markers
                    if let SongField::Duration(Some(limit)) = field {
                        for marker_id in &record.marker_refs {
                            match scope.get::<MarkerRecord>(Collection::Markers, marker_id).await {
                                Ok(Some(marker)) if marker.time > limit => {
                                    return Err(Error::constraint(format!(
                                        "marker {} at {}s is past the new duration {}s",
                                        marker.id, marker.time, limit
                                    )));
                                }
                                Err(e) if !e.is_absent() => return Err(e),
                                _ => {}
                            }
                        }
                    }

                    apply_song_field(&mut record, field);
                    scope.put(Collection::Songs, &id, &record).await
                }
                .boxed()
            },
        )
        .await?;

    debug!("Updated song {}", song_id);
    Ok(())
}

fn apply_song_field(record: &mut SongRecord, field: SongField) {
    match field {
        SongField::Title(value) => record.title = value,
        SongField::Composer(value) => record.composer = value,
        SongField::Tempo(value) => record.tempo = value,
        SongField::Key(value) => record.key = value,
        SongField::TimeSignature(value) => record.time_signature = value,
        SongField::Notes(value) => record.notes = value,
        SongField::SourceType(value) => record.source_type = value,
        SongField::Duration(value) => record.duration = value,
    }
}
