//! Marker operations

use futures_util::FutureExt;
use tracing::{debug, info};

use super::check_marker_time;
use crate::database::codec::{self, MarkerRecord, SongRecord};
use crate::database::store::{Mode, Scope, Store};
use crate::database::{Collection, Marker, MarkerField};
use crate::error::{Error, Result};

const MARKER_COLLECTIONS: [Collection; 2] = [Collection::Songs, Collection::Markers];

pub async fn get_marker_record(store: &Store, id: &str) -> Result<Option<MarkerRecord>> {
    let id = id.to_string();
    store
        .with_collections(&[Collection::Markers], Mode::ReadOnly, move |scope| {
            async move { scope.get::<MarkerRecord>(Collection::Markers, &id).await }.boxed()
        })
        .await
}

/// Fetch one marker of `song_id`; absent or unreadable is `NotFound`
pub async fn get_marker(store: &Store, song_id: &str, id: &str) -> Result<Marker> {
    match get_marker_record(store, id).await {
        Ok(Some(record)) => Ok(codec::decode_marker(song_id, record)),
        Ok(None) => Err(Error::not_found(Collection::Markers, id)),
        Err(e) if e.is_absent() => Err(Error::not_found(Collection::Markers, id)),
        Err(e) => Err(e),
    }
}

pub async fn delete_marker_record(store: &Store, id: &str) -> Result<bool> {
    let id = id.to_string();
    store
        .with_collections(&[Collection::Markers], Mode::ReadWrite, move |scope| {
            async move { scope.delete(Collection::Markers, &id).await }.boxed()
        })
        .await
}

/// Write the marker and append it to its song in one scope
pub async fn create_marker(store: &Store, marker: &Marker) -> Result<()> {
    let song_id = marker.song_id.clone();
    let record = codec::encode_marker(marker);

    store
        .with_collections(&MARKER_COLLECTIONS, Mode::ReadWrite, move |scope| {
            async move {
                let mut song: SongRecord = scope
                    .get(Collection::Songs, &song_id)
                    .await?
                    .ok_or_else(|| Error::not_found(Collection::Songs, song_id.as_str()))?;
                check_marker_time(record.time, song.duration)?;

                if scope.contains(Collection::Markers, &record.id).await? {
                    return Err(Error::constraint(format!(
                        "marker {} already exists",
                        record.id
                    )));
                }

                scope.put(Collection::Markers, &record.id, &record).await?;
                if !song.marker_refs.contains(&record.id) {
                    song.marker_refs.push(record.id.clone());
                    scope.put(Collection::Songs, &song_id, &song).await?;
                }
                Ok(())
            }
            .boxed()
        })
        .await?;

    info!("Created marker {} in song {}", marker.id, marker.song_id);
    Ok(())
}

/// Delete the marker and drop it from its song's refs in one scope
pub async fn delete_marker(store: &Store, marker: &Marker) -> Result<()> {
    let song_id = marker.song_id.clone();
    let id = marker.id.clone();

    store
        .with_collections(&MARKER_COLLECTIONS, Mode::ReadWrite, move |scope| {
            async move {
                scope.delete(Collection::Markers, &id).await?;

                // A vanished or unreadable song has no refs left to fix
                match scope.get::<SongRecord>(Collection::Songs, &song_id).await {
                    Ok(Some(mut song)) => {
                        let before = song.marker_refs.len();
                        song.marker_refs.retain(|m| *m != id);
                        if song.marker_refs.len() != before {
                            scope.put(Collection::Songs, &song_id, &song).await?;
                        }
                    }
                    Ok(None) => {}
                    Err(e) if e.is_absent() => {}
                    Err(e) => return Err(e),
                }
                Ok(())
            }
            .boxed()
        })
        .await?;

    info!("Deleted marker {} from song {}", marker.id, marker.song_id);
    Ok(())
}

/// Read-modify-write of one marker field; last writer wins
pub async fn update_marker_field(store: &Store, marker: &Marker, field: MarkerField) -> Result<()> {
    if let MarkerField::Tags(tags) = &field {
        if tags.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::constraint("tag names must not be blank"));
        }
    }

    let song_id = marker.song_id.clone();
    let id = marker.id.clone();

    store
        .with_collections(&MARKER_COLLECTIONS, Mode::ReadWrite, move |scope| {
            async move {
                let mut record: MarkerRecord = scope
                    .get(Collection::Markers, &id)
                    .await?
                    .ok_or_else(|| Error::not_found(Collection::Markers, id.as_str()))?;

                match field {
                    MarkerField::Time(time) => {
                        let song: SongRecord = scope
                            .get(Collection::Songs, &song_id)
                            .await?
                            .ok_or_else(|| Error::not_found(Collection::Songs, song_id.as_str()))?;
                        check_marker_time(time, song.duration)?;
                        record.time = time;
                    }
                    MarkerField::Title(title) => record.title = title,
                    MarkerField::Tags(tags) => record.tags = tags,
                }

                scope.put(Collection::Markers, &id, &record).await
            }
            .boxed()
        })
        .await?;

    debug!("Updated marker {}", marker.id);
    Ok(())
}

/// Write markers that still exist, skipping ones deleted in the meantime.
/// Returns how many were written.
pub(crate) async fn put_existing_markers(
    scope: &mut Scope,
    records: &[MarkerRecord],
) -> Result<usize> {
    let mut written = 0;
    for record in records {
        if scope.contains(Collection::Markers, &record.id).await? {
            scope.put(Collection::Markers, &record.id, record).await?;
            written += 1;
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Song;
    use crate::database::ops::{create_book, create_song, fetch_song};

    async fn store_with_song(duration: Option<f64>) -> Store {
        let store = Store::open_in_memory().await.unwrap();
        create_book(&store, "book").await.unwrap();
        let mut song = Song::new("a", "A");
        song.duration = duration;
        create_song(&store, "book", &song).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_marker_links_song() {
        let store = store_with_song(Some(120.0)).await;
        let marker = Marker::new("m1", "a", 10.0, "Verse").with_tag("loop");
        create_marker(&store, &marker).await.unwrap();

        let song = fetch_song(&store, "a").await.unwrap().unwrap().song;
        assert_eq!(song.marker_refs, vec!["m1".to_string()]);
        assert_eq!(song.markers, vec![marker.clone()]);
        assert_eq!(get_marker(&store, "a", "m1").await.unwrap(), marker);
    }

    #[tokio::test]
    async fn test_create_marker_rejects_missing_song_and_duplicates() {
        let store = store_with_song(Some(120.0)).await;
        let err = create_marker(&store, &Marker::new("m1", "ghost", 1.0, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { collection: Collection::Songs, .. }));

        create_marker(&store, &Marker::new("m1", "a", 1.0, "x")).await.unwrap();
        let err = create_marker(&store, &Marker::new("m1", "a", 2.0, "y"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_create_marker_checks_time() {
        let store = store_with_song(Some(30.0)).await;
        let err = create_marker(&store, &Marker::new("m1", "a", 31.0, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation(_)));
        assert!(get_marker_record(&store, "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_marker_time_boundaries() {
        let store = store_with_song(Some(30.0)).await;
        let marker = Marker::new("m1", "a", 10.0, "x");
        create_marker(&store, &marker).await.unwrap();

        update_marker_field(&store, &marker, MarkerField::Time(0.0)).await.unwrap();
        update_marker_field(&store, &marker, MarkerField::Time(30.0)).await.unwrap();

        for bad in [-1.0, 30.001] {
            let err = update_marker_field(&store, &marker, MarkerField::Time(bad))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::ConstraintViolation(_)), "{bad} accepted");
        }
        assert_eq!(get_marker(&store, "a", "m1").await.unwrap().time, 30.0);
    }

    #[tokio::test]
    async fn test_update_marker_title_and_tags() {
        let store = store_with_song(None).await;
        let marker = Marker::new("m1", "a", 900.0, "x");
        create_marker(&store, &marker).await.unwrap();

        update_marker_field(&store, &marker, MarkerField::Title("Chorus".into()))
            .await
            .unwrap();
        let tags = ["loop".to_string()].into_iter().collect();
        update_marker_field(&store, &marker, MarkerField::Tags(tags)).await.unwrap();

        let stored = get_marker(&store, "a", "m1").await.unwrap();
        assert_eq!(stored.title, "Chorus");
        assert!(stored.tags.contains("loop"));

        let blank = [" ".to_string()].into_iter().collect();
        assert!(update_marker_field(&store, &marker, MarkerField::Tags(blank)).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_marker_with_unreadable_song() {
        let store = store_with_song(Some(60.0)).await;
        let marker = Marker::new("m1", "a", 10.0, "x");
        create_marker(&store, &marker).await.unwrap();

        let mut scope = store.begin(&[Collection::Songs], Mode::ReadWrite).await.unwrap();
        scope
            .put(Collection::Songs, "a", &serde_json::json!({"markerRefs": 3}))
            .await
            .unwrap();
        scope.commit().await.unwrap();

        delete_marker(&store, &marker).await.unwrap();
        assert!(get_marker_record(&store, "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_marker_unlinks_song() {
        let store = store_with_song(Some(60.0)).await;
        let marker = Marker::new("m1", "a", 10.0, "x");
        create_marker(&store, &marker).await.unwrap();
        delete_marker(&store, &marker).await.unwrap();

        let song = fetch_song(&store, "a").await.unwrap().unwrap();
        assert!(song.song.marker_refs.is_empty());
        assert!(song.warnings.is_empty());

        let err = get_marker(&store, "a", "m1").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { collection: Collection::Markers, .. }));
    }
}
