//! Startup load: reconstruct the book from the collections

use futures_util::future::join_all;
use tracing::{info, warn};

use super::{create_book, fetch_song, first_book_id, generate_id, get_book, list_tags, put_book};
use crate::database::store::Store;
use crate::database::{Book, LoadedBook, Warning};
use crate::error::Result;
use crate::tags::TagIndex;

/// Load book `id`, or the first book when `id` is `None`.
///
/// With no book yet, one is created (under `id` or a generated id) and the
/// result is empty. Song ids that no longer resolve are pruned from the book.
pub async fn load_book(store: &Store, id: Option<&str>) -> Result<LoadedBook> {
    let book_id = match id {
        Some(id) => Some(id.to_string()),
        None => first_book_id(store).await?,
    };

    let book = match &book_id {
        Some(book_id) => match get_book(store, book_id).await {
            Ok(book) => book,
            Err(e) if e.is_absent() => {
                // Repair in place so the next start does not trip over it again
                warn!("Replacing unreadable book {}: {}", book_id, e);
                let book = Book::new(book_id.clone());
                put_book(store, &book).await?;
                Some(book)
            }
            Err(e) => return Err(e),
        },
        None => None,
    };

    let Some(mut book) = book else {
        let new_id = book_id.unwrap_or_else(|| generate_id("book"));
        create_book(store, &new_id).await?;
        return Ok(LoadedBook {
            book_id: Some(new_id),
            ..LoadedBook::default()
        });
    };

    let mut refs: Vec<String> = Vec::with_capacity(book.song_refs.len());
    for song_id in &book.song_refs {
        if !refs.contains(song_id) {
            refs.push(song_id.clone());
        }
    }

    let lookups = join_all(refs.iter().map(|song_id| fetch_song(store, song_id))).await;

    let mut songs = Vec::with_capacity(refs.len());
    let mut warnings = Vec::new();
    let mut dangling = Vec::new();
    for (song_id, lookup) in refs.iter().zip(lookups) {
        match lookup {
            Ok(Some(hydrated)) => {
                warnings.extend(hydrated.warnings);
                songs.push(hydrated.song);
            }
            Ok(None) => dangling.push(song_id.clone()),
            // Store failure: keep the ref for the next load
            Err(e) => warn!("Failed to load song {}: {}", song_id, e),
        }
    }

    let duplicates = book.song_refs.len() != refs.len();
    if !dangling.is_empty() || duplicates {
        book.song_refs = refs
            .into_iter()
            .filter(|song_id| !dangling.contains(song_id))
            .collect();
        if let Err(e) = put_book(store, &book).await {
            warn!("Failed to prune book {}: {}", book.id, e);
        } else {
            info!("Pruned {} dangling song refs from book {}", dangling.len(), book.id);
        }
        warnings.extend(dangling.into_iter().map(|song_id| Warning::DanglingSong {
            book_id: book.id.clone(),
            song_id,
        }));
    }

    let names = match list_tags(store).await {
        Ok(names) => names,
        Err(e) => {
            warn!("Failed to load tag names: {}", e);
            Vec::new()
        }
    };
    let tags = TagIndex::build(names, &songs);

    info!("Loaded book {} with {} songs", book.id, songs.len());
    Ok(LoadedBook {
        book_id: Some(book.id),
        songs,
        tags,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::codec;
    use crate::database::ops::{append_song_ref, create_song, create_tag};
    use crate::database::store::Mode;
    use crate::database::{Collection, Marker, Song};

    #[tokio::test]
    async fn test_fresh_store_creates_book() {
        let store = Store::open_in_memory().await.unwrap();
        let loaded = load_book(&store, None).await.unwrap();
        assert!(loaded.songs.is_empty());

        let book_id = loaded.book_id.unwrap();
        assert!(book_id.starts_with("book-"));
        assert_eq!(first_book_id(&store).await.unwrap(), Some(book_id.clone()));

        // Second load finds the same book instead of creating another
        let again = load_book(&store, None).await.unwrap();
        assert_eq!(again.book_id, Some(book_id));
    }

    #[tokio::test]
    async fn test_named_book_is_created_under_that_id() {
        let store = Store::open_in_memory().await.unwrap();
        let loaded = load_book(&store, Some("mine")).await.unwrap();
        assert_eq!(loaded.book_id.as_deref(), Some("mine"));
        assert!(get_book(&store, "mine").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_load_keeps_order_and_prunes_dangling() {
        let store = Store::open_in_memory().await.unwrap();
        create_book(&store, "b").await.unwrap();
        create_song(&store, "b", &Song::new("two", "Two")).await.unwrap();
        append_song_ref(&store, "b", "ghost").await.unwrap();
        create_song(&store, "b", &Song::new("one", "One")).await.unwrap();

        let loaded = load_book(&store, Some("b")).await.unwrap();
        let ids: Vec<_> = loaded.songs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["two", "one"]);
        assert_eq!(
            loaded.warnings,
            vec![Warning::DanglingSong {
                book_id: "b".into(),
                song_id: "ghost".into()
            }]
        );

        let book = get_book(&store, "b").await.unwrap().unwrap();
        assert_eq!(book.song_refs, vec!["two".to_string(), "one".to_string()]);
    }

    #[tokio::test]
    async fn test_load_builds_tag_index() {
        let store = Store::open_in_memory().await.unwrap();
        create_book(&store, "b").await.unwrap();
        create_tag(&store, "chorus").await.unwrap();
        create_tag(&store, "unused").await.unwrap();

        let mut song = Song::new("a", "A");
        song.push_marker(Marker::new("m1", "a", 1.0, "x").with_tag("chorus"));
        song.push_marker(Marker::new("m2", "a", 2.0, "y").with_tag("chorus"));
        create_song(&store, "b", &song).await.unwrap();

        let loaded = load_book(&store, None).await.unwrap();
        assert_eq!(loaded.tags.usage("chorus"), 2);
        assert!(loaded.tags.contains("unused"));
    }

    #[tokio::test]
    async fn test_unreadable_book_is_repaired() {
        let store = Store::open_in_memory().await.unwrap();
        let mut scope = store.begin(&[Collection::Books], Mode::ReadWrite).await.unwrap();
        scope
            .put(Collection::Books, "b", &serde_json::json!({"songRefs": "nope"}))
            .await
            .unwrap();
        scope.commit().await.unwrap();

        let loaded = load_book(&store, None).await.unwrap();
        assert_eq!(loaded.book_id.as_deref(), Some("b"));
        assert_eq!(get_book(&store, "b").await.unwrap(), Some(Book::new("b")));
        assert!(codec::decode::<Book>(Collection::Books, "b", r#"{"id":"b"}"#).is_ok());
    }
}
