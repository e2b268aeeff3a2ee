//! Book record operations

use futures_util::FutureExt;
use tracing::{debug, info, warn};

use crate::database::store::{Mode, Store};
use crate::database::{Book, Collection};
use crate::error::{Error, Result};

/// Insert an empty book unless one with `id` exists. Returns whether it was created.
pub async fn create_book(store: &Store, id: &str) -> Result<bool> {
    let book = Book::new(id);
    let created = store
        .with_collections(&[Collection::Books], Mode::ReadWrite, move |scope| {
            async move { scope.insert_new(Collection::Books, &book.id, &book).await }.boxed()
        })
        .await?;

    if created {
        info!("Created book {}", id);
    }
    Ok(created)
}

/// Get book by id
pub async fn get_book(store: &Store, id: &str) -> Result<Option<Book>> {
    let id = id.to_string();
    store
        .with_collections(&[Collection::Books], Mode::ReadOnly, move |scope| {
            async move { scope.get::<Book>(Collection::Books, &id).await }.boxed()
        })
        .await
}

/// Id of the oldest book record, if any
pub async fn first_book_id(store: &Store) -> Result<Option<String>> {
    let keys = store
        .with_collections(&[Collection::Books], Mode::ReadOnly, |scope| {
            async move { scope.keys(Collection::Books).await }.boxed()
        })
        .await?;
    Ok(keys.into_iter().next())
}

/// Overwrite a book record wholesale
pub async fn put_book(store: &Store, book: &Book) -> Result<()> {
    let book = book.clone();
    store
        .with_collections(&[Collection::Books], Mode::ReadWrite, move |scope| {
            async move { scope.put(Collection::Books, &book.id, &book).await }.boxed()
        })
        .await
}

/// Remove the book record only; songs are left in place
pub async fn delete_book(store: &Store, id: &str) -> Result<bool> {
    let id = id.to_string();
    store
        .with_collections(&[Collection::Books], Mode::ReadWrite, move |scope| {
            async move { scope.delete(Collection::Books, &id).await }.boxed()
        })
        .await
}

/// Remove every book record, returning how many existed
pub async fn delete_all_books(store: &Store) -> Result<u64> {
    store
        .with_collections(&[Collection::Books], Mode::ReadWrite, |scope| {
            async move { scope.clear(Collection::Books).await }.boxed()
        })
        .await
}

/// Append a song id to the book's `song_refs` unless already present
pub async fn append_song_ref(store: &Store, book_id: &str, song_id: &str) -> Result<()> {
    let book_id = book_id.to_string();
    let song_id = song_id.to_string();
    store
        .with_collections(&[Collection::Books], Mode::ReadWrite, move |scope| {
            async move {
                let mut book: Book = scope
                    .get(Collection::Books, &book_id)
                    .await?
                    .ok_or_else(|| Error::not_found(Collection::Books, book_id.as_str()))?;

                if book.song_refs.contains(&song_id) {
                    return Ok(());
                }
                book.song_refs.push(song_id);
                scope.put(Collection::Books, &book_id, &book).await
            }
            .boxed()
        })
        .await
}

/// Drop song ids from the book's `song_refs`. Returns how many were removed;
/// a missing book removes nothing.
pub async fn remove_song_refs(store: &Store, book_id: &str, song_ids: &[String]) -> Result<usize> {
    if song_ids.is_empty() {
        return Ok(0);
    }

    let book_id = book_id.to_string();
    let song_ids = song_ids.to_vec();
    let removed = store
        .with_collections(&[Collection::Books], Mode::ReadWrite, move |scope| {
            async move {
                let Some(mut book) = scope.get::<Book>(Collection::Books, &book_id).await? else {
                    warn!("Book {} vanished before pruning song refs", book_id);
                    return Ok(0);
                };

                let before = book.song_refs.len();
                book.song_refs.retain(|id| !song_ids.contains(id));
                let removed = before - book.song_refs.len();
                if removed > 0 {
                    scope.put(Collection::Books, &book_id, &book).await?;
                }
                Ok(removed)
            }
            .boxed()
        })
        .await?;

    debug!("Pruned {} song refs", removed);
    Ok(removed)
}
