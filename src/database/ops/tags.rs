//! Tag name list and tag deletion

use futures_util::FutureExt;
use tracing::{info, warn};

use super::markers::put_existing_markers;
use crate::database::codec::{self, MarkerRecord};
use crate::database::store::{Mode, Scope, Store};
use crate::database::{Collection, Marker};
use crate::error::{Error, Result};

/// Id of the tag list record in the `settings` collection
pub const TAGS_KEY: &str = "tags";

/// Stored tag names in creation order. An unreadable list counts as empty.
async fn read_tag_names(scope: &mut Scope) -> Result<Vec<String>> {
    match scope.get::<Vec<String>>(Collection::Settings, TAGS_KEY).await {
        Ok(names) => Ok(names.unwrap_or_default()),
        Err(e) if e.is_absent() => {
            warn!("Discarding unreadable tag list: {}", e);
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

pub async fn list_tags(store: &Store) -> Result<Vec<String>> {
    store
        .with_collections(&[Collection::Settings], Mode::ReadOnly, |scope| {
            async move { read_tag_names(scope).await }.boxed()
        })
        .await
}

pub async fn create_tag(store: &Store, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::constraint("tag names must not be blank"));
    }

    let name = name.to_string();
    store
        .with_collections(&[Collection::Settings], Mode::ReadWrite, move |scope| {
            async move {
                let mut names = read_tag_names(scope).await?;
                if names.contains(&name) {
                    return Err(Error::constraint(format!("tag {name} already exists")));
                }
                info!("Created tag {}", name);
                names.push(name);
                scope.put(Collection::Settings, TAGS_KEY, &names).await
            }
            .boxed()
        })
        .await
}

/// Add any names not yet in the list. Returns how many were new.
pub async fn merge_tags(store: &Store, new_names: Vec<String>) -> Result<usize> {
    store
        .with_collections(&[Collection::Settings], Mode::ReadWrite, move |scope| {
            async move {
                let mut names = read_tag_names(scope).await?;
                let before = names.len();
                for name in new_names {
                    if !name.trim().is_empty() && !names.contains(&name) {
                        names.push(name);
                    }
                }
                let added = names.len() - before;
                if added > 0 {
                    scope.put(Collection::Settings, TAGS_KEY, &names).await?;
                }
                Ok(added)
            }
            .boxed()
        })
        .await
}

/// Drop `name` from the tag list and persist the markers the caller already
/// detached from it. The engine does not look for other markers carrying the
/// tag; handing in a marker that still carries it is rejected.
pub async fn delete_tag(store: &Store, name: &str, detached: &[Marker]) -> Result<()> {
    if let Some(marker) = detached.iter().find(|m| m.tags.contains(name)) {
        return Err(Error::constraint(format!(
            "marker {} still carries tag {name}",
            marker.id
        )));
    }

    let tag = name.to_string();
    let records: Vec<MarkerRecord> = detached.iter().map(codec::encode_marker).collect();
    let written = store
        .with_collections(
            &[Collection::Settings, Collection::Markers],
            Mode::ReadWrite,
            move |scope| {
                async move {
                    let written = put_existing_markers(scope, &records).await?;

                    let mut names = read_tag_names(scope).await?;
                    names.retain(|n| *n != tag);
                    scope.put(Collection::Settings, TAGS_KEY, &names).await?;
                    Ok(written)
                }
                .boxed()
            },
        )
        .await?;

    info!("Deleted tag {} ({} markers updated)", name, written);
    Ok(())
}
