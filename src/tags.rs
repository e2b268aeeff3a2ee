//! Tag set and the applied-tag index
//!
//! Tag membership is derived from marker records during hydration and
//! never persisted on its own. Only the tag names are stored.

use std::collections::{BTreeMap, BTreeSet};

use crate::database::{Marker, Song};

/// Tag name -> ids of the markers carrying it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagIndex {
    applied: BTreeMap<String, BTreeSet<String>>,
}

impl TagIndex {
    /// Build from the stored tag names plus whatever the markers carry.
    /// A marker may reference a name missing from the stored list; the name
    /// is kept so the tag stays visible and deletable.
    pub fn build<I, S>(names: I, songs: &[Song]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = Self::default();
        for name in names {
            index.insert_name(name);
        }
        for marker in songs.iter().flat_map(|song| song.markers.iter()) {
            index.index_marker(marker);
        }
        index
    }

    /// Known tag names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.applied.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.applied.contains_key(name)
    }

    /// Number of markers the tag is applied to
    pub fn usage(&self, name: &str) -> usize {
        self.applied.get(name).map_or(0, BTreeSet::len)
    }

    /// Returns false if the name was already known
    pub fn insert_name(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.applied.contains_key(&name) {
            return false;
        }
        self.applied.insert(name, BTreeSet::new());
        true
    }

    pub fn index_marker(&mut self, marker: &Marker) {
        for tag in &marker.tags {
            self.applied
                .entry(tag.clone())
                .or_default()
                .insert(marker.id.clone());
        }
    }

    pub fn apply(&mut self, name: &str, marker_id: &str) {
        self.applied
            .entry(name.to_string())
            .or_default()
            .insert(marker_id.to_string());
    }

    pub fn unapply(&mut self, name: &str, marker_id: &str) {
        if let Some(markers) = self.applied.get_mut(name) {
            markers.remove(marker_id);
        }
    }

    /// Forget a tag name and every application of it
    pub fn remove_name(&mut self, name: &str) -> bool {
        self.applied.remove(name).is_some()
    }

    /// Drop a deleted marker from every tag
    pub fn forget_marker(&mut self, marker_id: &str) {
        for markers in self.applied.values_mut() {
            markers.remove(marker_id);
        }
    }

    /// Remove `name` from the index and from every marker in `songs` that
    /// carries it. Returns the changed markers, ready to be persisted.
    pub fn detach(&mut self, name: &str, songs: &mut [Song]) -> Vec<Marker> {
        self.applied.remove(name);

        songs
            .iter_mut()
            .flat_map(|song| song.markers.iter_mut())
            .filter_map(|marker| marker.tags.remove(name).then(|| marker.clone()))
            .collect()
    }
}
