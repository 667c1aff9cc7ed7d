//! One live [`MapHandle`] per tag within a process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::core::Tag;
use crate::handle::MapHandle;

/// Tag to handle table. Entries are weak: the last caller to drop a handle
/// frees it, and the next load builds a fresh one.
#[derive(Default)]
pub struct MapRegistry {
    live: Mutex<HashMap<Tag, Weak<MapHandle>>>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<Tag, Weak<MapHandle>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, tag: &Tag) -> Option<Arc<MapHandle>> {
        let mut table = self.table();
        match table.get(tag).map(Weak::upgrade) {
            Some(Some(handle)) => Some(handle),
            Some(None) => {
                table.remove(tag);
                None
            }
            None => None,
        }
    }

    /// Return the live handle for `tag`, building and registering one with
    /// `load` if there is none.
    pub fn get_or_insert_with<E>(
        &self,
        tag: &Tag,
        load: impl FnOnce() -> Result<Arc<MapHandle>, E>,
    ) -> Result<Arc<MapHandle>, E> {
        let mut table = self.table();
        if let Some(handle) = table.get(tag).and_then(Weak::upgrade) {
            return Ok(handle);
        }
        let handle = load()?;
        table.insert(tag.clone(), Arc::downgrade(&handle));
        Ok(handle)
    }

    pub fn insert(&self, handle: &Arc<MapHandle>) {
        self.table().insert(handle.tag().clone(), Arc::downgrade(handle));
    }

    /// Drop `tag`'s entry only if it still points at `handle`.
    pub fn remove(&self, tag: &Tag, handle: &MapHandle) -> bool {
        let mut table = self.table();
        let matches = table
            .get(tag)
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), handle));
        if matches {
            table.remove(tag);
        }
        matches
    }

    /// Tags with a handle still alive somewhere in the process.
    pub fn live_tags(&self) -> Vec<Tag> {
        let mut table = self.table();
        table.retain(|_, weak| weak.strong_count() > 0);
        let mut tags: Vec<Tag> = table.keys().cloned().collect();
        tags.sort();
        tags
    }
}
