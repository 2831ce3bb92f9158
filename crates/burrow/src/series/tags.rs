//! Append-only tag intern table.
//!
//! Tags are entity references such as `"watches/fitbit"`. Entries carry a
//! compact [`TagId`] instead of repeating the string. The table never shrinks:
//! once issued, an id stays valid for the lifetime of the engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Compact identifier of an interned tag string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(u32);

impl TagId {
    /// Returns the raw id.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct TagTableInner {
    by_name: HashMap<Arc<str>, TagId>,
    names: Vec<Arc<str>>,
}

/// Shared, read-mostly tag dictionary.
///
/// Lookups take a read lock; only the first sighting of a new string takes
/// the write lock.
#[derive(Debug, Default)]
pub struct TagTable {
    inner: RwLock<TagTableInner>,
}

impl TagTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `tag`, interning it on first use.
    pub fn intern(&self, tag: &str) -> TagId {
        if let Some(id) = self.lookup(tag) {
            return id;
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have won the race between the two locks.
        if let Some(&id) = inner.by_name.get(tag) {
            return id;
        }
        let id = TagId(inner.names.len() as u32);
        let name: Arc<str> = Arc::from(tag);
        inner.names.push(Arc::clone(&name));
        inner.by_name.insert(name, id);
        id
    }

    /// Returns the id of an already interned tag.
    pub fn lookup(&self, tag: &str) -> Option<TagId> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_name.get(tag).copied()
    }

    /// Returns the string behind `id`.
    pub fn resolve(&self, id: TagId) -> Option<Arc<str>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.names.get(id.0 as usize).cloned()
    }

    /// Number of distinct tags interned so far.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .names
            .len()
    }

    /// Returns true if no tag has been interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
