//! Collaborator interfaces and the change-tracking bridge.
//!
//! The engine does not own documents. It asks a [`DocumentStore`] whether a
//! document exists and which collection it belongs to, bumps its change
//! vector after every committed mutation, and forwards the added and removed
//! entries to every registered [`ChangeSubscriber`].

use crate::series::TimeSeriesEntry;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// The document store that owns the documents series hang off.
pub trait DocumentStore: Send + Sync {
    /// Returns true if the document exists.
    fn document_exists(&self, document_id: &str) -> bool;

    /// Returns the collection of the document, if known.
    fn collection_of(&self, document_id: &str) -> Option<String>;

    /// Advances the change vector of the document.
    fn bump_change_vector(&self, document_id: &str);
}

/// Receives committed series mutations, e.g. an indexer.
pub trait ChangeSubscriber: Send + Sync {
    /// Called once per committed mutation.
    fn on_series_changed(&self, change: &SeriesChange);
}

/// One committed mutation of one series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesChange {
    /// Owning document.
    pub document_id: String,
    /// Mutated series.
    pub series_name: String,
    /// Entries written, including overwrites.
    pub added: Vec<TimeSeriesEntry>,
    /// Entries removed or overwritten, with their previous values.
    pub removed: Vec<TimeSeriesEntry>,
    /// True if the whole series was replaced or dropped; subscribers should
    /// re-read it rather than apply the entry lists.
    pub reset: bool,
}

impl SeriesChange {
    pub(crate) fn new(document_id: &str, series_name: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            series_name: series_name.to_string(),
            added: Vec::new(),
            removed: Vec::new(),
            reset: false,
        }
    }

    /// Returns true if the change carries nothing to report.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && !self.reset
    }
}

/// Fans a committed change out to the document store and subscribers.
#[derive(Clone)]
pub(crate) struct ChangeBridge {
    store: Arc<dyn DocumentStore>,
    subscribers: Vec<Arc<dyn ChangeSubscriber>>,
}

impl ChangeBridge {
    pub(crate) fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            subscribers: Vec::new(),
        }
    }

    pub(crate) fn subscribe(&mut self, subscriber: Arc<dyn ChangeSubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub(crate) fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Bumps the change vector and notifies subscribers; empty changes are
    /// dropped.
    pub(crate) fn publish(&self, change: &SeriesChange) {
        if change.is_empty() {
            return;
        }
        self.store.bump_change_vector(&change.document_id);
        for subscriber in &self.subscribers {
            subscriber.on_series_changed(change);
        }
    }
}

/// In-memory [`DocumentStore`] for embedding and tests.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
}

#[derive(Debug)]
struct StoredDocument {
    collection: String,
    change_vector: u64,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a document.
    pub fn insert(&self, document_id: &str, collection: &str) {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        documents.insert(
            document_id.to_string(),
            StoredDocument {
                collection: collection.to_string(),
                change_vector: 0,
            },
        );
    }

    /// Removes a document.
    pub fn remove(&self, document_id: &str) -> bool {
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(document_id)
            .is_some()
    }

    /// Current change vector of a document.
    pub fn change_vector(&self, document_id: &str) -> Option<u64> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .map(|d| d.change_vector)
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn document_exists(&self, document_id: &str) -> bool {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(document_id)
    }

    fn collection_of(&self, document_id: &str) -> Option<String> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .map(|d| d.collection.clone())
    }

    fn bump_change_vector(&self, document_id: &str) {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(doc) = documents.get_mut(document_id) {
            doc.change_vector += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<SeriesChange>>);

    impl ChangeSubscriber for Recorder {
        fn on_series_changed(&self, change: &SeriesChange) {
            self.0.lock().unwrap().push(change.clone());
        }
    }

    #[test]
    fn test_publish_bumps_and_notifies() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.insert("users/ayende", "Users");
        let recorder = Arc::new(Recorder::default());
        let mut bridge = ChangeBridge::new(store.clone());
        bridge.subscribe(recorder.clone());

        let mut change = SeriesChange::new("users/ayende", "Heartrate");
        change.added.push(TimeSeriesEntry {
            timestamp: 1,
            tag: None,
            values: vec![59.0],
            is_rollup: false,
        });
        bridge.publish(&change);

        assert_eq!(store.change_vector("users/ayende"), Some(1));
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_change_is_dropped() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.insert("users/ayende", "Users");
        let bridge = ChangeBridge::new(store.clone());

        bridge.publish(&SeriesChange::new("users/ayende", "Heartrate"));
        assert_eq!(store.change_vector("users/ayende"), Some(0));
    }
}
