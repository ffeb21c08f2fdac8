use std::collections::HashMap;
use std::collections::hash_map::Entry;

use async_trait::async_trait;
use meter_metrics::MetricSample;
use parking_lot::RwLock;

use crate::store::{Lookup, MetricStore, StoreError};

/// An in-memory [`MetricStore`].
///
/// Writes take an exclusive lock for the duration of a single merge, so concurrent writers to
/// the same key never lose updates. This backend never fails.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, MetricSample>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that contains the given samples, merged in order.
    pub fn with_samples(samples: impl IntoIterator<Item = MetricSample>) -> Self {
        let store = Self::new();
        {
            let mut entries = store.entries.write();
            for sample in samples {
                merge_into(&mut entries, sample);
            }
        }
        store
    }

    /// Replaces the entire contents of the store.
    pub fn replace(&self, samples: impl IntoIterator<Item = MetricSample>) {
        let fresh = samples
            .into_iter()
            .map(|sample| (sample.name().to_owned(), sample))
            .collect();
        *self.entries.write() = fresh;
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub(crate) fn set_sync(&self, sample: MetricSample) -> MetricSample {
        merge_into(&mut self.entries.write(), sample)
    }

    pub(crate) fn set_many_sync(&self, batch: Vec<MetricSample>) -> Vec<MetricSample> {
        batch.into_iter().map(|sample| self.set_sync(sample)).collect()
    }

    pub(crate) fn get_sync(&self, name: &str) -> Option<MetricSample> {
        self.entries.read().get(name).cloned()
    }

    pub(crate) fn get_many_sync(&self, names: &[String]) -> Lookup {
        let entries = self.entries.read();
        let found = names
            .iter()
            .filter_map(|name| entries.get(name).map(|s| (name.clone(), s.clone())))
            .collect();
        Lookup::from_entries(names, found)
    }

    pub(crate) fn get_all_sync(&self) -> Vec<MetricSample> {
        self.entries.read().values().cloned().collect()
    }
}

fn merge_into(entries: &mut HashMap<String, MetricSample>, sample: MetricSample) -> MetricSample {
    match entries.entry(sample.name().to_owned()) {
        Entry::Occupied(mut entry) => {
            let merged = entry.get().merge(&sample);
            entry.insert(merged.clone());
            merged
        }
        Entry::Vacant(entry) => entry.insert(sample).clone(),
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn set(&self, sample: MetricSample) -> Result<MetricSample, StoreError> {
        Ok(self.set_sync(sample))
    }

    async fn set_many(&self, batch: Vec<MetricSample>) -> Result<Vec<MetricSample>, StoreError> {
        Ok(self.set_many_sync(batch))
    }

    async fn get(&self, name: &str) -> Result<Option<MetricSample>, StoreError> {
        Ok(self.get_sync(name))
    }

    async fn get_many(&self, names: &[String]) -> Result<Lookup, StoreError> {
        Ok(self.get_many_sync(names))
    }

    async fn get_all(&self) -> Result<Vec<MetricSample>, StoreError> {
        Ok(self.get_all_sync())
    }

    async fn health(&self) -> bool {
        true
    }
}
