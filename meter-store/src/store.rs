use std::collections::HashMap;

use async_trait::async_trait;
use meter_metrics::MetricSample;

use crate::file::SnapshotError;

/// An error returned by a [`MetricStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Strict lookups only: some requested metrics do not exist.
    #[error("metrics not found: {}", .0.join(", "))]
    NotFound(Vec<String>),

    /// The database rejected a query or could not be reached.
    #[error("database operation failed")]
    Database(#[from] sqlx::Error),

    /// A row holds neither a counter nor a gauge value.
    #[error("stored row for metric `{0}` has no value")]
    CorruptRow(String),

    /// Reading or writing the snapshot file failed.
    #[error("snapshot operation failed")]
    Snapshot(#[from] SnapshotError),

    /// A batch was only partially applied.
    #[error("applied {applied} of {total} samples")]
    Partial {
        /// Number of samples applied before the failure.
        applied: usize,
        /// Number of samples in the batch.
        total: usize,
        /// The error that stopped the batch.
        #[source]
        source: Box<StoreError>,
    },
}

/// The result of [`MetricStore::get_many`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Lookup {
    /// Samples that exist, in the order they were requested.
    pub found: Vec<MetricSample>,
    /// Requested names that do not exist, in the order they were requested.
    pub missing: Vec<String>,
}

impl Lookup {
    /// Splits the requested names into found and missing ones.
    pub(crate) fn from_entries(
        names: &[String],
        mut entries: HashMap<String, MetricSample>,
    ) -> Self {
        let mut lookup = Lookup::default();
        for name in names {
            match entries.remove(name) {
                Some(sample) => lookup.found.push(sample),
                None if lookup.found.iter().any(|s| s.name() == name) => {}
                None => lookup.missing.push(name.clone()),
            }
        }
        lookup
    }

    /// Returns the found samples, or [`StoreError::NotFound`] if any name is missing.
    pub fn into_strict(self) -> Result<Vec<MetricSample>, StoreError> {
        if self.missing.is_empty() {
            Ok(self.found)
        } else {
            Err(StoreError::NotFound(self.missing))
        }
    }
}

/// A key-value store of metric samples with merge semantics.
///
/// Implementations must be safe for any number of concurrent callers. A `set` followed by a
/// `get` of the same key from the same task observes the write. No atomicity across keys is
/// guaranteed.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Merges the sample into the store and returns the resulting entry.
    async fn set(&self, sample: MetricSample) -> Result<MetricSample, StoreError>;

    /// Merges all samples in order and returns the resulting entries.
    ///
    /// Each sample is applied atomically, the batch as a whole is not. On failure, the samples
    /// before the failing one remain applied and [`StoreError::Partial`] reports how many.
    async fn set_many(&self, batch: Vec<MetricSample>) -> Result<Vec<MetricSample>, StoreError> {
        let total = batch.len();
        let mut stored = Vec::with_capacity(total);

        for sample in batch {
            match self.set(sample).await {
                Ok(sample) => stored.push(sample),
                Err(error) => {
                    return Err(StoreError::Partial {
                        applied: stored.len(),
                        total,
                        source: Box::new(error),
                    });
                }
            }
        }

        Ok(stored)
    }

    /// Returns the entry for `name`, if it exists.
    async fn get(&self, name: &str) -> Result<Option<MetricSample>, StoreError>;

    /// Looks up several entries at once.
    async fn get_many(&self, names: &[String]) -> Result<Lookup, StoreError>;

    /// Returns all entries in unspecified order.
    async fn get_all(&self) -> Result<Vec<MetricSample>, StoreError>;

    /// Returns `true` if the store can serve requests.
    async fn health(&self) -> bool;

    /// Returns `true` if every write is already durable.
    ///
    /// Durable stores are never snapshotted.
    fn is_durable(&self) -> bool {
        false
    }

    /// Writes the current contents to durable storage, if the backend has any.
    async fn persist(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_lookup_splits_found_and_missing() {
        let a = MetricSample::gauge("a", 1.0).unwrap();
        let c = MetricSample::counter("c", 3).unwrap();
        let entries = HashMap::from([("a".to_owned(), a.clone()), ("c".to_owned(), c.clone())]);

        let lookup = Lookup::from_entries(&names(&["c", "b", "a"]), entries);
        assert_eq!(lookup.found, vec![c, a]);
        assert_eq!(lookup.missing, names(&["b"]));
    }

    #[test]
    fn test_lookup_duplicate_names() {
        let a = MetricSample::gauge("a", 1.0).unwrap();
        let entries = HashMap::from([("a".to_owned(), a.clone())]);

        let lookup = Lookup::from_entries(&names(&["a", "a"]), entries);
        assert_eq!(lookup.found, vec![a]);
        assert!(lookup.missing.is_empty());
    }

    #[test]
    fn test_strict_lookup() {
        let lookup = Lookup {
            found: vec![],
            missing: names(&["x", "y"]),
        };
        let error = lookup.into_strict().unwrap_err();
        assert_eq!(error.to_string(), "metrics not found: x, y");

        assert_eq!(Lookup::default().into_strict().unwrap(), vec![]);
    }
}
