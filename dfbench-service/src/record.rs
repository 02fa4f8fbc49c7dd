//! Observations of single benchmark runs and the store that collects them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use dfbench_types::{Downloader, SizeTier};
use uuid::Uuid;

use crate::metrics::MetricFamilies;

/// What was measured for one download.
#[derive(Clone, Debug)]
pub enum Observation {
    /// Timing taken around the download command.
    Timing {
        /// Wall-clock time the command was issued at.
        started_at: SystemTime,
        /// How long the command ran, measured on the monotonic clock.
        elapsed: Duration,
    },
    /// The client's metrics, scraped right after the download.
    Metrics(MetricFamilies),
}

/// One pod's observation of a single download.
#[derive(Clone, Debug)]
pub struct DownloadRecord {
    /// The pod that downloaded the file.
    pub pod: String,
    /// How the file was downloaded.
    pub downloader: Downloader,
    /// The size tier of the file.
    pub tier: SizeTier,
    /// What was measured.
    pub observation: Observation,
}

/// One pod's timing of a container start on the Nydus snapshotter.
#[derive(Clone, Debug)]
pub struct ContainerRun {
    /// The pod that started the container.
    pub pod: String,
    /// The image the container was started from.
    pub image: String,
    /// Wall-clock time the command was issued at.
    pub started_at: SystemTime,
    /// How long the container took to start and exit, measured on the monotonic clock.
    pub elapsed: Duration,
}

/// An append-only collection of records shared between concurrent tasks.
///
/// Each insert is keyed by a fresh id, so repeated runs on the same pod never overwrite each
/// other. Records are never updated or removed; the store lives as long as one benchmark.
#[derive(Debug)]
pub struct RecordStore<T> {
    records: Arc<Mutex<HashMap<Uuid, T>>>,
}

impl<T> RecordStore<T> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Adds a record and returns its id.
    pub fn insert(&self, record: T) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().insert(id, record);
        id
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Records are immutable, so a poisoned lock still guards a consistent map.
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, T>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> RecordStore<T> {
    /// Returns a copy of all records, in no particular order.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().values().cloned().collect()
    }
}

impl<T> Clone for RecordStore<T> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
        }
    }
}

impl<T> Default for RecordStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserts_never_overwrite() {
        let store = RecordStore::new();
        let a = store.insert("client-0");
        let b = store.insert("client-0");
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_inserts() {
        let store = RecordStore::new();
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.insert(i) })
            })
            .collect();
        futures::future::join_all(tasks).await;

        let mut records = store.snapshot();
        records.sort();
        assert_eq!(records, (0..32).collect::<Vec<_>>());
    }
}
