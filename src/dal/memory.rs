use std::{collections::BTreeMap, sync::Arc};

use rand::Rng;
use tokio::sync::RwLock;

use crate::model::stop::Stop;

use super::{StopStore, StorageError};

/// Keeps the stops in memory. Used when no database is configured.
///
/// Upserts are applied to a copy of the table which then replaces the
/// old one, so readers see either the old or the new table.
#[derive(Clone, Debug, Default)]
pub struct MemoryStopStore {
    stops: Arc<RwLock<BTreeMap<String, Stop>>>,
}

impl MemoryStopStore {
    pub fn with_stops(stops: impl IntoIterator<Item = Stop>) -> Self {
        let stops = stops.into_iter().map(|s| (s.id.clone(), s)).collect();

        Self {
            stops: Arc::new(RwLock::new(stops)),
        }
    }

    /// Every stop ordered by id
    #[cfg(test)]
    pub async fn snapshot(&self) -> Vec<Stop> {
        self.stops.read().await.values().cloned().collect()
    }
}

impl StopStore for MemoryStopStore {
    async fn upsert_stops(&self, stops: &[Stop]) -> Result<u64, StorageError> {
        let mut table = self.stops.write().await;

        let mut updated = table.clone();
        for stop in stops {
            updated.insert(stop.id.clone(), stop.clone());
        }
        *table = updated;

        Ok(stops.len() as u64)
    }

    async fn random_stop(&self) -> Result<Option<Stop>, StorageError> {
        let table = self.stops.read().await;

        if table.is_empty() {
            return Ok(None);
        }

        let index = rand::rng().random_range(0..table.len());

        Ok(table.values().nth(index).cloned())
    }

    async fn get_stop(&self, id: &str) -> Result<Option<Stop>, StorageError> {
        Ok(self.stops.read().await.get(id).cloned())
    }

    async fn count_stops(&self) -> Result<i64, StorageError> {
        Ok(self.stops.read().await.len() as i64)
    }
}
