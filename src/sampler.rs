//! Picking a random stop within a distance band of the user
use tracing::debug;

use crate::{
    dal::{StopStore, StorageError},
    model::stop::Stop,
    utils::{Coordinate, haversine_miles},
};

pub const DEFAULT_MIN_MILES: f64 = 0.5;
pub const DEFAULT_MAX_MILES: f64 = 2.0;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1000;

#[derive(thiserror::Error, Debug)]
pub enum SampleError {
    #[error("there are no stops to choose from")]
    EmptyStore,

    #[error("invalid distance range {min}..{max}, expected 0 <= min <= max")]
    InvalidRange { min: f64, max: f64 },

    #[error("invalid location {lat}, {long}")]
    InvalidLocation { lat: f64, long: f64 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Inclusive range of accepted distances in miles
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceBand {
    min_miles: f64,
    max_miles: f64,
}

impl DistanceBand {
    pub fn new(min_miles: f64, max_miles: f64) -> Result<Self, SampleError> {
        let valid = min_miles.is_finite()
            && max_miles.is_finite()
            && 0.0 <= min_miles
            && min_miles <= max_miles;

        if !valid {
            return Err(SampleError::InvalidRange {
                min: min_miles,
                max: max_miles,
            });
        }

        Ok(Self {
            min_miles,
            max_miles,
        })
    }

    pub fn contains(&self, miles: f64) -> bool {
        self.min_miles <= miles && miles <= self.max_miles
    }
}

impl Default for DistanceBand {
    fn default() -> Self {
        Self {
            min_miles: DEFAULT_MIN_MILES,
            max_miles: DEFAULT_MAX_MILES,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SamplerConfig {
    /// Random draws before giving up. A store with few or no stops inside the
    /// band would otherwise keep the request spinning forever.
    pub max_attempts: u32,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NearbyStopSampler<S> {
    store: S,
    config: SamplerConfig,
}

impl<S: StopStore> NearbyStopSampler<S> {
    pub fn new(store: S, config: SamplerConfig) -> Self {
        Self { store, config }
    }

    /// Draws random stops (with replacement) until one lies within `band` of
    /// `location`. `None` if no draw matched within the attempt budget.
    #[tracing::instrument(err, skip(self))]
    pub async fn find_nearby(
        &self,
        location: Coordinate,
        band: DistanceBand,
    ) -> Result<Option<Stop>, SampleError> {
        if !location.is_valid() {
            return Err(SampleError::InvalidLocation {
                lat: location.lat,
                long: location.long,
            });
        }

        for attempt in 1..=self.config.max_attempts {
            let Some(stop) = self.store.random_stop().await? else {
                return Err(SampleError::EmptyStore);
            };

            let miles = haversine_miles(location, stop.coordinate());
            if band.contains(miles) {
                debug!(attempt, miles, stop_id = %stop.id, "found stop");
                return Ok(Some(stop));
            }
        }

        debug!(
            attempts = self.config.max_attempts,
            "no stop within range"
        );

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::{dal::MemoryStopStore, utils::EARTH_RADIUS_MILES};

    const ORIGIN: Coordinate = Coordinate {
        lat: 38.898303,
        long: -77.028099,
    };

    /// A stop `miles` due north of [`ORIGIN`]
    fn stop_north(id: &str, miles: f64) -> Stop {
        let lat = ORIGIN.lat + (miles / EARTH_RADIUS_MILES).to_degrees();

        Stop {
            id: id.to_string(),
            name: format!("{miles} miles north"),
            stop_lat: lat,
            stop_long: ORIGIN.long,
            stop_lat_raw: lat.to_string(),
            stop_long_raw: ORIGIN.long.to_string(),
        }
    }

    #[derive(Clone, Default)]
    struct CountingStore {
        inner: MemoryStopStore,
        draws: Arc<AtomicU32>,
    }

    impl StopStore for CountingStore {
        async fn upsert_stops(&self, stops: &[Stop]) -> Result<u64, StorageError> {
            self.inner.upsert_stops(stops).await
        }

        async fn random_stop(&self) -> Result<Option<Stop>, StorageError> {
            self.draws.fetch_add(1, Ordering::SeqCst);
            self.inner.random_stop().await
        }

        async fn get_stop(&self, id: &str) -> Result<Option<Stop>, StorageError> {
            self.inner.get_stop(id).await
        }

        async fn count_stops(&self) -> Result<i64, StorageError> {
            self.inner.count_stops().await
        }
    }

    #[test]
    fn test_stops_are_where_expected() {
        let stop = stop_north("x", 1.0);

        assert!((haversine_miles(ORIGIN, stop.coordinate()) - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn only_returns_stop_inside_band() {
        let store = MemoryStopStore::with_stops([
            stop_north("near", 0.1),
            stop_north("inside", 1.0),
            stop_north("far", 5.0),
        ]);
        let sampler = NearbyStopSampler::new(store, SamplerConfig::default());

        for _ in 0..200 {
            let stop = sampler
                .find_nearby(ORIGIN, DistanceBand::new(0.5, 2.0).unwrap())
                .await
                .unwrap()
                .expect("a stop is inside the band");

            assert_eq!(stop.id, "inside");
        }
    }

    #[tokio::test]
    async fn empty_store_is_an_error() {
        let sampler = NearbyStopSampler::new(MemoryStopStore::default(), SamplerConfig::default());

        let err = sampler
            .find_nearby(ORIGIN, DistanceBand::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SampleError::EmptyStore));
    }

    #[tokio::test]
    async fn gives_up_after_attempt_budget() {
        let store = CountingStore {
            inner: MemoryStopStore::with_stops([stop_north("near", 0.1), stop_north("far", 5.0)]),
            ..Default::default()
        };
        let sampler = NearbyStopSampler::new(store.clone(), SamplerConfig { max_attempts: 1000 });

        let found = sampler
            .find_nearby(ORIGIN, DistanceBand::default())
            .await
            .unwrap();

        assert_eq!(found, None);
        assert_eq!(store.draws.load(Ordering::SeqCst), 1000);
    }

    #[tokio::test]
    async fn band_bounds_are_inclusive() {
        let store = MemoryStopStore::with_stops([stop_north("exact", 1.0)]);
        let sampler = NearbyStopSampler::new(store, SamplerConfig { max_attempts: 1 });
        let miles = haversine_miles(ORIGIN, stop_north("exact", 1.0).coordinate());

        let found = sampler
            .find_nearby(ORIGIN, DistanceBand::new(miles, miles).unwrap())
            .await
            .unwrap();

        assert_eq!(found.map(|s| s.id), Some("exact".to_string()));
    }

    #[tokio::test]
    async fn invalid_location_is_rejected() {
        let store = MemoryStopStore::with_stops([stop_north("inside", 1.0)]);
        let sampler = NearbyStopSampler::new(store, SamplerConfig::default());

        let err = sampler
            .find_nearby(Coordinate::new(91.0, 0.0), DistanceBand::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SampleError::InvalidLocation { .. }));
    }

    #[test]
    fn distance_band_validation() {
        assert!(DistanceBand::new(0.0, 0.0).is_ok());
        assert!(DistanceBand::new(0.5, 2.0).is_ok());
        assert!(DistanceBand::new(2.0, 0.5).is_err());
        assert!(DistanceBand::new(-1.0, 2.0).is_err());
        assert!(DistanceBand::new(0.5, f64::NAN).is_err());
        assert!(DistanceBand::new(0.5, f64::INFINITY).is_err());
    }
}
