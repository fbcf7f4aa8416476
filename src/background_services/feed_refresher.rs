//! Responsible for keeping the stops table in sync with the static GTFS feed
use std::{
    future::Future,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chrono::{DateTime, Duration, Utc};
use tracing::{Instrument, info, info_span, warn};

use crate::{
    dal::{StopStore, StorageError},
    model::feed_metadata::FeedMetadata,
};

use super::{
    archive::{ParseError, UnpackError, unpack_feed},
    clock::Clock,
    feed_source::{FeedSource, FetchError},
};

#[derive(Clone, Debug)]
pub struct RefreshConfig {
    /// Where the feed is extracted and metadata.json is kept
    pub data_dir: PathBuf,
    /// How long a fetched feed is considered fresh
    pub interval: Duration,
    pub max_decompressed_size: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The feed was still fresh, nothing was fetched
    Skipped { next_update: DateTime<Utc> },
    Updated { next_update: DateTime<Utc> },
}

#[derive(thiserror::Error, Debug)]
pub enum RefreshError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("refresh was cancelled")]
    Cancelled,
}

impl From<UnpackError> for RefreshError {
    fn from(e: UnpackError) -> Self {
        match e {
            UnpackError::Parse(e) => RefreshError::Parse(e),
            UnpackError::Storage(e) => RefreshError::Storage(e),
            UnpackError::Cancelled => RefreshError::Cancelled,
        }
    }
}

/// Sets the flag when dropped, which stops an unpack still running on the blocking pool
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

pub trait Refresh: Send + Sync + 'static {
    fn refresh(&self) -> impl Future<Output = Result<RefreshOutcome, RefreshError>> + Send;
}

pub struct FeedRefresher<S, F, C> {
    config: RefreshConfig,
    store: S,
    source: F,
    clock: C,
}

impl<S: StopStore, F: FeedSource, C: Clock> FeedRefresher<S, F, C> {
    pub fn new(config: RefreshConfig, store: S, source: F, clock: C) -> Self {
        Self {
            config,
            store,
            source,
            clock,
        }
    }
}

impl<S: StopStore, F: FeedSource, C: Clock> Refresh for FeedRefresher<S, F, C> {
    /// Fetches the feed and saves its stops unless the last fetch is still fresh.
    /// The metadata is only written once the stops are committed, so a failed
    /// refresh is retried on the next call.
    #[tracing::instrument(err, skip(self))]
    async fn refresh(&self) -> Result<RefreshOutcome, RefreshError> {
        if let Some(metadata) = FeedMetadata::read(&self.config.data_dir).await {
            if self.clock.now() < metadata.next_update {
                // the metadata outlives an in-memory store or a wiped database
                if self.store.count_stops().await? == 0 {
                    warn!("GTFS valid until {} but no stops are saved", metadata.next_update);
                } else {
                    info!("GTFS still valid until {}, skipping update", metadata.next_update);
                    return Ok(RefreshOutcome::Skipped {
                        next_update: metadata.next_update,
                    });
                }
            }
        }

        let archive = self.source.fetch().await?;

        let data_dir = self.config.data_dir.clone();
        let max_size = self.config.max_decompressed_size;
        let cancelled = Arc::new(AtomicBool::new(false));
        let _cancel_on_drop = CancelOnDrop(cancelled.clone());

        let stops = tokio::task::spawn_blocking(move || {
            unpack_feed(&archive, &data_dir, max_size, &cancelled)
        })
        .instrument(info_span!("Unpacking feed"))
        .await
        .map_err(StorageError::from)??;

        if stops.is_empty() {
            warn!("feed contains no stops");
        }

        let saved = self.store.upsert_stops(&stops).await?;

        let metadata = FeedMetadata::new(self.clock.now(), self.config.interval);
        metadata.write(&self.config.data_dir).await?;

        info!(
            saved,
            "Updated at {}, next at {}", metadata.time, metadata.next_update
        );

        Ok(RefreshOutcome::Updated {
            next_update: metadata.next_update,
        })
    }
}
