pub mod memory;
pub mod stops;

pub use memory::*;
pub use stops::*;

use std::future::Future;

use crate::model::stop::Stop;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("couldn't serialize feed metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// The table of stops. The feed refresher is the only writer.
pub trait StopStore: Clone + Send + Sync + 'static {
    /// Inserts or overwrites every stop in a single transaction.
    /// Either all of the stops are saved or none of them are.
    fn upsert_stops(
        &self,
        stops: &[Stop],
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// One stop chosen uniformly at random, `None` if the store is empty
    fn random_stop(&self) -> impl Future<Output = Result<Option<Stop>, StorageError>> + Send;

    fn get_stop(&self, id: &str) -> impl Future<Output = Result<Option<Stop>, StorageError>> + Send;

    fn count_stops(&self) -> impl Future<Output = Result<i64, StorageError>> + Send;
}
