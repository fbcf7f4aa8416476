use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dal::StorageError;

pub const METADATA_FILE: &str = "metadata.json";

/// Written beside the extracted feed after every successful refresh
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedMetadata {
    /// When the feed was last fetched
    pub time: DateTime<Utc>,
    /// No refresh is attempted before this instant
    pub next_update: DateTime<Utc>,
}

impl FeedMetadata {
    pub fn new(now: DateTime<Utc>, interval: Duration) -> Self {
        Self {
            time: now,
            next_update: now + interval,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.next_update > self.time
    }

    /// Returns `None` when the file is missing or its contents can't be trusted,
    /// which means the feed has to be refreshed.
    pub async fn read(data_dir: &Path) -> Option<Self> {
        let path = data_dir.join(METADATA_FILE);

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), "couldn't read feed metadata: {e}");
                return None;
            }
        };

        match serde_json::from_str::<FeedMetadata>(&contents) {
            Ok(metadata) if metadata.is_valid() => Some(metadata),
            Ok(metadata) => {
                warn!(?metadata, "feed metadata has next_update before time");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), "invalid feed metadata: {e}");
                None
            }
        }
    }

    /// Replaces the metadata file atomically
    pub async fn write(&self, data_dir: &Path) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(self)?;

        let tmp_path = data_dir.join(format!("{METADATA_FILE}.tmp"));
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, data_dir.join(METADATA_FILE)).await?;

        Ok(())
    }
}
