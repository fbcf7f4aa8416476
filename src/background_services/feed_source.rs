//! Downloading the static GTFS archive
use std::{future::Future, time::Duration};

use futures::StreamExt;
use reqwest::{
    Client, StatusCode,
    header::{CACHE_CONTROL, HeaderValue},
};
use tracing::{Instrument, info, info_span};

/// Maximum allowed download size of the feed archive (500 MB)
pub const MAX_DOWNLOAD_SIZE: u64 = 500 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("error fetching the feed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed endpoint responded with {status}")]
    Status { status: StatusCode },

    #[error("feed is larger than {limit} bytes")]
    TooLarge { limit: u64 },
}

pub trait FeedSource: Send + Sync + 'static {
    /// The raw bytes of the zipped feed
    fn fetch(&self) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;
}

#[derive(Clone, Debug)]
pub struct HttpFeedSource {
    client: Client,
    url: String,
    api_key: String,
    max_size: u64,
}

impl HttpFeedSource {
    pub fn new(url: String, api_key: String, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url,
            api_key,
            max_size: MAX_DOWNLOAD_SIZE,
        })
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }
}

impl FeedSource for HttpFeedSource {
    #[tracing::instrument(err, skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(&self.url)
            .header("api_key", &self.api_key)
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .send()
            .instrument(info_span!("Fetching feed"))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { status });
        }

        if response.content_length().is_some_and(|len| len > self.max_size) {
            return Err(FetchError::TooLarge {
                limit: self.max_size,
            });
        }

        let mut body = vec![];
        let mut stream = response.bytes_stream();

        async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                if body.len() as u64 + chunk.len() as u64 > self.max_size {
                    return Err(FetchError::TooLarge {
                        limit: self.max_size,
                    });
                }
                body.extend_from_slice(&chunk);
            }
            Ok::<(), FetchError>(())
        }
        .instrument(info_span!("Reading body of response"))
        .await?;

        info!("downloaded {} bytes", body.len());

        Ok(body)
    }
}
