use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

use crate::{
    background_services::{
        archive::MAX_DECOMPRESSED_SIZE, feed_refresher::RefreshConfig,
        feed_source::MAX_DOWNLOAD_SIZE, supervisor::SupervisorConfig,
    },
    sampler::{DEFAULT_MAX_ATTEMPTS, SamplerConfig},
};

/// Serves a random transit stop near the caller, picked from a daily refreshed GTFS feed
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Config {
    /// Postgres connection string. Stops are kept in memory when unset.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "WMATA_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    #[arg(
        long,
        env = "FEED_URL",
        default_value = "https://api.wmata.com/gtfs/rail-bus-gtfs-static.zip"
    )]
    pub feed_url: String,

    /// Where the feed is extracted and its metadata kept
    #[arg(long, env = "DATA_DIR", default_value = "data/wmata")]
    pub data_dir: PathBuf,

    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    /// Origins allowed to call the API
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 30)]
    pub fetch_timeout_secs: u64,

    /// Larger feed downloads are rejected
    #[arg(long, env = "MAX_DOWNLOAD_MB", default_value_t = MAX_DOWNLOAD_SIZE / (1024 * 1024))]
    pub max_download_mb: u64,

    #[arg(long, env = "REFRESH_INTERVAL_HOURS", default_value_t = 24)]
    pub refresh_interval_hours: u32,

    #[arg(long, env = "RETRY_INITIAL_SECS", default_value_t = 60)]
    pub retry_initial_secs: u64,

    #[arg(long, env = "RETRY_MAX_SECS", default_value_t = 60 * 60)]
    pub retry_max_secs: u64,

    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    #[arg(long, env = "MAX_SAMPLE_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub max_sample_attempts: u32,

    #[arg(long, env = "LOG_DIR", default_value = "./logs")]
    pub log_dir: PathBuf,

    /// OTLP gRPC endpoint spans are exported to. No export when unset.
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            data_dir: self.data_dir.clone(),
            interval: chrono::Duration::hours(self.refresh_interval_hours.into()),
            max_decompressed_size: MAX_DECOMPRESSED_SIZE,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            refresh_interval: Duration::from_secs(u64::from(self.refresh_interval_hours) * 60 * 60),
            initial_backoff: Duration::from_secs(self.retry_initial_secs),
            max_backoff: Duration::from_secs(self.retry_max_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }

    pub fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            max_attempts: self.max_sample_attempts,
        }
    }
}
