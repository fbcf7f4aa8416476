use anyhow::{Context, Result};
use axum::http::HeaderValue;
use background_services::{
    clock::SystemClock, feed_refresher::FeedRefresher, feed_source::HttpFeedSource, supervisor,
};
use clap::Parser;
use config::Config;
use dal::{MemoryStopStore, PgStopStore, StopStore};
use dotenvy::dotenv;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use sampler::NearbyStopSampler;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};
use web::{AppState, create_router};

mod background_services;
mod config;
mod dal;
mod model;
mod sampler;
mod utils;
mod web;

const SERVICE_NAME: &str = "random_stop";

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    _ = dotenv();
    let config = Config::parse();

    let (_guard, provider) = init_tracing(&config)?;

    let result = match config.database_url.clone() {
        Some(db_url) => {
            let store = PgStopStore::connect(&db_url)
                .await
                .context("couldn't connect to the database")?;
            run(config, store).await
        }
        None => {
            warn!("DATABASE_URL isn't set, stops are only kept in memory");
            run(config, MemoryStopStore::default()).await
        }
    };

    if let Err(e) = &result {
        error!("{e:?}");
    }

    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("couldn't flush spans: {e}");
        }
    }

    result
}

async fn run<S: StopStore>(config: Config, store: S) -> Result<()> {
    let cors_origins = config
        .cors_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("invalid CORS origin {origin}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("couldn't bind {}", config.bind_addr))?;

    info!("{} stops in store", store.count_stops().await?);

    let source = HttpFeedSource::new(
        config.feed_url.clone(),
        config.api_key.clone(),
        config.fetch_timeout(),
    )?
    .with_max_size(config.max_download_mb * 1024 * 1024);
    let refresher = FeedRefresher::new(config.refresh_config(), store.clone(), source, SystemClock);
    let refresh_handle = supervisor::start(refresher, SystemClock, config.supervisor_config());

    let sampler = NearbyStopSampler::new(store.clone(), config.sampler_config());
    let app = create_router(AppState::new(store, sampler), cors_origins);

    info!("listening on {}", config.bind_addr);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    refresh_handle.shutdown().await;

    Ok(served?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("couldn't listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("couldn't listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutting down");
}

fn init_tracing(config: &Config) -> Result<(WorkerGuard, Option<SdkTracerProvider>)> {
    let provider = match &config.otlp_endpoint {
        Some(endpoint) => {
            let exporter = SpanExporter::builder()
                .with_tonic()
                .with_endpoint(endpoint.as_str())
                .with_timeout(Duration::from_millis(1000))
                .build()
                .context("couldn't build the OTLP exporter")?;

            Some(
                SdkTracerProvider::builder()
                    .with_batch_exporter(exporter)
                    .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
                    .build(),
            )
        }
        None => None,
    };

    let telemetry_layer = provider
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)));

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let appender = tracing_appender::rolling::daily(&config.log_dir, "random_stop.log");
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(appender);

    // A layer that logs events to rolling files.
    let file_log = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_appender)
        .with_ansi(false)
        .pretty();

    Registry::default()
        .with(telemetry_layer)
        .with(file_log)
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    Ok((guard, provider))
}
