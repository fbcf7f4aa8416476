//! HTTP routes
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::error;

use crate::{
    dal::{StopStore, StorageError},
    sampler::{DEFAULT_MAX_MILES, DEFAULT_MIN_MILES, DistanceBand, NearbyStopSampler, SampleError},
    utils::Coordinate,
};

#[derive(Clone)]
pub struct AppState<S> {
    pub store: S,
    pub sampler: Arc<NearbyStopSampler<S>>,
}

impl<S: StopStore> AppState<S> {
    pub fn new(store: S, sampler: NearbyStopSampler<S>) -> Self {
        Self {
            store,
            sampler: Arc::new(sampler),
        }
    }
}

pub fn create_router<S: StopStore>(state: AppState<S>, cors_origins: Vec<HeaderValue>) -> Router {
    Router::new()
        .route("/random_stop", get(random_stop::<S>))
        .route("/stops/{id}", get(get_stop::<S>))
        .route("/health", get(health))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET]),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct RandomStopQuery {
    pub user_lat: f64,
    pub user_long: f64,
    #[serde(default = "default_min_range")]
    pub min_range: f64,
    #[serde(default = "default_max_range")]
    pub max_range: f64,
}

fn default_min_range() -> f64 {
    DEFAULT_MIN_MILES
}

fn default_max_range() -> f64 {
    DEFAULT_MAX_MILES
}

async fn health() -> &'static str {
    "ok"
}

/// A random stop between `min_range` and `max_range` miles from the user,
/// or `{}` if none was found
async fn random_stop<S: StopStore>(
    State(state): State<AppState<S>>,
    Query(query): Query<RandomStopQuery>,
) -> Result<Response, AppError> {
    let location = Coordinate::new(query.user_lat, query.user_long);
    let band = DistanceBand::new(query.min_range, query.max_range)?;

    let response = match state.sampler.find_nearby(location, band).await? {
        Some(stop) => Json(stop).into_response(),
        None => Json(json!({})).into_response(),
    };

    Ok(response)
}

async fn get_stop<S: StopStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    match state.store.get_stop(&id).await? {
        Some(stop) => Ok(Json(stop).into_response()),
        None => Err(AppError::NotFound {
            message: format!("no stop with id {id}"),
        }),
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest { message: String },
    NotFound { message: String },
    NotReady { message: String },
    Internal { message: String },
}

impl From<SampleError> for AppError {
    fn from(e: SampleError) -> Self {
        match e {
            SampleError::InvalidRange { .. } | SampleError::InvalidLocation { .. } => {
                AppError::BadRequest {
                    message: e.to_string(),
                }
            }
            SampleError::EmptyStore => AppError::NotReady {
                message: "stops haven't been loaded yet".to_string(),
            },
            SampleError::Storage(e) => e.into(),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        error!("{e}");
        AppError::Internal {
            message: "storage error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest { message } => (StatusCode::BAD_REQUEST, message),
            AppError::NotFound { message } => (StatusCode::NOT_FOUND, message),
            AppError::NotReady { message } => (StatusCode::SERVICE_UNAVAILABLE, message),
            AppError::Internal { message } => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dal::MemoryStopStore, model::stop::Stop, sampler::SamplerConfig};

    fn metro_center() -> Stop {
        Stop {
            id: "STN_A01_C01".to_string(),
            name: "METRO CENTER".to_string(),
            stop_lat: 38.898303,
            stop_long: -77.028099,
            stop_lat_raw: "38.898303".to_string(),
            stop_long_raw: "-77.028099".to_string(),
        }
    }

    fn state(stops: Vec<Stop>) -> AppState<MemoryStopStore> {
        let store = MemoryStopStore::with_stops(stops);
        let sampler = NearbyStopSampler::new(store.clone(), SamplerConfig::default());
        AppState::new(store, sampler)
    }

    fn query(lat: f64, long: f64, min: f64, max: f64) -> Query<RandomStopQuery> {
        Query(RandomStopQuery {
            user_lat: lat,
            user_long: long,
            min_range: min,
            max_range: max,
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn call(state: AppState<MemoryStopStore>, query: Query<RandomStopQuery>) -> Response {
        match random_stop(State(state), query).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }

    #[tokio::test]
    async fn returns_stop_as_json() {
        // Farragut North is about 0.6 miles from Metro Center
        let response = call(
            state(vec![metro_center()]),
            query(38.903192, -77.039766, 0.5, 2.0),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({
                "id": "STN_A01_C01",
                "name": "METRO CENTER",
                "stop_lat": 38.898303,
                "stop_long": -77.028099,
                "stop_lat_raw": "38.898303",
                "stop_long_raw": "-77.028099",
            })
        );
    }

    #[tokio::test]
    async fn no_match_is_an_empty_object() {
        let response = call(
            state(vec![metro_center()]),
            query(38.898303, -77.028099, 0.5, 2.0),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({}));
    }

    #[tokio::test]
    async fn empty_store_is_service_unavailable() {
        let response = call(state(vec![]), query(38.9, -77.0, 0.5, 2.0)).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn inverted_range_is_bad_request() {
        let response = call(state(vec![metro_center()]), query(38.9, -77.0, 2.0, 0.5)).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn invalid_latitude_is_bad_request() {
        let response = call(state(vec![metro_center()]), query(123.0, -77.0, 0.5, 2.0)).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stop_by_id() {
        let state = state(vec![metro_center()]);

        let found = get_stop(State(state.clone()), Path("STN_A01_C01".to_string()))
            .await
            .unwrap();
        assert_eq!(body_json(found).await["name"], "METRO CENTER");

        let missing = get_stop(State(state), Path("nope".to_string()))
            .await
            .unwrap_err()
            .into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn storage_error_is_internal() {
        let response =
            AppError::from(StorageError::Io(std::io::Error::other("gone"))).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn router_applies_default_range_and_cors() {
        let router = create_router(
            state(vec![metro_center()]),
            vec![HeaderValue::from_static("https://example.com")],
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let response = reqwest::Client::new()
            .get(format!(
                "http://{addr}/random_stop?user_lat=38.903192&user_long=-77.039766"
            ))
            .header("Origin", "https://example.com")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("https://example.com")
        );
        let stop: serde_json::Value =
            serde_json::from_str(&response.text().await.unwrap()).unwrap();
        assert_eq!(stop["id"], "STN_A01_C01");
    }

    #[tokio::test]
    async fn missing_coordinates_are_rejected() {
        let router = create_router(state(vec![metro_center()]), vec![]);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let response = reqwest::get(format!("http://{addr}/random_stop?user_lat=38.9"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
