//! Weathervane is a JSON REST backend for ingesting and querying
//! weather-station telemetry.

#[forbid(unsafe_code)]
#[deny(missing_docs, unused_mut)]
pub mod crypto;
pub mod database;
pub mod error;
pub mod gate;
pub mod reading;
pub mod router;
pub mod telemetry;
pub mod user;

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderName, Method};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};
use tower_http::LatencyUnit;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    key: Option<&str>,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        request = request.header(gate::AUTH_HEADER, key);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: database::Database,
    pub crypto: Arc<crypto::Crypto>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            HeaderName::from_static(gate::AUTH_HEADER),
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // Session lifecycle.
        .route("/api/register", post(router::auth::register))
        .route("/api/login", post(router::auth::login))
        .route("/api/logout", post(router::auth::logout))
        // Users. All mutations run through the access control gate.
        .route("/api/users", post(router::users::create))
        .route("/api/users/range", delete(router::users::delete_range))
        .route("/api/users/roles", patch(router::users::change_roles))
        .route(
            "/api/users/{id}",
            get(router::users::get_one).delete(router::users::delete),
        )
        // Readings: ingestion, paging and batch maintenance.
        .route(
            "/api/readings",
            get(router::readings::list)
                .post(router::readings::create)
                .patch(router::readings::update_many)
                .delete(router::readings::delete_many),
        )
        .route("/api/readings/batch", post(router::readings::create_many))
        // Analytical queries.
        .route(
            "/api/readings/analysis/max-precipitation/{device_name}",
            get(router::readings::max_precipitation),
        )
        .route(
            "/api/readings/analysis/at-timestamp",
            get(router::readings::at_timestamp),
        )
        .route(
            "/api/readings/analysis/max-temperature",
            get(router::readings::max_temperature),
        )
        .route(
            "/api/readings/{id}",
            get(router::readings::get_one)
                .patch(router::readings::update)
                .delete(router::readings::delete),
        )
        .route(
            "/api/readings/{id}/precipitation",
            patch(router::readings::update_precipitation),
        )
        .with_state(state)
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;

    let db = match config.mongodb {
        Some(ref mongo) => {
            database::Database::new(
                &mongo.address,
                mongo
                    .database
                    .as_deref()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME),
            )
            .await?
        },
        None => {
            tracing::error!("missing `mongodb` entry on `config.yaml` file");
            std::process::exit(0);
        },
    };

    let crypto = Arc::new(crypto::Crypto::new(config.argon2.clone())?);

    Ok(AppState { config, db, crypto })
}
