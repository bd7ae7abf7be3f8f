use axum::{
    extract::{rejection::QueryRejection, Query},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use hyper::Server;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::aggregator::{Aggregator, SearchRequest};
use crate::error::AggregatorError;
use crate::metrics;

impl IntoResponse for AggregatorError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            error!("search failed: {}", self);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "socialite",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Default, Deserialize)]
struct ProvidersQuery {
    #[serde(default)]
    include_mock: bool,
}

async fn providers(
    Extension(aggregator): Extension<Arc<Aggregator>>,
    Query(params): Query<ProvidersQuery>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "providers": aggregator.list_providers(params.include_mock)
    }))
}

async fn search(
    Extension(aggregator): Extension<Arc<Aggregator>>,
    request: Result<Query<SearchRequest>, QueryRejection>,
) -> Response {
    let Query(request) = match request {
        Ok(q) => q,
        Err(rejection) => {
            metrics::aggregate::record_rejected();
            return AggregatorError::invalid(rejection.body_text()).into_response();
        }
    };
    match aggregator.search_events(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn diagnostics(Extension(aggregator): Extension<Arc<Aggregator>>) -> impl IntoResponse {
    Json(aggregator.diagnostics())
}

async fn reload(Extension(aggregator): Extension<Arc<Aggregator>>) -> impl IntoResponse {
    // discovery builds clients and reads manifests; keep it off the async workers
    let registry = match tokio::task::spawn_blocking(move || aggregator.reload()).await {
        Ok(registry) => registry,
        Err(e) => {
            return AggregatorError::Internal(format!("reload failed: {e}")).into_response();
        }
    };
    Json(registry.diagnostics()).into_response()
}

async fn prometheus() -> impl IntoResponse {
    match metrics::render() {
        Some(body) => (StatusCode::OK, body),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Create the HTTP router around an aggregator.
pub fn create_server(aggregator: Arc<Aggregator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/events/providers", get(providers))
        .route("/events/search", get(search))
        .route("/events/diagnostics", get(diagnostics))
        .route("/admin/reload", post(reload))
        .route("/metrics", get(prometheus))
        .layer(Extension(aggregator))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port; stops on Ctrl-C.
pub async fn start_server(aggregator: Arc<Aggregator>, port: u16) -> anyhow::Result<()> {
    let app = create_server(aggregator);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("HTTP server listening on http://{}", addr);
    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
