//! Router configuration for the vault API.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers::{
    add_comment, browse_directory, delete_backup, download_backup, get_backup, list_backups,
    list_company_backups, navigate_directory, upload_chunk, AppState,
};
use super::middleware::{create_cors_layer, jwt_auth, JwtState};
use crate::config::WebConfig;

/// Multipart framing on top of the chunk itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Largest accepted upload request body in bytes.
fn upload_body_limit(config: &WebConfig) -> usize {
    (config.max_chunk_size_mb as usize)
        .saturating_mul(1024 * 1024)
        .saturating_add(MULTIPART_OVERHEAD)
}

/// Create the main API router.
pub fn create_router(
    app_state: Arc<AppState>,
    jwt_state: Arc<JwtState>,
    config: &WebConfig,
) -> Router {
    let upload_routes = Router::new()
        .route("/upload", post(upload_chunk))
        .layer(DefaultBodyLimit::max(upload_body_limit(config)));

    let backup_routes = Router::new()
        .route("/", get(list_backups))
        .route("/:id", get(get_backup).delete(delete_backup))
        .route("/:id/comments", post(add_comment))
        .route("/:id/download", get(download_backup));

    let browse_routes = Router::new()
        .route("/", get(browse_directory))
        .route("/navigate", post(navigate_directory));

    let api_routes = Router::new()
        .merge(upload_routes)
        .nest("/backups", backup_routes)
        .route("/companies/:id/backups", get(list_company_backups))
        .nest("/browse", browse_routes);

    Router::new()
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(&config.cors_origins))
                .layer(middleware::from_fn(move |req, next| {
                    let state = jwt_state.clone();
                    jwt_auth(state, req, next)
                })),
        )
        .with_state(app_state)
}

/// Create a health check router.
pub fn create_health_router() -> Router {
    Router::new().route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "OK"
}
