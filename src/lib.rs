pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::UploadConfig;
use crate::services::storage::StorageService;
use crate::services::upload::UploadService;
use axum::{
    Json, Router,
    http::HeaderValue,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::create_upload,
        api::handlers::upload::upload_chunk,
        api::handlers::upload::delete_upload,
        api::handlers::upload::list_project_uploads,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::upload::CreateUploadRequest,
            api::handlers::upload::CreateUploadResponse,
            api::handlers::upload::UploadChunkResponse,
            api::handlers::upload::UploadEntry,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "upload", description = "Chunked, resumable uploads"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub storage: Arc<dyn StorageService>,
    pub upload_service: Arc<UploadService>,
    pub config: UploadConfig,
}

fn cors_layer(config: &UploadConfig) -> CorsLayer {
    let origin = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            config
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any)
}

pub fn create_app(state: AppState) -> Router {
    let chunk_limit = state.config.max_chunk_size as usize + 1024 * 1024; // multipart overhead

    Router::new()
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/upload",
            post(api::handlers::upload::create_upload).layer(from_fn_with_state(
                state.clone(),
                api::middleware::auth::auth_middleware,
            )),
        )
        .route(
            "/upload/chunk",
            post(api::handlers::upload::upload_chunk)
                .layer(axum::extract::DefaultBodyLimit::max(chunk_limit))
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .route(
            "/upload/:id",
            get(api::handlers::upload::list_project_uploads)
                .delete(api::handlers::upload::delete_upload)
                .layer(from_fn_with_state(
                    state.clone(),
                    api::middleware::auth::auth_middleware,
                )),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors_layer(&state.config))
        .with_state(state)
}
