/// HTTP server setup and routing
use crate::{
    api::response::ApiResponse,
    context::AppContext,
    error::{GatewayError, GatewayResult},
    metrics,
};
use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::time::Instant;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Build the main application router
pub fn build_router(ctx: AppContext) -> Router {
    // Create CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::ORIGIN]);

    Router::new()
        // Health and metrics endpoints
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .merge(crate::api::routes())
        .with_state(ctx)
        .fallback(not_found)
        .layer(middleware::from_fn(track_http_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Health check handler
async fn health_check(State(ctx): State<AppContext>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": ctx.config.service.version
    }))
}

/// Prometheus metrics handler
async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<ApiResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error("Endpoint not found", None, Some(404))),
    )
}

/// Record request counts and latencies by matched route
async fn track_http_metrics(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;
    metrics::record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Start the HTTP server
pub async fn serve(ctx: AppContext) -> GatewayResult<()> {
    let addr = format!("{}:{}", ctx.config.service.hostname, ctx.config.service.port);

    info!("Bucket gateway listening on {}", addr);
    info!(
        "   Storage: {}",
        ctx.config.storage.storage_directory.display()
    );
    info!(
        "   Segment threshold: {} bytes",
        ctx.config.storage.max_reference_file_size
    );

    let app = build_router(ctx);

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| GatewayError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
