/// Tenant map administration
use crate::{api::response::ApiResponse, context::AppContext, error::GatewayResult, metrics};
use axum::{extract::State, routing::post, Json, Router};
use serde_json::json;
use tracing::info;

/// Build tenant routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/tenants/refresh", post(refresh_tenants))
}

/// Rebuild the tenant map from the whitelist and provision new namespaces
async fn refresh_tenants(State(ctx): State<AppContext>) -> GatewayResult<Json<ApiResponse>> {
    let map = ctx.registry.refresh().await?;
    metrics::TENANTS_ACTIVE.set(map.len() as i64);
    info!("Tenant map refreshed via API ({} tenants)", map.len());

    let tenants: serde_json::Map<String, serde_json::Value> = map
        .into_iter()
        .map(|(domain, entry)| (domain, json!({ "hash": entry.hash, "active": entry.active })))
        .collect();

    Ok(Json(ApiResponse::success(
        "Tenant map updated",
        Some(serde_json::Value::Object(tenants)),
    )))
}
