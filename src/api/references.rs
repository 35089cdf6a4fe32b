/// Reference lookups
use crate::{
    api::{locate, require_tenant, response::ApiResponse},
    context::AppContext,
    error::{GatewayError, GatewayResult},
    reference_store::validate_hash,
};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

/// Build reference routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/references", get(find_by_path))
        .route("/references/:hash", get(find_by_hash))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReferenceParams {
    pub path: Option<String>,
    pub domain: Option<String>,
}

/// Look a reference up by hash
async fn find_by_hash(
    State(ctx): State<AppContext>,
    Path(hash): Path<String>,
    Query(params): Query<ReferenceParams>,
    headers: HeaderMap,
) -> GatewayResult<Json<ApiResponse>> {
    validate_hash(&hash)?;
    let (tenant, reference) = locate(&ctx, &headers, params.domain.as_deref(), &hash).await?;

    Ok(Json(ApiResponse::success(
        "Reference found",
        Some(json!({ "hash": reference.hash, "path": reference.path, "tenant": tenant.hash })),
    )))
}

/// Look a reference up by logical path within the caller's tenant
async fn find_by_path(
    State(ctx): State<AppContext>,
    Query(params): Query<ReferenceParams>,
    headers: HeaderMap,
) -> GatewayResult<Json<ApiResponse>> {
    let path = params
        .path
        .as_deref()
        .ok_or_else(|| GatewayError::Validation("Missing 'path' parameter".to_string()))?;
    let tenant = require_tenant(&ctx, &headers, params.domain.as_deref())?;
    let reference = ctx.store.find_by_path(&tenant, path).await?;

    Ok(Json(ApiResponse::success(
        "Reference found",
        Some(json!({ "hash": reference.hash, "path": reference.path })),
    )))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{body_json, test_app, upload_request, DOMAIN};
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_lookups() {
        let (_dir, ctx, app) = test_app().await;
        let resp = app
            .clone()
            .oneshot(upload_request("path=docs/r.pdf", "application/pdf", b"%PDF"))
            .await
            .unwrap();
        let hash = body_json(resp).await["data"]["hash"]
            .as_str()
            .unwrap()
            .to_string();

        let req = Request::builder()
            .uri(format!("/references/{}", hash))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"]["path"], "docs/r.pdf");
        assert_eq!(
            body["data"]["tenant"],
            ctx.tenant_for(DOMAIN).unwrap().hash.as_str()
        );

        let req = Request::builder()
            .uri("/references?path=/docs/r.pdf")
            .header("origin", DOMAIN)
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["data"]["hash"], hash.as_str());

        let req = Request::builder()
            .uri("/references?path=docs/missing.pdf")
            .header("origin", DOMAIN)
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = Request::builder()
            .uri("/references")
            .header("origin", DOMAIN)
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
