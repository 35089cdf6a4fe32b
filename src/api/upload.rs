/// Upload endpoint with conflict resolution
use crate::{
    api::{
        content_type, file_name_of, require_tenant,
        response::{ApiResponse, DecisionOption},
    },
    context::AppContext,
    error::{GatewayError, GatewayResult},
    resolver::{UploadDecision, UploadOutcome, UploadRequest},
};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Build upload routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/upload", post(upload))
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    /// Tenant-relative logical path; defaults to `upload_<id>`
    pub path: Option<String>,
    /// Original file name; defaults to the last path component
    pub name: Option<String>,
    /// Decision id when resubmitting after a conflict
    pub selected: Option<String>,
    /// Domain, used when no `Origin` header is sent
    pub domain: Option<String>,
}

/// Upload a file
///
/// The raw request body is the file; `Content-Type` is its MIME type.
/// A path collision answers 409 with the three decision options and stores
/// nothing. Resubmitting with `selected=<id>` applies the decision.
async fn upload(
    State(ctx): State<AppContext>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<(StatusCode, Json<ApiResponse>)> {
    let tenant = require_tenant(&ctx, &headers, params.domain.as_deref())?;

    // Parse the decision before anything can be mutated
    let decision = params
        .selected
        .as_deref()
        .map(str::parse::<UploadDecision>)
        .transpose()?;

    let path = params
        .path
        .as_deref()
        .map(|p| p.trim().trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("upload_{}", uuid::Uuid::new_v4().simple()));

    let mime_type =
        content_type(&headers).unwrap_or_else(|| "application/octet-stream".to_string());

    if decision != Some(UploadDecision::Skip) {
        if body.is_empty() {
            return Err(GatewayError::Validation("No file received".to_string()));
        }
        let permissions = ctx.permissions_for(&tenant).await?;
        permissions.check(body.len() as u64, &mime_type)?;
    }

    let original_name = params
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| file_name_of(&path));

    debug!(
        "Upload of {} bytes to {} for tenant {} (decision {:?})",
        body.len(),
        path,
        tenant.hash,
        decision
    );

    let request = UploadRequest {
        path,
        original_name,
        mime_type,
        data: body.to_vec(),
    };
    let outcome = ctx.resolver.upload(&tenant, request, decision).await?;

    Ok(outcome_response(outcome))
}

fn outcome_response(outcome: UploadOutcome) -> (StatusCode, Json<ApiResponse>) {
    let (status, body) = match outcome {
        UploadOutcome::Uploaded { hash, path } => (
            StatusCode::OK,
            ApiResponse::success(
                "File uploaded successfully",
                Some(json!({ "hash": hash, "path": path, "url": format!("/files/{}", hash) })),
            ),
        ),
        UploadOutcome::Conflict { current_hash, path } => {
            let options = UploadDecision::ALL
                .iter()
                .map(|d| DecisionOption {
                    id: d.id(),
                    label: d.label().to_string(),
                })
                .collect();
            (
                StatusCode::CONFLICT,
                ApiResponse::decision(
                    format!("A file already exists at path '{}'", path),
                    options,
                    json!({ "current_hash": current_hash, "path": path }),
                ),
            )
        }
        UploadOutcome::Skipped { hash, path } => (
            StatusCode::OK,
            ApiResponse::success(
                "Upload skipped by user decision",
                Some(json!({ "hash": hash, "path": path })),
            )
            .with_selected(UploadDecision::Skip.id()),
        ),
        UploadOutcome::Overwritten { hash, path } => (
            StatusCode::OK,
            ApiResponse::success(
                "File overwritten successfully",
                Some(json!({ "hash": hash, "path": path, "url": format!("/files/{}", hash) })),
            )
            .with_selected(UploadDecision::Overwrite.id()),
        ),
        UploadOutcome::Replaced {
            old_hash,
            hash,
            path,
        } => (
            StatusCode::OK,
            ApiResponse::success(
                "File replaced successfully",
                Some(json!({
                    "hash": hash,
                    "old_hash": old_hash,
                    "path": path,
                    "url": format!("/files/{}", hash),
                })),
            )
            .with_selected(UploadDecision::Replace.id()),
        ),
    };
    (status, Json(body))
}
