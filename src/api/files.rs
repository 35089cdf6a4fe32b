/// File retrieval, deletion and update by object hash
use crate::{
    api::{content_type, file_name_of, locate, response::ApiResponse},
    context::AppContext,
    error::{GatewayError, GatewayResult},
    metadata::{self, FileMetadata},
    reference_store::validate_hash,
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

/// Build file routes
pub fn routes() -> Router<AppContext> {
    Router::new().route(
        "/files/:hash",
        get(get_file).delete(delete_file).put(update_file),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct FileParams {
    /// New logical path (PUT only)
    pub path: Option<String>,
    pub domain: Option<String>,
}

/// Serve a file's bytes
///
/// `Content-Type` and the download name come from the file's metadata when
/// it has any.
async fn get_file(
    State(ctx): State<AppContext>,
    Path(hash): Path<String>,
    Query(params): Query<FileParams>,
    headers: HeaderMap,
) -> GatewayResult<Response> {
    validate_hash(&hash)?;
    let (tenant, reference) = locate(&ctx, &headers, params.domain.as_deref(), &hash).await?;

    let data = ctx
        .backend
        .get(&tenant, &hash)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("Content of file '{}' not found", hash)))?;

    let metadata = match metadata::load(&tenant, &hash).await {
        Ok(metadata) => metadata,
        Err(e) => {
            warn!("Ignoring unreadable metadata for {}: {}", hash, e);
            None
        }
    };
    let (mime_type, file_name) = match metadata {
        Some(m) => (m.mime_type, m.original_name),
        None => (
            "application/octet-stream".to_string(),
            file_name_of(&reference.path),
        ),
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime_type),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", sanitize_file_name(&file_name)),
            ),
        ],
        data,
    )
        .into_response())
}

/// Delete a file: its reference, then its bytes and metadata
async fn delete_file(
    State(ctx): State<AppContext>,
    Path(hash): Path<String>,
    Query(params): Query<FileParams>,
    headers: HeaderMap,
) -> GatewayResult<Json<ApiResponse>> {
    validate_hash(&hash)?;
    let (tenant, _) = locate(&ctx, &headers, params.domain.as_deref(), &hash).await?;

    // The reference is authoritative; once it is gone the bytes are unreachable
    let removed = ctx.store.remove(&tenant, &hash).await?;

    if let Err(e) = ctx.backend.delete(&tenant, &hash).await {
        warn!("Failed to delete bytes of {}: {}", hash, e);
    }
    if let Err(e) = metadata::remove(&tenant, &hash).await {
        warn!("Failed to delete metadata of {}: {}", hash, e);
    }

    info!("Deleted {} ({}) for tenant {}", hash, removed.path, tenant.hash);
    Ok(Json(ApiResponse::success(
        "File deleted successfully",
        Some(json!({ "hash": removed.hash, "path": removed.path })),
    )))
}

/// Update a file in place
///
/// A non-empty body replaces the bytes under the same hash; `?path=` moves
/// the reference. Both may be combined. Every check, including the move's
/// path conflict check, runs before any byte is written, so a rejected
/// request leaves the file as it was.
async fn update_file(
    State(ctx): State<AppContext>,
    Path(hash): Path<String>,
    Query(params): Query<FileParams>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<Json<ApiResponse>> {
    validate_hash(&hash)?;
    let new_path = params
        .path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    if body.is_empty() && new_path.is_none() {
        return Err(GatewayError::Validation(
            "Nothing to update: send file content or a new path".to_string(),
        ));
    }

    let (tenant, original) = locate(&ctx, &headers, params.domain.as_deref(), &hash).await?;

    let replacement = if body.is_empty() {
        None
    } else {
        let previous = metadata::load(&tenant, &hash).await.ok().flatten();
        let mime_type = content_type(&headers)
            .or_else(|| previous.as_ref().map(|m| m.mime_type.clone()))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let permissions = ctx.permissions_for(&tenant).await?;
        permissions.check(body.len() as u64, &mime_type)?;

        let original_name = previous
            .map(|m| m.original_name)
            .unwrap_or_else(|| file_name_of(&original.path));
        Some(FileMetadata::new(original_name, mime_type, body.len() as u64))
    };

    let mut reference = original.clone();
    if let Some(new_path) = new_path {
        reference = ctx.store.update_path(&tenant, &hash, new_path).await?;
    }

    if let Some(record) = replacement {
        if let Err(e) = ctx.backend.put(&tenant, &hash, &body).await {
            if reference.path != original.path {
                if let Err(undo) = ctx.store.update_path(&tenant, &hash, &original.path).await {
                    warn!("Failed to move {} back to {}: {}", hash, original.path, undo);
                }
            }
            return Err(e);
        }
        if let Err(e) = metadata::save(&tenant, &hash, &record).await {
            warn!("Failed to save metadata for {}: {}", hash, e);
        }

        // Deleted while the bytes were being written
        if let Err(e) = ctx.store.confirm_reference(&tenant, &hash).await {
            if let Err(e) = ctx.backend.delete(&tenant, &hash).await {
                warn!("Failed to delete bytes of {}: {}", hash, e);
            }
            if let Err(e) = metadata::remove(&tenant, &hash).await {
                warn!("Failed to delete metadata of {}: {}", hash, e);
            }
            return Err(e);
        }
        info!("Updated content of {} for tenant {}", hash, tenant.hash);
    }

    Ok(Json(ApiResponse::success(
        "File updated successfully",
        Some(json!({ "hash": reference.hash, "path": reference.path })),
    )))
}

/// Strip characters that would break a quoted header parameter
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect()
}
