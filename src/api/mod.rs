/// API routes and handlers
pub mod files;
pub mod references;
pub mod response;
pub mod tenants;
pub mod upload;

use crate::{
    context::AppContext,
    error::{GatewayError, GatewayResult},
    reference_store::Reference,
    tenant::Tenant,
};
use axum::{
    http::{header, HeaderMap},
    Router,
};

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(upload::routes())
        .merge(files::routes())
        .merge(references::routes())
        .merge(tenants::routes())
}

/// The caller's domain: the `Origin` header, else the `domain` query parameter
pub fn request_domain(headers: &HeaderMap, query_domain: Option<&str>) -> Option<String> {
    headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .or(query_domain)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(String::from)
}

/// Declared MIME type of the request body, without parameters
pub fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

/// Last component of a logical path
pub fn file_name_of(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Resolve the tenant a request acts on, failing if no domain was given
pub fn require_tenant(
    ctx: &AppContext,
    headers: &HeaderMap,
    query_domain: Option<&str>,
) -> GatewayResult<Tenant> {
    let domain = request_domain(headers, query_domain)
        .ok_or_else(|| GatewayError::Validation("Domain not specified".to_string()))?;
    ctx.tenant_for(&domain)
}

/// Locate an object by hash, scoped to the caller's tenant when a domain is given
pub async fn locate(
    ctx: &AppContext,
    headers: &HeaderMap,
    query_domain: Option<&str>,
    hash: &str,
) -> GatewayResult<(Tenant, Reference)> {
    match request_domain(headers, query_domain) {
        Some(domain) => {
            let tenant = ctx.tenant_for(&domain)?;
            let reference = ctx.store.find_by_hash(&tenant, hash).await?;
            Ok((tenant, reference))
        }
        None => ctx.registry.find_tenant_by_hash(&ctx.store, hash).await,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_domain_prefers_origin() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_domain(&headers, Some("http://q")), Some("http://q".to_string()));
        assert_eq!(request_domain(&headers, Some("  ")), None);
        assert_eq!(request_domain(&headers, None), None);

        headers.insert(header::ORIGIN, HeaderValue::from_static("http://localhost"));
        assert_eq!(
            request_domain(&headers, Some("http://q")),
            Some("http://localhost".to_string())
        );
    }

    #[test]
    fn test_content_type_strips_parameters() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_type(&headers), None);
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("Image/PNG; q=1"));
        assert_eq!(content_type(&headers), Some("image/png".to_string()));
        assert_eq!(file_name_of("a/b/c.pdf"), "c.pdf");
    }
}
