//! Authentication middleware
//!
//! [`require_auth`] verifies the bearer token of every `/api/` request and
//! stores the caller in the request extensions; [`require_permission`]
//! guards a router on one permission.

use axum::extract::{FromRequestParts, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use shared::error::AppError;

use super::CurrentUser;
use crate::core::ServerState;

/// Paths reachable without a token
fn is_public(path: &str) -> bool {
    !path.starts_with("/api/") || path == "/api/health"
}

pub async fn require_auth(
    State(state): State<ServerState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if req.method() == http::Method::OPTIONS || is_public(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let (mut parts, body) = req.into_parts();
    CurrentUser::from_request_parts(&mut parts, &state).await?;
    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Route layer refusing callers without `permission`
///
/// ```ignore
/// Router::new()
///     .route("/", get(handler::list))
///     .route_layer(middleware::from_fn(require_permission("inventory:read")));
/// ```
pub fn require_permission(
    permission: &'static str,
) -> impl Fn(
    Request,
    Next,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, AppError>> + Send>>
+ Clone {
    move |req: Request, next: Next| {
        Box::pin(async move {
            let user = req
                .extensions()
                .get::<CurrentUser>()
                .ok_or_else(AppError::not_authenticated)?;

            if !user.has_permission(permission) {
                tracing::warn!(
                    target: "security",
                    user_id = %user.id,
                    required_permission = permission,
                    "Permission denied"
                );
                return Err(AppError::permission_denied(format!(
                    "Permission denied: {permission}"
                )));
            }

            Ok(next.run(req).await)
        })
    }
}
