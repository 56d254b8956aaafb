//! `CurrentUser` extractor

use axum::extract::FromRequestParts;
use http::request::Parts;
use shared::error::{AppError, ErrorCode};

use super::{CurrentUser, JwtError, JwtService};
use crate::core::ServerState;

impl FromRequestParts<ServerState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| {
                tracing::warn!(target: "security", uri = %parts.uri, "Missing authorization header");
                AppError::not_authenticated()
            })?;
        let token = JwtService::extract_from_header(header).ok_or_else(|| {
            AppError::with_message(ErrorCode::SessionInvalid, "Invalid authorization header")
        })?;

        match state.jwt.validate_token(token) {
            Ok(claims) => {
                let user = CurrentUser::from(claims);
                parts.extensions.insert(user.clone());
                Ok(user)
            }
            Err(e) => {
                tracing::warn!(target: "security", error = %e, uri = %parts.uri, "Token rejected");
                match e {
                    JwtError::ExpiredToken => Err(AppError::new(ErrorCode::SessionExpired)),
                    _ => Err(AppError::with_message(ErrorCode::SessionInvalid, "Invalid token")),
                }
            }
        }
    }
}
