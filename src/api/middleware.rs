use crate::api::AppState;
use crate::domain::auth::Jwt;
use crate::domain::user::User;
use crate::error::AppError;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

/// The caller of a REST endpoint, resolved from its bearer token.
#[derive(Debug)]
pub struct AuthUser {
    pub user: User,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts.headers.get(header::AUTHORIZATION).ok_or(AppError::Unauthenticated)?;

        let auth_str = auth_header.to_str().map_err(|_| AppError::Unauthenticated)?;
        let token = auth_str.strip_prefix("Bearer ").ok_or(AppError::Unauthenticated)?;

        let user = state.auth_service.authenticate(&Jwt::new(token)).await?;
        tracing::Span::current().record("user_id", tracing::field::display(user.id));

        Ok(Self { user })
    }
}
