use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;

use super::{
    jwt::JwtKeys,
    repo::UserStore,
    repo_types::{Role, User},
};
use crate::{error::ApiError, state::AppState};

/// Extracts and validates the bearer token, yielding the caller's user id.
/// Runs before the handler body; any failure is a 401.
#[derive(Debug)]
pub struct AuthUser(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Authentication("Missing Authorization header".into()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Authentication("Invalid Authorization header".into()))?;

        let keys = JwtKeys::from_ref(state);
        let user_id = keys.validate(token).map_err(|e| {
            warn!(error = %e, "rejected bearer token");
            ApiError::Authentication("Invalid or expired token".into())
        })?;

        Ok(AuthUser(user_id))
    }
}

/// Resolves `user_id` and admits it only if the stored role is `Admin`.
pub async fn require_admin(users: &dyn UserStore, user_id: i64) -> Result<User, ApiError> {
    let user = users
        .find_by_id(user_id)
        .await
        .map_err(|e| ApiError::Internal(e.into()))?
        .ok_or_else(|| {
            warn!(user_id, "token subject no longer exists");
            ApiError::NotFound("User not found".into())
        })?;

    match user.role {
        Role::Admin => Ok(user),
        Role::User | Role::Subadmin => {
            warn!(user_id, role = %user.role, "admin access denied");
            Err(ApiError::Authorization("Admin access required".into()))
        }
    }
}

/// An authenticated caller whose stored role is `Admin`.
#[derive(Debug)]
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;
        let user = require_admin(state.users.as_ref(), user_id).await?;
        Ok(AdminUser(user))
    }
}
