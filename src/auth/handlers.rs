use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            LoginRequest, LoginResponse, MessageResponse, ProfileResponse, RegisterRequest,
            RegisterResponse,
        },
        extractors::{AdminUser, AuthUser},
        password::{hash_password_blocking, verify_password_blocking},
        repo::StoreError,
        repo_types::{NewUser, Role},
    },
    error::ApiError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(profile))
        .route("/admin/dashboard", get(admin_dashboard))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trimmed, non-empty value of a required text field.
fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ApiError::missing_field(field)),
    }
}

/// Passwords are kept verbatim; only emptiness is rejected.
fn required_password(value: Option<String>) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::missing_field("password")),
    }
}

fn store_failure(e: StoreError) -> ApiError {
    match e {
        StoreError::Conflict(column) => ApiError::Conflict(format!("{} already registered", column)),
        other => ApiError::Internal(anyhow::Error::new(other).context("user store")),
    }
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let Json(payload) = payload?;
    let username = required("username", payload.username)?;
    let email = required("email", payload.email)?.to_lowercase();
    let password = required_password(payload.password)?;

    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(ApiError::Validation("Invalid email".into()));
    }

    let role = match payload.role.as_deref() {
        None => Role::default(),
        Some(raw) => raw
            .parse::<Role>()
            .map_err(|e| ApiError::Validation(e.to_string()))?,
    };

    // Hash before touching the store so a hashing failure leaves no row behind.
    let password_hash = hash_password_blocking(password)
        .await
        .map_err(|e| ApiError::Internal(e.context("hash password")))?;

    let user = state
        .users
        .create(NewUser {
            username,
            email,
            password_hash,
            role,
        })
        .await
        .map_err(|e| {
            if let StoreError::Conflict(column) = &e {
                warn!(column, "duplicate registration");
            }
            store_failure(e)
        })?;

    info!(user_id = user.id, username = %user.username, role = %user.role, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: user.id,
            message: format!("User {} registered successfully", user.username),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(payload) = payload?;
    let email = required("email", payload.email)?.to_lowercase();
    let password = required_password(payload.password)?;

    let user = match state.users.find_by_email(&email).await {
        Ok(Some(u)) => u,
        Ok(None) => {
            warn!(email = %email, "login unknown email");
            return Err(ApiError::Authentication("Invalid credentials".into()));
        }
        Err(e) => return Err(store_failure(e)),
    };

    let ok = verify_password_blocking(password, user.password_hash.clone())
        .await
        .map_err(|e| ApiError::Internal(e.context(format!("verify password for user {}", user.id))))?;

    if !ok {
        warn!(user_id = user.id, "login invalid password");
        return Err(ApiError::Authentication("Invalid credentials".into()));
    }

    let access_token = state
        .jwt
        .issue(user.id)
        .map_err(|e| ApiError::Internal(anyhow::Error::new(e).context("sign access token")))?;

    info!(user_id = user.id, "user logged in");
    Ok(Json(LoginResponse {
        message: "Login successful".into(),
        access_token,
    }))
}

/// Stateless: nothing is revoked, the token stays valid until it expires.
#[instrument(skip_all)]
pub async fn logout(AuthUser(user_id): AuthUser) -> Json<MessageResponse> {
    info!(user_id, "user logged out");
    Json(MessageResponse {
        message: "Logged out successfully".into(),
    })
}

#[instrument(skip(state))]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = state
        .users
        .find_by_id(user_id)
        .await
        .map_err(store_failure)?
        .ok_or_else(|| {
            warn!(user_id, "token subject no longer exists");
            ApiError::NotFound("User not found".into())
        })?;

    Ok(Json(user.into()))
}

#[instrument(skip_all)]
pub async fn admin_dashboard(AdminUser(user): AdminUser) -> Json<MessageResponse> {
    info!(user_id = user.id, "admin dashboard accessed");
    Json(MessageResponse {
        message: format!("Welcome to the admin dashboard, {}", user.username),
    })
}
