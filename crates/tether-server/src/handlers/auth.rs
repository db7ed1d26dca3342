//! Signup and login.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use tether_store::users::UserRepo;

use crate::auth::{create_token, hash_password, verify_password};
use crate::error::ApiError;
use crate::server::AppState;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Deserialize)]
pub struct SignupBody {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

fn plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupBody>,
) -> Result<Json<Value>, ApiError> {
    let username = body.username.trim();
    if username.is_empty() {
        return Err(ApiError::BadRequest("username is required".into()));
    }
    if !plausible_email(&body.email) {
        return Err(ApiError::BadRequest("invalid email address".into()));
    }
    if body.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let users = UserRepo::new(state.db.clone());
    let hash = hash_password(&body.password)?;
    let user = users
        .create(username, &body.email, &hash)
        .map_err(|err| match err {
            tether_store::StoreError::Conflict(_) => {
                ApiError::BadRequest("username or email already in use".into())
            }
            other => ApiError::Store(other),
        })?;

    let token = create_token(&state.jwt_secret, &user.id, user.is_admin)?;
    tracing::info!(user = %user.id, username, "user signed up");
    Ok(Json(json!({ "token": token, "user": user })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<Value>, ApiError> {
    let users = UserRepo::new(state.db.clone());
    let user = users
        .find_by_email(&body.email)?
        .ok_or_else(|| ApiError::Unauthorized("invalid credentials".into()))?;

    if !verify_password(&body.password, &user.password_hash) {
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    }
    if user.is_banned {
        return Err(ApiError::Unauthorized("account banned".into()));
    }

    let token = create_token(&state.jwt_secret, &user.id, user.is_admin)?;
    tracing::info!(user = %user.id, "user logged in");
    Ok(Json(json!({ "token": token, "user": user })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_plausibility() {
        assert!(plausible_email("alice@example.com"));
        assert!(!plausible_email("alice"));
        assert!(!plausible_email("@example.com"));
        assert!(!plausible_email("alice@nodot"));
        assert!(!plausible_email("alice@.com"));
    }
}
