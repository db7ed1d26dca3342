//! Bearer-token authentication: password hashing, JWT issue/verify, and
//! the `AuthUser` extractor REST handlers take as an argument.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use tether_core::ids::UserId;
use tether_store::users::UserRepo;

use crate::error::ApiError;
use crate::server::AppState;

const TOKEN_TTL_DAYS: i64 = 30;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub admin: bool,
    pub exp: usize,
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|err| {
        tracing::error!(%err, "password hashing failed");
        ApiError::Internal
    })
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

pub fn create_token(secret: &str, user_id: &UserId, admin: bool) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id.to_string(),
        admin,
        exp: (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| {
        tracing::error!(%err, "token signing failed");
        ApiError::Internal
    })
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized("invalid token".into()))
}

/// The authenticated caller. Extracting it enforces a valid Bearer token
/// and rejects banned accounts.
pub struct AuthUser {
    pub id: UserId,
    pub is_admin: bool,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing authorization header".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("expected bearer token".into()))?;

        let claims = verify_token(&state.jwt_secret, token)?;
        if !UserId::is_valid(&claims.sub) {
            return Err(ApiError::Unauthorized("invalid token subject".into()));
        }
        let id = UserId::from_raw(claims.sub);

        // Admin flag and ban state come from the database, not the token,
        // so revocations take effect on the next request.
        let user = UserRepo::new(state.db.clone())
            .get(&id)
            .map_err(|_| ApiError::Unauthorized("unknown user".into()))?;
        if user.is_banned {
            return Err(ApiError::Unauthorized("account banned".into()));
        }

        Ok(AuthUser {
            id,
            is_admin: user.is_admin,
        })
    }
}
