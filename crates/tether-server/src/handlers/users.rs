//! Profiles, search, follow/block edges, and moderation.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use tether_core::ids::UserId;
use tether_store::todos::TodoRepo;
use tether_store::users::{UserRepo, UserSummary};

use crate::auth::{hash_password, AuthUser};
use crate::error::ApiError;
use crate::server::AppState;

fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    if !UserId::is_valid(raw) {
        return Err(ApiError::BadRequest("invalid user id".into()));
    }
    Ok(UserId::from_raw(raw))
}

pub async fn search(
    State(state): State<AppState>,
    _caller: AuthUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let query = params
        .get("q")
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::BadRequest("query parameter q is required".into()))?;

    let users = UserRepo::new(state.db.clone());
    Ok(Json(users.search(query)?))
}

/// Public profile: the user plus their follow edges and todos.
pub async fn profile(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_user_id(&id)?;
    let users = UserRepo::new(state.db.clone());
    let user = users.get(&id)?;
    let followers = users.followers(&id)?;
    let following = users.following(&id)?;
    let todos = TodoRepo::new(state.db.clone()).list_for_user(&id, None)?;
    Ok(Json(json!({
        "user": user,
        "followers": followers,
        "following": following,
        "todos": todos,
    })))
}

#[derive(Deserialize)]
pub struct UpdateProfileBody {
    pub username: Option<String>,
    pub bio: Option<String>,
    pub password: Option<String>,
}

pub async fn update_profile(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateProfileBody>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_user_id(&id)?;
    if id != caller.id {
        return Err(ApiError::Forbidden("cannot edit another user's profile".into()));
    }

    if let Some(username) = &body.username {
        if username.trim().is_empty() {
            return Err(ApiError::BadRequest("username cannot be empty".into()));
        }
    }
    let hash = match &body.password {
        Some(password) if password.chars().count() < 6 => {
            return Err(ApiError::BadRequest(
                "password must be at least 6 characters".into(),
            ));
        }
        Some(password) => Some(hash_password(password)?),
        None => None,
    };

    let users = UserRepo::new(state.db.clone());
    let user = users.update_profile(
        &id,
        body.username.as_deref().map(str::trim),
        body.bio.as_deref(),
        hash.as_deref(),
    )?;
    Ok(Json(json!({ "user": user })))
}

// ── Social graph ──

pub async fn followers(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let id = parse_user_id(&id)?;
    Ok(Json(UserRepo::new(state.db.clone()).followers(&id)?))
}

pub async fn following(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let id = parse_user_id(&id)?;
    Ok(Json(UserRepo::new(state.db.clone()).following(&id)?))
}

/// Who the caller has blocked. Own list only.
pub async fn blocked(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let id = parse_user_id(&id)?;
    if id != caller.id {
        return Err(ApiError::Forbidden("cannot view another user's block list".into()));
    }
    Ok(Json(UserRepo::new(state.db.clone()).blocked(&id)?))
}

pub async fn follow(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let target = parse_user_id(&id)?;
    if target == caller.id {
        return Err(ApiError::BadRequest("cannot follow yourself".into()));
    }

    let users = UserRepo::new(state.db.clone());
    let user = users.get(&target)?;
    if user.is_banned {
        return Err(ApiError::Forbidden("user is banned".into()));
    }
    if users.is_blocked_between(&caller.id, &target)? {
        return Err(ApiError::Forbidden("cannot follow this user".into()));
    }
    users.follow(&caller.id, &target).map_err(|err| match err {
        tether_store::StoreError::Conflict(_) => {
            ApiError::BadRequest("already following".into())
        }
        other => ApiError::Store(other),
    })?;
    Ok(Json(json!({ "msg": "followed" })))
}

pub async fn unfollow(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let target = parse_user_id(&id)?;
    let users = UserRepo::new(state.db.clone());
    if !users.unfollow(&caller.id, &target)? {
        return Err(ApiError::BadRequest("not following".into()));
    }
    Ok(Json(json!({ "msg": "unfollowed" })))
}

pub async fn block(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let target = parse_user_id(&id)?;
    if target == caller.id {
        return Err(ApiError::BadRequest("cannot block yourself".into()));
    }

    let users = UserRepo::new(state.db.clone());
    users.get(&target)?;
    users.block(&caller.id, &target).map_err(|err| match err {
        tether_store::StoreError::Conflict(_) => ApiError::BadRequest("already blocked".into()),
        other => ApiError::Store(other),
    })?;
    Ok(Json(json!({ "msg": "blocked" })))
}

pub async fn unblock(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let target = parse_user_id(&id)?;
    let users = UserRepo::new(state.db.clone());
    if !users.unblock(&caller.id, &target)? {
        return Err(ApiError::BadRequest("not blocked".into()));
    }
    Ok(Json(json!({ "msg": "unblocked" })))
}

// ── Moderation ──

pub async fn ban(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    set_banned(state, caller, &id, true).await
}

pub async fn unban(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    set_banned(state, caller, &id, false).await
}

async fn set_banned(
    state: AppState,
    caller: AuthUser,
    id: &str,
    banned: bool,
) -> Result<Json<Value>, ApiError> {
    if !caller.is_admin {
        return Err(ApiError::Forbidden("admin only".into()));
    }
    let target = parse_user_id(id)?;
    if target == caller.id {
        return Err(ApiError::BadRequest("cannot ban yourself".into()));
    }

    UserRepo::new(state.db.clone()).set_banned(&target, banned)?;
    tracing::info!(admin = %caller.id, target = %target, banned, "moderation action");
    Ok(Json(json!({ "msg": if banned { "banned" } else { "unbanned" } })))
}
