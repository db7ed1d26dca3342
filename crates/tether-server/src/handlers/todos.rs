//! Personal todo CRUD. Dates are plain `YYYY-MM-DD` strings.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use tether_core::ids::TodoId;
use tether_store::todos::{TodoRepo, TodoRow};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::server::AppState;

fn valid_date(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

pub async fn list(
    State(state): State<AppState>,
    caller: AuthUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<TodoRow>>, ApiError> {
    let date = params.get("date").map(String::as_str);
    if let Some(date) = date {
        if !valid_date(date) {
            return Err(ApiError::BadRequest("date must be YYYY-MM-DD".into()));
        }
    }
    let todos = TodoRepo::new(state.db.clone());
    Ok(Json(todos.list_for_user(&caller.id, date)?))
}

#[derive(Deserialize)]
pub struct CreateTodoBody {
    pub text: String,
    pub date: String,
}

pub async fn create(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(body): Json<CreateTodoBody>,
) -> Result<Json<TodoRow>, ApiError> {
    let text = body.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("text is required".into()));
    }
    if !valid_date(&body.date) {
        return Err(ApiError::BadRequest("date must be YYYY-MM-DD".into()));
    }

    let todos = TodoRepo::new(state.db.clone());
    Ok(Json(todos.create(&caller.id, text, &body.date)?))
}

#[derive(Deserialize)]
pub struct UpdateTodoBody {
    pub completed: bool,
}

pub async fn update(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateTodoBody>,
) -> Result<Json<TodoRow>, ApiError> {
    if !TodoId::is_valid(&id) {
        return Err(ApiError::BadRequest("invalid todo id".into()));
    }
    let todos = TodoRepo::new(state.db.clone());
    let todo = todos.set_completed(&caller.id, &TodoId::from_raw(id), body.completed)?;
    Ok(Json(todo))
}

pub async fn delete(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !TodoId::is_valid(&id) {
        return Err(ApiError::BadRequest("invalid todo id".into()));
    }
    let todos = TodoRepo::new(state.db.clone());
    if !todos.delete(&caller.id, &TodoId::from_raw(id))? {
        return Err(ApiError::NotFound("todo not found".into()));
    }
    Ok(Json(json!({ "msg": "deleted" })))
}
