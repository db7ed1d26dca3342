//! Notification listing, creation, and the mark-all-read surface.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use tether_core::ids::UserId;
use tether_core::protocol::NotificationView;
use tether_store::notifications::{NotificationRepo, MAX_NOTIFICATION_LEN};
use tether_store::users::UserRepo;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::server::AppState;

pub async fn list(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<Vec<NotificationView>>, ApiError> {
    let notifications = NotificationRepo::new(state.db.clone());
    Ok(Json(notifications.list_for_user(&caller.id)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationBody {
    pub user_id: String,
    pub message: String,
}

/// Create a notification for a user and push it to their live sockets.
pub async fn create(
    State(state): State<AppState>,
    _caller: AuthUser,
    Json(body): Json<CreateNotificationBody>,
) -> Result<Json<NotificationView>, ApiError> {
    if !UserId::is_valid(&body.user_id) {
        return Err(ApiError::BadRequest("invalid user id".into()));
    }
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message is required".into()));
    }
    if body.message.chars().count() > MAX_NOTIFICATION_LEN {
        return Err(ApiError::BadRequest(format!(
            "message exceeds {MAX_NOTIFICATION_LEN} characters"
        )));
    }
    let target = UserId::from_raw(body.user_id);
    UserRepo::new(state.db.clone()).get(&target)?;

    let notifications = NotificationRepo::new(state.db.clone());
    let notification = notifications.create(&target, body.message.trim())?;
    state.delivery.notification_created(&notification);
    Ok(Json(notification))
}

/// Mark all of the caller's notifications read. Idempotent; other tabs
/// get a sync event when anything actually flipped.
pub async fn mark_all_read(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let notifications = NotificationRepo::new(state.db.clone());
    let updated = notifications.mark_all_read(&caller.id)?;
    if updated > 0 {
        state.delivery.notifications_read(&caller.id);
    }
    Ok(Json(json!({ "updated": updated })))
}
