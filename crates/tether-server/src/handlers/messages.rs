//! Direct messages: listing, sending (the persist-then-push write path),
//! read-marking, unread counts, and soft delete.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use tether_core::ids::{MessageId, UserId};
use tether_core::protocol::MessageView;
use tether_store::messages::MessageRepo;
use tether_store::notifications::{NotificationRepo, MAX_NOTIFICATION_LEN};
use tether_store::users::UserRepo;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::server::AppState;

const MAX_MESSAGE_LEN: usize = 1000;

pub async fn list(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let messages = MessageRepo::new(state.db.clone());
    Ok(Json(messages.list_for_user(&caller.id)?))
}

#[derive(Deserialize)]
pub struct SendMessageBody {
    pub text: String,
    pub receiver: String,
}

/// Send a message. The write commits first; pushes to live sockets are
/// best-effort afterwards. If the receiver already has the sender's
/// conversation open the message is born read and no notification is
/// raised.
pub async fn send(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(body): Json<SendMessageBody>,
) -> Result<Json<MessageView>, ApiError> {
    let text = body.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("message text is required".into()));
    }
    if text.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::BadRequest(format!(
            "message text exceeds {MAX_MESSAGE_LEN} characters"
        )));
    }
    if !UserId::is_valid(&body.receiver) {
        return Err(ApiError::BadRequest("invalid receiver id".into()));
    }
    let receiver = UserId::from_raw(body.receiver);
    if receiver == caller.id {
        return Err(ApiError::BadRequest("cannot message yourself".into()));
    }

    let users = UserRepo::new(state.db.clone());
    let receiver_row = users.get(&receiver)?;
    if receiver_row.is_banned {
        return Err(ApiError::Forbidden("user is banned".into()));
    }
    if users.is_blocked_between(&caller.id, &receiver)? {
        return Err(ApiError::Forbidden("cannot message this user".into()));
    }

    // Seen immediately when the receiver is already looking at this chat.
    let seen = state.registry.active_chat_partner(&receiver).as_ref() == Some(&caller.id);

    let messages = MessageRepo::new(state.db.clone());
    let message = messages.create(&caller.id, &receiver, text, seen)?;
    state.delivery.message_created(&message);

    if !seen {
        let mut alert = format!("New message from {}", message.sender.username);
        if alert.chars().count() > MAX_NOTIFICATION_LEN {
            alert = alert.chars().take(MAX_NOTIFICATION_LEN).collect();
        }
        let notifications = NotificationRepo::new(state.db.clone());
        match notifications.create(&receiver, &alert) {
            Ok(notification) => state.delivery.notification_created(&notification),
            Err(err) => {
                // The message itself is already committed and pushed.
                tracing::error!(receiver = %receiver, %err, "notification write failed");
            }
        }
    }

    Ok(Json(message))
}

#[derive(Deserialize)]
pub struct MarkReadBody {
    pub sender: String,
}

/// Mark every message from `sender` to the caller as read. Idempotent.
pub async fn mark_read(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(body): Json<MarkReadBody>,
) -> Result<Json<Value>, ApiError> {
    if !UserId::is_valid(&body.sender) {
        return Err(ApiError::BadRequest("invalid sender id".into()));
    }
    let sender = UserId::from_raw(body.sender);

    let messages = MessageRepo::new(state.db.clone());
    let updated = messages.mark_conversation_read(&caller.id, &sender)?;
    if updated > 0 {
        state.delivery.conversation_read(&caller.id, &sender);
    }
    Ok(Json(json!({ "updated": updated })))
}

/// Unread message counts for the caller, keyed by sender.
pub async fn unread_count(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<HashMap<UserId, i64>>, ApiError> {
    let messages = MessageRepo::new(state.db.clone());
    Ok(Json(messages.unread_counts(&caller.id)?))
}

/// Soft-delete one of the caller's own sent messages.
pub async fn delete(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !MessageId::is_valid(&id) {
        return Err(ApiError::BadRequest("invalid message id".into()));
    }
    let messages = MessageRepo::new(state.db.clone());
    if !messages.soft_delete(&MessageId::from_raw(id), &caller.id)? {
        return Err(ApiError::NotFound("message not found".into()));
    }
    Ok(Json(json!({ "msg": "deleted" })))
}
