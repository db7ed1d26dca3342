//! Wire protocol for the WebSocket channel.
//!
//! Frames are JSON text with a `type` discriminator. Unknown tags or missing
//! required fields fail deserialization; the socket layer treats that as a
//! protocol error and closes the connection.

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, NotificationId, UserId};

/// WebSocket close code for protocol/policy violations (bad `join` identity,
/// re-bind attempts).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// WebSocket close code for frames the server cannot accept (invalid JSON,
/// unknown `type`).
pub const CLOSE_UNSUPPORTED_DATA: u16 = 1003;

/// Client → server frames.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Announce identity; binds the connection to a user.
    #[serde(rename_all = "camelCase")]
    Join { user_id: String },
    /// Declare the counterpart whose conversation is now on screen.
    #[serde(rename_all = "camelCase")]
    EnterChat { chat_with: String },
    /// Clear the active chat declaration.
    LeaveChat,
}

/// Server → client push events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A message involving this user was created.
    NewMessage { message: MessageView },
    /// A notification for this user was created.
    NewNotification { notification: NotificationView },
    /// This user's notifications were just marked read (multi-tab sync).
    NotificationsRead,
    /// The counterpart `by` just read this user's messages to them.
    MessagesRead { by: UserId },
}

impl ServerEvent {
    /// Serialize for the wire. Our own types always serialize; a failure is
    /// a bug, surfaced as None so delivery drops rather than panics.
    pub fn encode(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

/// A user as embedded in joined payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: UserId,
    pub username: String,
}

/// A message with sender/receiver display fields attached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub text: String,
    pub sender: UserRef,
    pub receiver: UserRef,
    pub timestamp: String,
    pub is_read: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: NotificationId,
    pub user_id: UserId,
    pub message: String,
    pub is_read: bool,
    pub created_at: String,
}
