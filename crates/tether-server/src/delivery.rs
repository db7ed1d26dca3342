use std::sync::Arc;

use tether_core::ids::UserId;
use tether_core::protocol::{MessageView, NotificationView, ServerEvent};

use crate::registry::ConnectionRegistry;

/// Pushes events for freshly persisted writes to the right live
/// connections. Always called after the write has committed; a missed
/// push is only ever a latency loss since REST listings remain the
/// source of truth.
pub struct DeliveryRouter {
    registry: Arc<ConnectionRegistry>,
}

impl DeliveryRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Push a new message to the receiver's connections, and echo it to
    /// the sender's other tabs.
    pub fn message_created(&self, message: &MessageView) {
        let Some(event) = ServerEvent::NewMessage {
            message: message.clone(),
        }
        .encode() else {
            return;
        };
        self.registry.push_to_user(&message.receiver.id, &event);
        if message.sender.id != message.receiver.id {
            self.registry.push_to_user(&message.sender.id, &event);
        }
    }

    pub fn notification_created(&self, notification: &NotificationView) {
        if let Some(event) = (ServerEvent::NewNotification {
            notification: notification.clone(),
        })
        .encode()
        {
            self.registry.push_to_user(&notification.user_id, &event);
        }
    }

    /// Tell the counterpart their messages were just read, but only if
    /// they are actually looking at the viewer's conversation.
    pub fn conversation_read(&self, viewer: &UserId, counterpart: &UserId) {
        if self.registry.active_chat_partner(counterpart).as_ref() != Some(viewer) {
            return;
        }
        if let Some(event) = (ServerEvent::MessagesRead { by: viewer.clone() }).encode() {
            self.registry.push_to_user(counterpart, &event);
        }
    }

    /// Multi-tab sync after a user marks all notifications read.
    pub fn notifications_read(&self, user: &UserId) {
        if let Some(event) = ServerEvent::NotificationsRead.encode() {
            self.registry.push_to_user(user, &event);
        }
    }
}
