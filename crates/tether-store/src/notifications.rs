use chrono::Utc;
use tracing::instrument;

use tether_core::ids::{NotificationId, UserId};
use tether_core::protocol::NotificationView;

use crate::database::Database;
use crate::error::StoreError;

/// Maximum notification text length, enforced here and by a schema CHECK.
pub const MAX_NOTIFICATION_LEN: usize = 100;

fn row_to_view(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationView> {
    Ok(NotificationView {
        id: NotificationId::from_raw(row.get::<_, String>(0)?),
        user_id: UserId::from_raw(row.get::<_, String>(1)?),
        message: row.get(2)?,
        is_read: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub struct NotificationRepo {
    db: Database,
}

impl NotificationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, message), fields(user = %user))]
    pub fn create(&self, user: &UserId, message: &str) -> Result<NotificationView, StoreError> {
        if message.chars().count() > MAX_NOTIFICATION_LEN {
            return Err(StoreError::Conflict(format!(
                "notification text exceeds {MAX_NOTIFICATION_LEN} chars"
            )));
        }

        let id = NotificationId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, message, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.as_str(), user.as_str(), message, now],
            )?;

            Ok(NotificationView {
                id,
                user_id: user.clone(),
                message: message.to_string(),
                is_read: false,
                created_at: now,
            })
        })
    }

    /// Notifications for `user`, newest first.
    #[instrument(skip(self), fields(user = %user))]
    pub fn list_for_user(&self, user: &UserId) -> Result<Vec<NotificationView>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, message, is_read, created_at FROM notifications
                 WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt
                .query_map([user.as_str()], row_to_view)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark every notification for `user` as read. Idempotent; returns the
    /// number of rows that changed.
    #[instrument(skip(self), fields(user = %user))]
    pub fn mark_all_read(&self, user: &UserId) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
                [user.as_str()],
            )?;
            Ok(n)
        })
    }
}
