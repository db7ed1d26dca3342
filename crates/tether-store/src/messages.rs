use std::collections::HashMap;

use chrono::Utc;
use tracing::instrument;

use tether_core::ids::{MessageId, UserId};
use tether_core::protocol::{MessageView, UserRef};

use crate::database::Database;
use crate::error::StoreError;

const VIEW_SELECT: &str = "SELECT m.id, m.text, m.timestamp, m.is_read,
            s.id, s.username, r.id, r.username
     FROM messages m
     JOIN users s ON s.id = m.sender_id
     JOIN users r ON r.id = m.receiver_id";

fn row_to_view(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageView> {
    Ok(MessageView {
        id: MessageId::from_raw(row.get::<_, String>(0)?),
        text: row.get(1)?,
        timestamp: row.get(2)?,
        is_read: row.get(3)?,
        sender: UserRef {
            id: UserId::from_raw(row.get::<_, String>(4)?),
            username: row.get(5)?,
        },
        receiver: UserRef {
            id: UserId::from_raw(row.get::<_, String>(6)?),
            username: row.get(7)?,
        },
    })
}

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a message and return it with sender/receiver display fields
    /// attached. `is_read` is decided by the caller before the write (true
    /// only when the receiver already has the sender's conversation open).
    #[instrument(skip(self, text), fields(sender = %sender, receiver = %receiver, is_read))]
    pub fn create(
        &self,
        sender: &UserId,
        receiver: &UserId,
        text: &str,
        is_read: bool,
    ) -> Result<MessageView, StoreError> {
        let id = MessageId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, timestamp, is_read)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    sender.as_str(),
                    receiver.as_str(),
                    text,
                    now,
                    is_read,
                ],
            )?;

            conn.query_row(
                &format!("{VIEW_SELECT} WHERE m.id = ?1"),
                [id.as_str()],
                row_to_view,
            )
            .map_err(StoreError::from)
        })
    }

    /// All non-deleted messages involving `user`, oldest first.
    #[instrument(skip(self), fields(user = %user))]
    pub fn list_for_user(&self, user: &UserId) -> Result<Vec<MessageView>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{VIEW_SELECT}
                 WHERE (m.sender_id = ?1 OR m.receiver_id = ?1) AND m.is_deleted = 0
                 ORDER BY m.timestamp, m.id"
            ))?;
            let rows = stmt
                .query_map([user.as_str()], row_to_view)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Mark everything `counterpart` sent to `viewer` as read. Idempotent:
    /// already-read and soft-deleted rows are untouched. Returns the number
    /// of rows that changed.
    #[instrument(skip(self), fields(viewer = %viewer, counterpart = %counterpart))]
    pub fn mark_conversation_read(
        &self,
        viewer: &UserId,
        counterpart: &UserId,
    ) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND is_deleted = 0 AND is_read = 0",
                rusqlite::params![viewer.as_str(), counterpart.as_str()],
            )?;
            Ok(n)
        })
    }

    /// Unread message counts for `viewer`, grouped by sender.
    #[instrument(skip(self), fields(viewer = %viewer))]
    pub fn unread_counts(&self, viewer: &UserId) -> Result<HashMap<UserId, i64>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT sender_id, COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND is_read = 0 AND is_deleted = 0
                 GROUP BY sender_id",
            )?;
            let rows = stmt
                .query_map([viewer.as_str()], |row| {
                    Ok((UserId::from_raw(row.get::<_, String>(0)?), row.get::<_, i64>(1)?))
                })?
                .collect::<Result<HashMap<_, _>, _>>()?;
            Ok(rows)
        })
    }

    /// Soft-delete a message the caller sent. Clears `is_read` in the same
    /// write so a deleted message can never count as read.
    #[instrument(skip(self), fields(message = %id, sender = %sender))]
    pub fn soft_delete(&self, id: &MessageId, sender: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET is_deleted = 1, is_read = 0
                 WHERE id = ?1 AND sender_id = ?2 AND is_deleted = 0",
                rusqlite::params![id.as_str(), sender.as_str()],
            )?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserRepo;

    fn setup() -> (MessageRepo, UserId, UserId) {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        let a = users.create("alice", "alice@example.com", "hash").unwrap();
        let b = users.create("bob", "bob@example.com", "hash").unwrap();
        (MessageRepo::new(db), a.id, b.id)
    }

    #[test]
    fn create_attaches_display_fields() {
        let (repo, a, b) = setup();
        let view = repo.create(&a, &b, "hi", false).unwrap();
        assert_eq!(view.text, "hi");
        assert_eq!(view.sender.username, "alice");
        assert_eq!(view.receiver.username, "bob");
        assert!(!view.is_read);
    }

    #[test]
    fn create_seen_immediately_when_flagged() {
        let (repo, a, b) = setup();
        let view = repo.create(&a, &b, "hi", true).unwrap();
        assert!(view.is_read);
        assert!(repo.unread_counts(&b).unwrap().is_empty());
    }

    #[test]
    fn list_is_oldest_first_and_covers_both_directions() {
        let (repo, a, b) = setup();
        repo.create(&a, &b, "first", false).unwrap();
        repo.create(&b, &a, "second", false).unwrap();
        repo.create(&a, &b, "third", false).unwrap();

        let list = repo.list_for_user(&a).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].text, "first");
        assert_eq!(list[2].text, "third");
    }

    #[test]
    fn mark_conversation_read_is_idempotent() {
        let (repo, a, b) = setup();
        repo.create(&a, &b, "one", false).unwrap();
        repo.create(&a, &b, "two", false).unwrap();

        assert_eq!(repo.mark_conversation_read(&b, &a).unwrap(), 2);
        assert_eq!(repo.mark_conversation_read(&b, &a).unwrap(), 0);

        // nothing flipped back to unread
        assert!(repo.unread_counts(&b).unwrap().is_empty());
    }

    #[test]
    fn mark_read_only_touches_one_direction() {
        let (repo, a, b) = setup();
        repo.create(&a, &b, "a to b", false).unwrap();
        repo.create(&b, &a, "b to a", false).unwrap();

        repo.mark_conversation_read(&b, &a).unwrap();

        // a's inbox is still unread
        let counts = repo.unread_counts(&a).unwrap();
        assert_eq!(counts.get(&b), Some(&1));
    }

    #[test]
    fn unread_counts_group_by_sender() {
        let (repo, a, b) = setup();
        let db = repo.db.clone();
        let users = UserRepo::new(db);
        let c = users.create("carol", "carol@example.com", "hash").unwrap();

        repo.create(&a, &b, "1", false).unwrap();
        repo.create(&a, &b, "2", false).unwrap();
        repo.create(&c.id, &b, "3", false).unwrap();

        let counts = repo.unread_counts(&b).unwrap();
        assert_eq!(counts.get(&a), Some(&2));
        assert_eq!(counts.get(&c.id), Some(&1));
        assert_eq!(counts.values().sum::<i64>(), 3);
    }

    #[test]
    fn soft_delete_hides_and_unreads() {
        let (repo, a, b) = setup();
        let msg = repo.create(&a, &b, "oops", false).unwrap();

        assert!(repo.soft_delete(&msg.id, &a).unwrap());
        // repeated delete is a no-op
        assert!(!repo.soft_delete(&msg.id, &a).unwrap());

        assert!(repo.list_for_user(&b).unwrap().is_empty());
        assert!(repo.unread_counts(&b).unwrap().is_empty());
    }

    #[test]
    fn soft_delete_requires_sender() {
        let (repo, a, b) = setup();
        let msg = repo.create(&a, &b, "mine", false).unwrap();
        assert!(!repo.soft_delete(&msg.id, &b).unwrap());
        assert_eq!(repo.list_for_user(&b).unwrap().len(), 1);
    }

    #[test]
    fn deleted_messages_never_read() {
        let (repo, a, b) = setup();
        let msg = repo.create(&a, &b, "gone", false).unwrap();
        repo.soft_delete(&msg.id, &a).unwrap();

        // mark-read skips deleted rows
        assert_eq!(repo.mark_conversation_read(&b, &a).unwrap(), 0);

        // the schema CHECK rejects is_deleted AND is_read outright
        let err = repo.db.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET is_read = 1 WHERE id = ?1",
                [msg.id.as_str()],
            )
            .map_err(StoreError::from)
        });
        assert!(err.is_err());
    }
}
