use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tether_core::ids::UserId;

use crate::database::Database;
use crate::error::StoreError;

/// Full user record. The password hash never leaves the server crate.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub bio: Option<String>,
    pub is_admin: bool,
    pub is_banned: bool,
    pub created_at: String,
}

/// Minimal user shape for listings and search results.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

const USER_COLUMNS: &str =
    "id, username, email, password_hash, bio, is_admin, is_banned, created_at";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: UserId::from_raw(row.get::<_, String>(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        bio: row.get(4)?,
        is_admin: row.get(5)?,
        is_banned: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: UserId::from_raw(row.get::<_, String>(0)?),
        username: row.get(1)?,
        email: row.get(2)?,
    })
}

/// Escape LIKE special characters for safe pattern matching.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a user. Username/email uniqueness is enforced by the store and
    /// surfaces as `StoreError::Conflict`.
    #[instrument(skip(self, password_hash), fields(username))]
    pub fn create(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<UserRow, StoreError> {
        let id = UserId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.as_str(), username, email, password_hash, now],
            )?;

            Ok(UserRow {
                id,
                username: username.to_string(),
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                bio: None,
                is_admin: false,
                is_banned: false,
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id.as_str()],
                row_to_user,
            )
            .map_err(|_| StoreError::NotFound(format!("user {id}")))
        })
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<UserRow>, StoreError> {
        self.db.with_conn(|conn| {
            match conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                [email],
                row_to_user,
            ) {
                Ok(user) => Ok(Some(user)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Case-insensitive username substring search.
    pub fn search(&self, query: &str) -> Result<Vec<UserSummary>, StoreError> {
        let pattern = format!("%{}%", escape_like(query));
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, email FROM users
                 WHERE username LIKE ?1 ESCAPE '\\' ORDER BY username",
            )?;
            let rows = stmt
                .query_map([&pattern], row_to_summary)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Update own-profile fields. `None` leaves a field untouched.
    #[instrument(skip(self, password_hash), fields(user_id = %id))]
    pub fn update_profile(
        &self,
        id: &UserId,
        username: Option<&str>,
        bio: Option<&str>,
        password_hash: Option<&str>,
    ) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            if let Some(username) = username {
                conn.execute(
                    "UPDATE users SET username = ?1 WHERE id = ?2",
                    rusqlite::params![username, id.as_str()],
                )?;
            }
            if let Some(bio) = bio {
                conn.execute(
                    "UPDATE users SET bio = ?1 WHERE id = ?2",
                    rusqlite::params![bio, id.as_str()],
                )?;
            }
            if let Some(hash) = password_hash {
                conn.execute(
                    "UPDATE users SET password_hash = ?1 WHERE id = ?2",
                    rusqlite::params![hash, id.as_str()],
                )?;
            }
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id.as_str()],
                row_to_user,
            )
            .map_err(|_| StoreError::NotFound(format!("user {id}")))
        })
    }

    // ── Social graph ──

    /// Record a follow edge. Conflict if it already exists.
    pub fn follow(&self, follower: &UserId, followee: &UserId) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO follows (follower_id, followee_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![follower.as_str(), followee.as_str(), now],
            )?;
            Ok(())
        })
    }

    pub fn unfollow(&self, follower: &UserId, followee: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                rusqlite::params![follower.as_str(), followee.as_str()],
            )?;
            Ok(n > 0)
        })
    }

    pub fn is_following(&self, follower: &UserId, followee: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                rusqlite::params![follower.as_str(), followee.as_str()],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// Record a block edge and sever the follow relationship in both
    /// directions, matching the original app's behavior.
    pub fn block(&self, blocker: &UserId, blocked: &UserId) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO blocks (blocker_id, blocked_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![blocker.as_str(), blocked.as_str(), now],
            )?;
            conn.execute(
                "DELETE FROM follows
                 WHERE (follower_id = ?1 AND followee_id = ?2)
                    OR (follower_id = ?2 AND followee_id = ?1)",
                rusqlite::params![blocker.as_str(), blocked.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn unblock(&self, blocker: &UserId, blocked: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                rusqlite::params![blocker.as_str(), blocked.as_str()],
            )?;
            Ok(n > 0)
        })
    }

    pub fn is_blocking(&self, blocker: &UserId, blocked: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                rusqlite::params![blocker.as_str(), blocked.as_str()],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// True if either party has blocked the other.
    pub fn is_blocked_between(&self, a: &UserId, b: &UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM blocks
                 WHERE (blocker_id = ?1 AND blocked_id = ?2)
                    OR (blocker_id = ?2 AND blocked_id = ?1)",
                rusqlite::params![a.as_str(), b.as_str()],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    pub fn followers(&self, id: &UserId) -> Result<Vec<UserSummary>, StoreError> {
        self.edge_list(
            id,
            "SELECT u.id, u.username, u.email FROM follows f
             JOIN users u ON u.id = f.follower_id
             WHERE f.followee_id = ?1 ORDER BY u.username",
        )
    }

    pub fn following(&self, id: &UserId) -> Result<Vec<UserSummary>, StoreError> {
        self.edge_list(
            id,
            "SELECT u.id, u.username, u.email FROM follows f
             JOIN users u ON u.id = f.followee_id
             WHERE f.follower_id = ?1 ORDER BY u.username",
        )
    }

    pub fn blocked(&self, id: &UserId) -> Result<Vec<UserSummary>, StoreError> {
        self.edge_list(
            id,
            "SELECT u.id, u.username, u.email FROM blocks b
             JOIN users u ON u.id = b.blocked_id
             WHERE b.blocker_id = ?1 ORDER BY u.username",
        )
    }

    fn edge_list(&self, id: &UserId, sql: &str) -> Result<Vec<UserSummary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map([id.as_str()], row_to_summary)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ── Moderation ──

    pub fn set_banned(&self, id: &UserId, banned: bool) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users SET is_banned = ?1 WHERE id = ?2",
                rusqlite::params![banned, id.as_str()],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
    }

    pub fn set_admin(&self, id: &UserId, admin: bool) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users SET is_admin = ?1 WHERE id = ?2",
                rusqlite::params![admin, id.as_str()],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
    }
}
