use serde::{Deserialize, Serialize};
use tracing::instrument;

use tether_core::ids::{TodoId, UserId};

use crate::database::Database;
use crate::error::StoreError;

/// A todo item. `date` is a calendar day (`YYYY-MM-DD`), matching the
/// original app's midnight-normalized dates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoRow {
    pub id: TodoId,
    pub user_id: UserId,
    pub text: String,
    pub completed: bool,
    pub date: String,
}

fn row_to_todo(row: &rusqlite::Row<'_>) -> rusqlite::Result<TodoRow> {
    Ok(TodoRow {
        id: TodoId::from_raw(row.get::<_, String>(0)?),
        user_id: UserId::from_raw(row.get::<_, String>(1)?),
        text: row.get(2)?,
        completed: row.get(3)?,
        date: row.get(4)?,
    })
}

pub struct TodoRepo {
    db: Database,
}

impl TodoRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, text), fields(user = %user, date))]
    pub fn create(&self, user: &UserId, text: &str, date: &str) -> Result<TodoRow, StoreError> {
        let id = TodoId::new();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO todos (id, user_id, text, date) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.as_str(), user.as_str(), text, date],
            )?;
            Ok(TodoRow {
                id,
                user_id: user.clone(),
                text: text.to_string(),
                completed: false,
                date: date.to_string(),
            })
        })
    }

    /// Todos owned by `user`, optionally filtered to one day.
    #[instrument(skip(self), fields(user = %user))]
    pub fn list_for_user(
        &self,
        user: &UserId,
        date: Option<&str>,
    ) -> Result<Vec<TodoRow>, StoreError> {
        self.db.with_conn(|conn| {
            let rows = match date {
                Some(date) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, user_id, text, completed, date FROM todos
                         WHERE user_id = ?1 AND date = ?2 ORDER BY date, id",
                    )?;
                    let rows = stmt
                        .query_map(rusqlite::params![user.as_str(), date], row_to_todo)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, user_id, text, completed, date FROM todos
                         WHERE user_id = ?1 ORDER BY date, id",
                    )?;
                    let rows = stmt
                        .query_map([user.as_str()], row_to_todo)?
                        .collect::<Result<Vec<_>, _>>()?;
                    rows
                }
            };
            Ok(rows)
        })
    }

    /// Flip completion. NotFound covers both missing todos and todos owned
    /// by someone else.
    #[instrument(skip(self), fields(todo = %id, user = %user, completed))]
    pub fn set_completed(
        &self,
        user: &UserId,
        id: &TodoId,
        completed: bool,
    ) -> Result<TodoRow, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE todos SET completed = ?1 WHERE id = ?2 AND user_id = ?3",
                rusqlite::params![completed, id.as_str(), user.as_str()],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(format!("todo {id}")));
            }
            conn.query_row(
                "SELECT id, user_id, text, completed, date FROM todos WHERE id = ?1",
                [id.as_str()],
                row_to_todo,
            )
            .map_err(StoreError::from)
        })
    }

    #[instrument(skip(self), fields(todo = %id, user = %user))]
    pub fn delete(&self, user: &UserId, id: &TodoId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM todos WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id.as_str(), user.as_str()],
            )?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserRepo;

    fn setup() -> (TodoRepo, UserId, UserId) {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        let a = users.create("alice", "alice@example.com", "hash").unwrap();
        let b = users.create("bob", "bob@example.com", "hash").unwrap();
        (TodoRepo::new(db), a.id, b.id)
    }

    #[test]
    fn create_and_list() {
        let (repo, a, _) = setup();
        repo.create(&a, "water plants", "2026-08-28").unwrap();
        repo.create(&a, "write report", "2026-08-29").unwrap();

        let all = repo.list_for_user(&a, None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(!all[0].completed);
    }

    #[test]
    fn list_filters_by_date() {
        let (repo, a, _) = setup();
        repo.create(&a, "today", "2026-08-28").unwrap();
        repo.create(&a, "tomorrow", "2026-08-29").unwrap();

        let today = repo.list_for_user(&a, Some("2026-08-28")).unwrap();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].text, "today");
    }

    #[test]
    fn todos_are_scoped_to_owner() {
        let (repo, a, b) = setup();
        let todo = repo.create(&a, "mine", "2026-08-28").unwrap();

        assert!(repo.list_for_user(&b, None).unwrap().is_empty());
        assert!(matches!(
            repo.set_completed(&b, &todo.id, true).unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(!repo.delete(&b, &todo.id).unwrap());
    }

    #[test]
    fn set_completed_roundtrip() {
        let (repo, a, _) = setup();
        let todo = repo.create(&a, "toggle me", "2026-08-28").unwrap();

        let done = repo.set_completed(&a, &todo.id, true).unwrap();
        assert!(done.completed);

        let undone = repo.set_completed(&a, &todo.id, false).unwrap();
        assert!(!undone.completed);
    }

    #[test]
    fn delete_removes() {
        let (repo, a, _) = setup();
        let todo = repo.create(&a, "ephemeral", "2026-08-28").unwrap();
        assert!(repo.delete(&a, &todo.id).unwrap());
        assert!(!repo.delete(&a, &todo.id).unwrap());
        assert!(repo.list_for_user(&a, None).unwrap().is_empty());
    }
}
