use std::path::Path;

use charla_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Web-login account. Pure CRUD; the chat core never consults it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

pub struct UserStore {
    conn: Connection,
}

impl UserStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening user store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self { conn };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    username TEXT NOT NULL UNIQUE,
                    password TEXT NOT NULL
                );",
            )
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn create(&self, username: &str, password: &str) -> Result<User> {
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password: password.to_string(),
        };
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO users (id, username, password) VALUES (?1, ?2, ?3)",
            params![user.id, user.username, user.password],
        );
        match inserted {
            Ok(0) => Err(Error::Validation(format!(
                "username '{username}' is already taken"
            ))),
            Ok(_) => Ok(user),
            Err(e) => Err(Error::Database(format!("failed to create user: {e}"))),
        }
    }

    pub fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, username, password FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to look up user: {e}")))
    }

    /// Returns the user when the credentials match, `None` otherwise.
    pub fn verify_login(&self, username: &str, password: &str) -> Result<Option<User>> {
        Ok(self
            .get_by_username(username)?
            .filter(|user| user.password == password))
    }
}

#[cfg(test)]
mod tests {
    use super::UserStore;

    #[test]
    fn create_and_login_round_trip() {
        let store = UserStore::in_memory().expect("in-memory store should open");
        let user = store.create("alice", "s3creta").expect("create should succeed");
        assert_eq!(user.username, "alice");

        let found = store.verify_login("alice", "s3creta").expect("login query");
        assert_eq!(found.map(|u| u.id), Some(user.id));
    }

    #[test]
    fn wrong_password_fails_login() {
        let store = UserStore::in_memory().expect("in-memory store should open");
        store.create("alice", "s3creta").expect("create");

        assert!(store.verify_login("alice", "otra").expect("query").is_none());
        assert!(store.verify_login("nadie", "s3creta").expect("query").is_none());
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let store = UserStore::in_memory().expect("in-memory store should open");
        store.create("alice", "uno").expect("first create");

        let err = store.create("alice", "dos").expect_err("duplicate should fail");
        assert!(matches!(err, charla_common::Error::Validation(_)));
    }

    #[test]
    fn serialized_user_hides_the_password() {
        let store = UserStore::in_memory().expect("in-memory store should open");
        let user = store.create("alice", "s3creta").expect("create");
        let json = serde_json::to_value(&user).expect("serialize");
        assert!(json.get("password").is_none());
        assert_eq!(json["username"], "alice");
    }
}
