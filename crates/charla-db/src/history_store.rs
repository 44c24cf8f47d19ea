use std::collections::HashMap;
use std::path::Path;

use charla_common::{Error, Result, Sender, StoredMessage};
use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::{info, warn};

/// Durable per-identity message log.
///
/// Reads are served from an in-memory map; every mutation is flushed to the
/// SQLite backing. A failed flush keeps the in-memory mutation visible for
/// the rest of the process lifetime and is only logged — durability is
/// best-effort until the next successful write.
pub struct HistoryStore {
    conn: Connection,
    by_identity: HashMap<String, Vec<StoredMessage>>,
    next_id: i64,
}

impl HistoryStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening history store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let mut store = Self {
            conn,
            by_identity: HashMap::new(),
            next_id: 1,
        };
        store.run_migrations()?;
        store.load_messages()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS messages (
                    id INTEGER PRIMARY KEY,
                    identity TEXT NOT NULL,
                    sender TEXT NOT NULL,
                    content TEXT NOT NULL,
                    timestamp TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_identity
                    ON messages(identity, id);",
            )
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Load every row into the in-memory map and seed the id counter from
    /// `max(id) + 1`, so ids stay monotonic across restarts. Ids are never
    /// reused after delete within a process lifetime.
    fn load_messages(&mut self) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, identity, sender, content, timestamp FROM messages ORDER BY id")
            .map_err(|e| Error::Database(format!("failed to prepare load query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let sender_raw: String = row.get(2)?;
                let timestamp_raw: String = row.get(4)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    sender_raw,
                    row.get::<_, String>(3)?,
                    timestamp_raw,
                ))
            })
            .map_err(|e| Error::Database(format!("failed to load messages: {e}")))?;

        for row in rows {
            let (id, identity, sender_raw, content, timestamp_raw) =
                row.map_err(|e| Error::Database(format!("failed to read message row: {e}")))?;
            let Some(sender) = Sender::parse(&sender_raw) else {
                warn!("skipping message {id} with unknown sender '{sender_raw}'");
                continue;
            };
            let message = StoredMessage {
                id,
                identity: identity.clone(),
                sender,
                content,
                timestamp: parse_timestamp(&timestamp_raw),
            };
            self.by_identity.entry(identity).or_default().push(message);
            if id >= self.next_id {
                self.next_id = id + 1;
            }
        }

        Ok(())
    }

    /// Append a message for an identity, assigning the next global id.
    ///
    /// Content is not validated here; callers reject empty input before any
    /// state changes.
    pub fn append(&mut self, identity: &str, sender: Sender, content: &str) -> StoredMessage {
        let message = StoredMessage {
            id: self.next_id,
            identity: identity.to_string(),
            sender,
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        self.next_id += 1;

        self.by_identity
            .entry(identity.to_string())
            .or_default()
            .push(message.clone());

        if let Err(e) = self.flush_append(&message) {
            warn!("history write failed for message {}: {e}", message.id);
        }
        message
    }

    fn flush_append(&self, message: &StoredMessage) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO messages (id, identity, sender, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id,
                    message.identity,
                    message.sender.as_str(),
                    message.content,
                    message.timestamp.to_rfc3339(),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to insert message: {e}")))?;
        Ok(())
    }

    /// All messages for an identity, ascending by id. Re-callable, no cursor.
    pub fn read_all(&self, identity: &str) -> Vec<StoredMessage> {
        self.by_identity.get(identity).cloned().unwrap_or_default()
    }

    /// The most recent message for an identity; the dedup guard's input.
    pub fn last_message(&self, identity: &str) -> Option<&StoredMessage> {
        self.by_identity.get(identity).and_then(|msgs| msgs.last())
    }

    /// Delete one identity's messages. Idempotent; never touches others.
    pub fn clear(&mut self, identity: &str) {
        self.by_identity.remove(identity);
        if let Err(e) = self
            .conn
            .execute("DELETE FROM messages WHERE identity = ?1", params![identity])
            .map_err(|e| Error::Database(format!("failed to clear messages: {e}")))
        {
            warn!("history clear flush failed for '{identity}': {e}");
        }
    }

    /// Delete every message for every identity. Administrative, irreversible.
    pub fn clear_all(&mut self) {
        self.by_identity.clear();
        if let Err(e) = self
            .conn
            .execute("DELETE FROM messages", [])
            .map_err(|e| Error::Database(format!("failed to clear all messages: {e}")))
        {
            warn!("history clear-all flush failed: {e}");
        }
    }
}

fn parse_timestamp(value: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("failed to parse timestamp '{value}': {e}, falling back to now");
            Utc::now()
        })
}
