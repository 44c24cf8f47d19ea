use std::path::Path;
use std::sync::{Mutex, RwLock};

use charla_common::{Error, Result, Settings, SettingsPatch};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};

/// Persistence for the single global [`Settings`] record, stored as one
/// JSON row so fields added later deserialize with their defaults.
pub struct SettingsStore {
    conn: Connection,
}

impl SettingsStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening settings store at {}", db_path.display());
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
                "CREATE TABLE IF NOT EXISTS settings (
                    id TEXT PRIMARY KEY CHECK (id = 'default'),
                    data TEXT NOT NULL
                );",
            )
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Load the record; a missing row yields the built-in defaults.
    pub fn load(&self) -> Result<Settings> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT data FROM settings WHERE id = 'default'", [], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| Error::Database(format!("failed to load settings: {e}")))?;

        match raw {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| Error::Database(format!("corrupt settings record: {e}"))),
            None => Ok(Settings::default()),
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<()> {
        let data = serde_json::to_string(settings)
            .map_err(|e| Error::Database(format!("failed to encode settings: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO settings (id, data) VALUES ('default', ?1)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data",
                params![data],
            )
            .map_err(|e| Error::Database(format!("failed to save settings: {e}")))?;
        Ok(())
    }
}

/// Process-wide settings access: read-through snapshot loaded at startup,
/// merge-on-update, persisted after every mutation.
pub struct SettingsHandle {
    store: Mutex<SettingsStore>,
    current: RwLock<Settings>,
}

impl SettingsHandle {
    pub fn load(store: SettingsStore) -> Result<Self> {
        let current = store.load()?;
        Ok(Self {
            store: Mutex::new(store),
            current: RwLock::new(current),
        })
    }

    /// Snapshot of the active settings.
    pub fn current(&self) -> Settings {
        self.current.read().expect("settings lock poisoned").clone()
    }

    /// Merge the fields present in `patch`, persist, and return the new
    /// record. A failed flush keeps the in-memory record authoritative.
    /// The store lock is held across the flush so updates persist in the
    /// order they were applied.
    pub fn update(&self, patch: SettingsPatch) -> Settings {
        let store = self.store.lock().expect("settings store lock poisoned");
        let mut guard = self.current.write().expect("settings lock poisoned");
        guard.merge(patch);
        let updated = guard.clone();
        drop(guard);

        if let Err(e) = store.save(&updated) {
            warn!("settings flush failed: {e}");
        }
        updated
    }
}
