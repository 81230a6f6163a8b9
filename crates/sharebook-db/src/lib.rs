pub mod migrations;
pub mod models;
pub mod queries;
pub mod query;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::info;

use sharebook_types::events::ChangeEvent;

pub use models::{CredentialRow, Document};
pub use queries::server_timestamp;
pub use query::{Direction, Filter, Query};

/// Buffered change events per subscriber before it starts lagging.
const CHANGE_CAPACITY: usize = 1024;

/// Embedded document store: JSON documents grouped in collections, with a
/// broadcast feed of every committed write.
pub struct Database {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<ChangeEvent>,
    /// Last server timestamp handed out, truncated to microseconds.
    clock: Mutex<DateTime<Utc>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::from_connection(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;

        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
            clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }

    /// Subscribe to the change feed. Events are only sent after the write
    /// has been committed.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            // No receivers is fine: nobody is watching.
            let _ = self.changes.send(event);
        }
    }

    /// Next server timestamp, strictly greater than every previous one.
    fn next_timestamp(&self) -> Result<String> {
        let mut last = self
            .clock
            .lock()
            .map_err(|e| anyhow::anyhow!("Clock lock poisoned: {}", e))?;

        let now = Utc::now().trunc_subsecs(6);
        let next = if now > *last {
            now
        } else {
            *last + chrono::Duration::microseconds(1)
        };
        *last = next;

        Ok(next.to_rfc3339_opts(SecondsFormat::Micros, true))
    }
}
