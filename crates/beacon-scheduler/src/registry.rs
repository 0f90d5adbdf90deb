use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::LivenessMarker,
};

/// How long a SQLite writer waits on another process's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared record of which queries currently own an active job.
///
/// Every operation is individually atomic; nothing here spans more than one
/// key. Implementations may be process-local or shared by a whole cluster.
pub trait RunningJobRegistry: Send + Sync {
    fn get(&self, query_id: &str) -> Result<Option<LivenessMarker>>;

    fn contains(&self, query_id: &str) -> Result<bool> {
        Ok(self.get(query_id)?.is_some())
    }

    /// Insert `marker` unless an entry already exists. Returns whether it was inserted.
    fn put_if_absent(&self, query_id: &str, marker: &LivenessMarker) -> Result<bool>;

    /// Delete the entry whatever it holds. Returns whether one existed.
    fn remove(&self, query_id: &str) -> Result<bool>;

    /// Delete the entry only if it still carries `token`.
    fn remove_if_owned(&self, query_id: &str, token: Uuid) -> Result<bool>;
}

/// Process-local registry for single-process deployments and tests.
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: DashMap<String, LivenessMarker>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RunningJobRegistry for InMemoryRegistry {
    fn get(&self, query_id: &str) -> Result<Option<LivenessMarker>> {
        Ok(self.entries.get(query_id).map(|m| m.value().clone()))
    }

    fn put_if_absent(&self, query_id: &str, marker: &LivenessMarker) -> Result<bool> {
        match self.entries.entry(query_id.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(marker.clone());
                debug!(%query_id, token = %marker.token, "registry entry created");
                Ok(true)
            }
        }
    }

    fn remove(&self, query_id: &str) -> Result<bool> {
        Ok(self.entries.remove(query_id).is_some())
    }

    fn remove_if_owned(&self, query_id: &str, token: Uuid) -> Result<bool> {
        Ok(self
            .entries
            .remove_if(query_id, |_, marker| marker.token == token)
            .is_some())
    }
}

/// Registry kept in a SQLite table, shared by every process opening the same file.
pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open (or create) the registry file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!(path = %path.display(), "opened running-job registry");
        Self::new(conn)
    }
}

impl RunningJobRegistry for SqliteRegistry {
    fn get(&self, query_id: &str) -> Result<Option<LivenessMarker>> {
        let conn = self.conn.lock().expect("registry connection poisoned");
        let row = conn
            .query_row(
                "SELECT token, activated_at FROM running_jobs WHERE query_id = ?1",
                [query_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((token, activated_at)) = row else {
            return Ok(None);
        };
        let corrupt = |reason: String| SchedulerError::CorruptEntry {
            query_id: query_id.to_string(),
            reason,
        };
        let token = Uuid::parse_str(&token).map_err(|e| corrupt(e.to_string()))?;
        let activated_at = DateTime::parse_from_rfc3339(&activated_at)
            .map_err(|e| corrupt(e.to_string()))?
            .with_timezone(&Utc);

        Ok(Some(LivenessMarker {
            token,
            activated_at,
        }))
    }

    fn put_if_absent(&self, query_id: &str, marker: &LivenessMarker) -> Result<bool> {
        let conn = self.conn.lock().expect("registry connection poisoned");
        let n = conn.execute(
            "INSERT OR IGNORE INTO running_jobs (query_id, token, activated_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![
                query_id,
                marker.token.to_string(),
                marker.activated_at.to_rfc3339()
            ],
        )?;
        if n == 1 {
            debug!(%query_id, token = %marker.token, "registry entry created");
        }
        Ok(n == 1)
    }

    fn remove(&self, query_id: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("registry connection poisoned");
        let n = conn.execute("DELETE FROM running_jobs WHERE query_id = ?1", [query_id])?;
        Ok(n > 0)
    }

    fn remove_if_owned(&self, query_id: &str, token: Uuid) -> Result<bool> {
        let conn = self.conn.lock().expect("registry connection poisoned");
        let n = conn.execute(
            "DELETE FROM running_jobs WHERE query_id = ?1 AND token = ?2",
            rusqlite::params![query_id, token.to_string()],
        )?;
        Ok(n > 0)
    }
}
