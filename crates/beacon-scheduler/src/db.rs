use rusqlite::Connection;

use crate::error::Result;

/// Initialise the running-job registry schema in `conn`.
///
/// One row per query id; the primary key is what makes activation a single
/// atomic put-if-absent across every process sharing the file.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS running_jobs (
            query_id     TEXT NOT NULL PRIMARY KEY,
            token        TEXT NOT NULL,   -- UUID of the owning activation
            activated_at TEXT NOT NULL    -- RFC 3339
        ) STRICT;
        ",
    )?;
    Ok(())
}
