use rusqlite::Connection;

use crate::error::Result;

/// Initialise the switch store schema in `conn`.
///
/// One row per switch; `record` holds the JSON-encoded [`SwitchRecord`](crate::state::SwitchRecord).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS switches (
            id          TEXT    NOT NULL PRIMARY KEY,
            record      TEXT    NOT NULL,   -- JSON-encoded SwitchRecord
            updated_at  TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
