use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use switchd_core::SwitchId;
use tracing::{debug, instrument};

use crate::{db::init_db, error::Result, state::SwitchRecord};

/// SQLite persistence for switch records.
///
/// Owned by the dispatcher task; every mutation is written through before
/// the caller gets its reply.
pub struct SwitchStore {
    conn: Connection,
}

impl SwitchStore {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { conn })
    }

    /// A throwaway in-memory store.
    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    #[instrument(skip(self), fields(switch = %id))]
    pub fn load(&self, id: &SwitchId) -> Result<Option<SwitchRecord>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM switches WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => {
                debug!("no stored record");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, record), fields(switch = %id))]
    pub fn save(&self, id: &SwitchId, record: &SwitchRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO switches (id, record, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET record = excluded.record,
                                           updated_at = excluded.updated_at",
            rusqlite::params![id.as_str(), json, now],
        )?;
        debug!("record saved");
        Ok(())
    }

    /// Ids of every stored switch, sorted.
    pub fn ids(&self) -> Result<Vec<SwitchId>> {
        let mut stmt = self.conn.prepare("SELECT id FROM switches ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.into_iter().map(SwitchId::from).collect())
    }
}
