//! Durable agent state: change cursor, registration identity, event log.
//!
//! One SQLite database, one writer (the change worker). The cursor write is
//! the hot path and must be durable before it returns: a crash after
//! `save_cursor(n)` may replay changes below `n` elsewhere, but reload must
//! never observe a cursor below `n`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use moorline_core::{NodeIdentity, Transience};

const SCHEMA_VERSION: i64 = 1;
const BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS sync_cursor (
        slot INTEGER PRIMARY KEY CHECK (slot = 1),
        change_id INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS registration (
        slot INTEGER PRIMARY KEY CHECK (slot = 1),
        org TEXT NOT NULL,
        node_id TEXT NOT NULL,
        token TEXT NOT NULL,
        exchange_url TEXT NOT NULL,
        content_url TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS event_log (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        at_ms INTEGER NOT NULL,
        severity TEXT NOT NULL,
        message_id TEXT NOT NULL,
        params TEXT NOT NULL
    );
";

/// Message ids for the persistent event log. The CLI owns the message
/// catalogs and their locales; the store records ids plus parameters only.
pub const EVENT_HEARTBEAT_FAILED: &str = "node.heartbeat.failed";
pub const EVENT_HEARTBEAT_RESTORED: &str = "node.heartbeat.restored";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Error => "error",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "info" => Some(Severity::Info),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The identity the node obtained at registration time, plus the service
/// URLs it registered against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub node: NodeIdentity,
    pub token: String,
    pub exchange_url: String,
    pub content_url: String,
}

/// One persisted event-log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub at_ms: u64,
    pub severity: Severity,
    pub message_id: String,
    pub params: Vec<String>,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store open failed at {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("stored {what} is corrupt: {reason}")]
    Corrupt { what: &'static str, reason: String },
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            // Contention (SQLITE_BUSY and friends) clears on its own.
            StoreError::Sqlite(_) => Transience::Retryable,
            _ => Transience::Permanent,
        }
    }
}

/// Single-writer embedded store for the agent's durable state.
pub struct AgentStore {
    conn: Connection,
}

impl AgentStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(|e| StoreError::Open {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        // WAL keeps readers cheap; FULL makes the cursor commit durable
        // before save_cursor returns. journal_mode reports its result row.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == 0 {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        } else if version != SCHEMA_VERSION {
            return Err(StoreError::Open {
                path: path.to_path_buf(),
                reason: format!("schema version mismatch: expected {SCHEMA_VERSION}, got {version}"),
            });
        }
        Ok(Self { conn })
    }

    /// The next change id to consume; `0` when uninitialized.
    pub fn load_cursor(&self) -> Result<u64, StoreError> {
        let stored: Option<i64> = self
            .conn
            .query_row("SELECT change_id FROM sync_cursor WHERE slot = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(stored.map(|id| id as u64).unwrap_or(0))
    }

    /// Persist the cursor. Durable before return.
    pub fn save_cursor(&self, change_id: u64) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO sync_cursor (slot, change_id) VALUES (1, ?1)
             ON CONFLICT(slot) DO UPDATE SET change_id = excluded.change_id",
            params![change_id as i64],
        )?;
        Ok(())
    }

    pub fn load_registration(&self) -> Result<Option<Registration>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT org, node_id, token, exchange_url, content_url
                 FROM registration WHERE slot = 1",
                [],
                |row| {
                    Ok(Registration {
                        node: NodeIdentity::new(
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                        ),
                        token: row.get(2)?,
                        exchange_url: row.get(3)?,
                        content_url: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn save_registration(&self, registration: &Registration) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO registration (slot, org, node_id, token, exchange_url, content_url)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(slot) DO UPDATE SET
                 org = excluded.org,
                 node_id = excluded.node_id,
                 token = excluded.token,
                 exchange_url = excluded.exchange_url,
                 content_url = excluded.content_url",
            params![
                registration.node.org,
                registration.node.id,
                registration.token,
                registration.exchange_url,
                registration.content_url,
            ],
        )?;
        Ok(())
    }

    /// Append one event-log entry.
    pub fn append_event(
        &self,
        at_ms: u64,
        severity: Severity,
        message_id: &str,
        message_params: &[String],
    ) -> Result<(), StoreError> {
        let params_json =
            serde_json::to_string(message_params).map_err(|e| StoreError::Corrupt {
                what: "event params",
                reason: e.to_string(),
            })?;
        self.conn.execute(
            "INSERT INTO event_log (at_ms, severity, message_id, params)
             VALUES (?1, ?2, ?3, ?4)",
            params![at_ms as i64, severity.as_str(), message_id, params_json],
        )?;
        Ok(())
    }

    /// The newest `limit` event-log entries, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT at_ms, severity, message_id, params
             FROM event_log ORDER BY seq DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (at_ms, severity_raw, message_id, params_json) = row?;
            let severity = Severity::parse(&severity_raw).ok_or(StoreError::Corrupt {
                what: "event severity",
                reason: format!("unknown severity `{severity_raw}`"),
            })?;
            let params: Vec<String> =
                serde_json::from_str(&params_json).map_err(|e| StoreError::Corrupt {
                    what: "event params",
                    reason: e.to_string(),
                })?;
            events.push(EventRecord {
                at_ms: at_ms as u64,
                severity,
                message_id,
                params,
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &Path) -> AgentStore {
        AgentStore::open(&dir.join("moorline.db")).expect("open store")
    }

    #[test]
    fn cursor_defaults_to_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        assert_eq!(store.load_cursor().expect("load"), 0);
    }

    #[test]
    fn cursor_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = store_in(dir.path());
            store.save_cursor(42).expect("save");
            assert_eq!(store.load_cursor().expect("load"), 42);
            store.save_cursor(104).expect("save again");
        }
        // Simulated crash: drop the connection and reload from disk.
        let store = store_in(dir.path());
        assert_eq!(store.load_cursor().expect("reload"), 104);
    }

    #[test]
    fn registration_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        assert!(store.load_registration().expect("load").is_none());

        let registration = Registration {
            node: NodeIdentity::new("acme", "n1"),
            token: "tok".to_string(),
            exchange_url: "https://exchange.example.com/v1/".to_string(),
            content_url: "https://css.example.com/".to_string(),
        };
        store.save_registration(&registration).expect("save");
        assert_eq!(
            store.load_registration().expect("load"),
            Some(registration.clone())
        );

        // Re-registration replaces the identity in place.
        let renewed = Registration {
            token: "tok2".to_string(),
            ..registration
        };
        store.save_registration(&renewed).expect("save renewed");
        assert_eq!(store.load_registration().expect("load"), Some(renewed));
    }

    #[test]
    fn event_log_appends_and_reads_newest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store
            .append_event(
                1_000,
                Severity::Error,
                EVENT_HEARTBEAT_FAILED,
                &["acme".to_string(), "n1".to_string(), "refused".to_string()],
            )
            .expect("append");
        store
            .append_event(
                2_000,
                Severity::Info,
                EVENT_HEARTBEAT_RESTORED,
                &["acme".to_string(), "n1".to_string()],
            )
            .expect("append");

        let events = store.recent_events(10).expect("recent");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message_id, EVENT_HEARTBEAT_RESTORED);
        assert_eq!(events[0].severity, Severity::Info);
        assert_eq!(events[1].message_id, EVENT_HEARTBEAT_FAILED);
        assert_eq!(events[1].params.len(), 3);

        let just_one = store.recent_events(1).expect("recent");
        assert_eq!(just_one.len(), 1);
        assert_eq!(just_one[0].at_ms, 2_000);
    }
}
