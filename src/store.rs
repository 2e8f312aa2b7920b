// CLASSIFICATION: COMMUNITY
// Filename: store.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Durable session state and event log.
//!
//! Two tables back the store: `sessions` holds one row per identity with its
//! current status, and `events` is an append-only log of logins and logouts.
//! [`SessionStore::apply_transition`] writes both inside one `IMMEDIATE`
//! transaction, so a reader sees either both changes or neither.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;

/// Presence of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    LoggedOut,
    LoggedIn,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::LoggedOut => "LOGGED_OUT",
            SessionStatus::LoggedIn => "LOGGED_IN",
        }
    }

    /// The status a toggle moves to.
    pub fn toggled(self) -> Self {
        match self {
            SessionStatus::LoggedOut => SessionStatus::LoggedIn,
            SessionStatus::LoggedIn => SessionStatus::LoggedOut,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOGGED_OUT" => Ok(SessionStatus::LoggedOut),
            "LOGGED_IN" => Ok(SessionStatus::LoggedIn),
            other => Err(StoreError::Corrupt(format!("unknown status {other:?}"))),
        }
    }
}

/// Kind of a recorded transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Login,
    Logout,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Login => "LOGIN",
            EventType::Logout => "LOGOUT",
        }
    }

    /// Event produced by entering `status`.
    pub fn entering(status: SessionStatus) -> Self {
        match status {
            SessionStatus::LoggedIn => EventType::Login,
            SessionStatus::LoggedOut => EventType::Logout,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOGIN" => Ok(EventType::Login),
            "LOGOUT" => Ok(EventType::Logout),
            other => Err(StoreError::Corrupt(format!("unknown event type {other:?}"))),
        }
    }
}

/// Current presence of one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub identity: String,
    pub current_status: SessionStatus,
    pub last_transition_ts: Option<DateTime<Utc>>,
    pub last_seen_ts: Option<DateTime<Utc>>,
}

impl SessionState {
    /// State of an identity that has never been seen.
    pub fn logged_out(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            current_status: SessionStatus::LoggedOut,
            last_transition_ts: None,
            last_seen_ts: None,
        }
    }
}

/// One entry of the append-only event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub id: i64,
    pub identity: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Saved frame that triggered the transition, if any.
    pub snapshot: Option<PathBuf>,
}

/// Errors from the session store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("corrupt session data: {0}")]
    Corrupt(String),
    #[error("{identity} is already {status}")]
    NoOpTransition {
        identity: String,
        status: SessionStatus,
    },
    #[error("transition for {identity} at {attempted} is not after {last}")]
    NonMonotonic {
        identity: String,
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },
}

type StoreResult<T> = Result<T, StoreError>;

/// Contract between the toggle engine and persistence.
pub trait SessionStore {
    /// Current state, or a logged-out default when the identity has no row.
    fn get_status(&self, identity: &str) -> StoreResult<SessionState>;

    /// Move `identity` to `new_status` and append the matching event as one
    /// atomic unit.
    fn apply_transition(
        &mut self,
        identity: &str,
        new_status: SessionStatus,
        timestamp: DateTime<Utc>,
        snapshot: Option<&Path>,
    ) -> StoreResult<EventRecord>;

    fn get_last_transition_timestamp(&self, identity: &str) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.get_status(identity)?.last_transition_ts)
    }

    /// Record that `identity` was seen without changing its status.
    fn touch_last_seen(&mut self, identity: &str, timestamp: DateTime<Utc>) -> StoreResult<()>;
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {ms} out of range")))
}

fn opt_from_millis(ms: Option<i64>) -> StoreResult<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

/// SQLite-backed [`SessionStore`]. Owns its connection exclusively.
pub struct SqliteSessionStore {
    conn: Connection,
}

impl SqliteSessionStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(2))?;
        let store = Self { conn };
        store.init_schema()?;
        info!("session store opened at {}", path.display());
        Ok(store)
    }

    /// Store that lives only as long as the value.
    pub fn open_in_memory() -> StoreResult<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS sessions (
                identity           TEXT PRIMARY KEY NOT NULL,
                status             TEXT NOT NULL,
                last_transition_ts INTEGER,
                last_seen_ts       INTEGER
            );
            CREATE TABLE IF NOT EXISTS events (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                identity   TEXT NOT NULL,
                event_type TEXT NOT NULL,
                ts         INTEGER NOT NULL,
                snapshot   TEXT
            );
            CREATE INDEX IF NOT EXISTS events_identity_ts ON events(identity, ts);
            COMMIT;",
        )?;
        Ok(())
    }

    /// Every event for `identity`, oldest first.
    pub fn events_for(&self, identity: &str) -> StoreResult<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, identity, event_type, ts, snapshot FROM events
             WHERE identity = ?1 ORDER BY ts, id",
        )?;
        let rows = stmt.query_map(params![identity], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, i64>(3)?,
                r.get::<_, Option<String>>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, identity, kind, ts, snapshot) = row?;
            out.push(EventRecord {
                id,
                identity,
                event_type: kind.parse()?,
                timestamp: from_millis(ts)?,
                snapshot: snapshot.map(PathBuf::from),
            });
        }
        Ok(out)
    }

    /// All session rows ordered by identity.
    pub fn sessions(&self) -> StoreResult<Vec<SessionState>> {
        let mut stmt = self.conn.prepare(
            "SELECT identity, status, last_transition_ts, last_seen_ts FROM sessions
             ORDER BY identity",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<i64>>(2)?,
                r.get::<_, Option<i64>>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (identity, status, last_transition, last_seen) = row?;
            out.push(SessionState {
                identity,
                current_status: status.parse()?,
                last_transition_ts: opt_from_millis(last_transition)?,
                last_seen_ts: opt_from_millis(last_seen)?,
            });
        }
        Ok(out)
    }
}

impl SessionStore for SqliteSessionStore {
    fn get_status(&self, identity: &str) -> StoreResult<SessionState> {
        let row: Option<(String, Option<i64>, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT status, last_transition_ts, last_seen_ts FROM sessions WHERE identity = ?1",
                params![identity],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        match row {
            None => Ok(SessionState::logged_out(identity)),
            Some((status, last_transition, last_seen)) => Ok(SessionState {
                identity: identity.to_string(),
                current_status: status.parse()?,
                last_transition_ts: opt_from_millis(last_transition)?,
                last_seen_ts: opt_from_millis(last_seen)?,
            }),
        }
    }

    fn apply_transition(
        &mut self,
        identity: &str,
        new_status: SessionStatus,
        timestamp: DateTime<Utc>,
        snapshot: Option<&Path>,
    ) -> StoreResult<EventRecord> {
        let ts = to_millis(timestamp);
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Re-read under the write lock; an early return drops `tx` and rolls back.
        let current: Option<(String, Option<i64>)> = tx
            .query_row(
                "SELECT status, last_transition_ts FROM sessions WHERE identity = ?1",
                params![identity],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let (status, last) = match current {
            Some((s, last)) => (s.parse::<SessionStatus>()?, last),
            None => (SessionStatus::LoggedOut, None),
        };
        if status == new_status {
            return Err(StoreError::NoOpTransition {
                identity: identity.to_string(),
                status,
            });
        }
        if let Some(last) = last {
            if ts <= last {
                return Err(StoreError::NonMonotonic {
                    identity: identity.to_string(),
                    last: from_millis(last)?,
                    attempted: timestamp,
                });
            }
        }

        let snapshot_text = snapshot.map(|p| p.to_string_lossy().into_owned());
        let event_type = EventType::entering(new_status);
        tx.execute(
            "INSERT INTO sessions (identity, status, last_transition_ts, last_seen_ts)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(identity) DO UPDATE SET
                status = excluded.status,
                last_transition_ts = excluded.last_transition_ts,
                last_seen_ts = MAX(COALESCE(sessions.last_seen_ts, 0), excluded.last_seen_ts)",
            params![identity, new_status.as_str(), ts],
        )?;
        tx.execute(
            "INSERT INTO events (identity, event_type, ts, snapshot) VALUES (?1, ?2, ?3, ?4)",
            params![identity, event_type.as_str(), ts, snapshot_text],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!("{identity}: {status} -> {new_status} (event {id})");
        Ok(EventRecord {
            id,
            identity: identity.to_string(),
            event_type,
            timestamp: from_millis(ts)?,
            snapshot: snapshot.map(Path::to_path_buf),
        })
    }

    fn touch_last_seen(&mut self, identity: &str, timestamp: DateTime<Utc>) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO sessions (identity, status, last_transition_ts, last_seen_ts)
             VALUES (?1, ?2, NULL, ?3)
             ON CONFLICT(identity) DO UPDATE SET
                last_seen_ts = MAX(COALESCE(sessions.last_seen_ts, 0), excluded.last_seen_ts)",
            params![identity, SessionStatus::LoggedOut.as_str(), to_millis(timestamp)],
        )?;
        Ok(())
    }
}
