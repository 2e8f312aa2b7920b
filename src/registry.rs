// CLASSIFICATION: COMMUNITY
// Filename: registry.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! Access-code registry.
//!
//! Maps the payload printed in a user's QR code to the user it was issued
//! to. Lookups are exact and case-sensitive. The registry is read-only to
//! the scan pipeline; users are provisioned with [`provision_user`].

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

/// A provisioned user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Stable identity, unique across the registry.
    pub identity: String,
    /// Name shown in feedback.
    pub display_name: String,
    /// Payload encoded in the user's QR code. Immutable once issued.
    pub access_code: String,
    pub email: Option<String>,
}

/// Errors returned by registry loading and provisioning.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry database error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("access code already issued to {existing}")]
    DuplicateCode { existing: String },
    #[error("{identity} is already provisioned with code {code}")]
    IdentityExists { identity: String, code: String },
    #[error("access code must not be empty")]
    EmptyCode,
}

/// Read interface used by the toggle engine.
pub trait CodeRegistry {
    /// Resolve an access code. `None` is a normal outcome, not an error.
    fn lookup(&self, code: &str) -> Option<UserRecord>;
}

/// In-memory registry keyed by access code.
#[derive(Debug, Default, Clone)]
pub struct UserDirectory {
    by_code: HashMap<String, UserRecord>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user, rejecting a code already held by another identity.
    pub fn insert(&mut self, user: UserRecord) -> Result<(), RegistryError> {
        if user.access_code.is_empty() {
            return Err(RegistryError::EmptyCode);
        }
        if let Some(existing) = self.by_code.get(&user.access_code) {
            if existing.identity != user.identity {
                return Err(RegistryError::DuplicateCode {
                    existing: existing.identity.clone(),
                });
            }
        }
        self.by_code.insert(user.access_code.clone(), user);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// Load every provisioned user from the `users` table at `path`.
    ///
    /// The connection is dropped before returning; the directory is a
    /// snapshot taken at startup.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let conn = open_users(path)?;
        let mut dir = Self::new();
        for user in read_users(&conn)? {
            dir.insert(user)?;
        }
        info!("loaded {} users from {}", dir.len(), path.display());
        Ok(dir)
    }
}

impl CodeRegistry for UserDirectory {
    fn lookup(&self, code: &str) -> Option<UserRecord> {
        let hit = self.by_code.get(code).cloned();
        if hit.is_none() {
            debug!("access code not registered");
        }
        hit
    }
}

impl FromIterator<UserRecord> for UserDirectory {
    /// Later records win on a code collision; use [`UserDirectory::insert`]
    /// when collisions must be reported.
    fn from_iter<I: IntoIterator<Item = UserRecord>>(iter: I) -> Self {
        let by_code = iter
            .into_iter()
            .map(|u| (u.access_code.clone(), u))
            .collect();
        Self { by_code }
    }
}

fn open_users(path: &Path) -> Result<Connection, RegistryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            identity     TEXT PRIMARY KEY NOT NULL,
            display_name TEXT NOT NULL,
            email        TEXT,
            access_code  TEXT NOT NULL UNIQUE
        );",
    )?;
    Ok(conn)
}

fn read_users(conn: &Connection) -> Result<Vec<UserRecord>, RegistryError> {
    let mut stmt = conn.prepare(
        "SELECT identity, display_name, access_code, email FROM users ORDER BY identity",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok(UserRecord {
            identity: r.get(0)?,
            display_name: r.get(1)?,
            access_code: r.get(2)?,
            email: r.get(3)?,
        })
    })?;
    let users = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

/// Add a user to the `users` table at `path`.
///
/// Returns `false` when the identity already exists with the same code.
/// Issuing a code that belongs to another identity, or a second code to an
/// existing identity, fails.
pub fn provision_user(path: &Path, user: &UserRecord) -> Result<bool, RegistryError> {
    if user.access_code.is_empty() {
        return Err(RegistryError::EmptyCode);
    }
    let conn = open_users(path)?;
    let holder: Option<String> = conn
        .query_row(
            "SELECT identity FROM users WHERE access_code = ?1",
            params![user.access_code],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing) = holder {
        if existing != user.identity {
            return Err(RegistryError::DuplicateCode { existing });
        }
    }
    let issued: Option<String> = conn
        .query_row(
            "SELECT access_code FROM users WHERE identity = ?1",
            params![user.identity],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(code) = issued {
        if code != user.access_code {
            return Err(RegistryError::IdentityExists {
                identity: user.identity.clone(),
                code,
            });
        }
    }
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (identity, display_name, email, access_code)
         VALUES (?1, ?2, ?3, ?4)",
        params![user.identity, user.display_name, user.email, user.access_code],
    )?;
    if inserted > 0 {
        info!("provisioned user {}", user.identity);
    }
    Ok(inserted > 0)
}

/// List provisioned users ordered by identity.
pub fn list_users(path: &Path) -> Result<Vec<UserRecord>, RegistryError> {
    let conn = open_users(path)?;
    read_users(&conn)
}
