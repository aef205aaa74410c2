//! The shared "cloud" slot: one named cell that any session may overwrite.
//!
//! Writers never merge. `overwrite` is what push uses (last writer wins);
//! `compare_and_swap` exists so a versioned backend can slot in without
//! changing callers.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
#[cfg(test)]
use std::cell::RefCell;
use std::path::{Path, PathBuf};

pub const CLOUD_SLOT_NAME: &str = "meritd-cloud";
pub const CLOUD_FILE: &str = "cloud-slot.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: String,
    pub version: u64,
    pub written_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Written { version: u64 },
    Conflict { current: Option<u64> },
}

pub trait SlotStore {
    fn read(&self) -> anyhow::Result<Option<Versioned>>;

    /// Unconditional replace. Returns the new version.
    fn overwrite(&self, value: &str) -> anyhow::Result<u64>;

    /// Replace only if the stored version is still `expected` (`None` = empty slot).
    fn compare_and_swap(&self, expected: Option<u64>, value: &str) -> anyhow::Result<CasOutcome>;

    fn describe(&self) -> String;
}

/// SQLite file shared between workspaces.
pub struct SqliteSlot {
    path: PathBuf,
    conn: Connection,
}

impl SqliteSlot {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open cloud slot {}", path.to_string_lossy()))?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cloud_slot(
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                version INTEGER NOT NULL,
                written_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    fn current_version(conn: &Connection) -> anyhow::Result<Option<u64>> {
        let v: Option<i64> = conn
            .query_row(
                "SELECT version FROM cloud_slot WHERE name = ?",
                [CLOUD_SLOT_NAME],
                |r| r.get(0),
            )
            .optional()?;
        Ok(v.map(|v| v.max(0) as u64))
    }

    fn write(conn: &Connection, version: u64, value: &str) -> anyhow::Result<()> {
        conn.execute(
            "INSERT INTO cloud_slot(name, value, version, written_at) VALUES(?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
               value = excluded.value,
               version = excluded.version,
               written_at = excluded.written_at",
            (
                CLOUD_SLOT_NAME,
                value,
                version as i64,
                Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }
}

impl SlotStore for SqliteSlot {
    fn read(&self) -> anyhow::Result<Option<Versioned>> {
        let row: Option<(String, i64, String)> = self
            .conn
            .query_row(
                "SELECT value, version, written_at FROM cloud_slot WHERE name = ?",
                [CLOUD_SLOT_NAME],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((value, version, written_at)) = row else {
            return Ok(None);
        };
        let written_at = DateTime::parse_from_rfc3339(&written_at)
            .map(|d| d.with_timezone(&Utc))
            .context("cloud slot has an invalid timestamp")?;
        Ok(Some(Versioned {
            value,
            version: version.max(0) as u64,
            written_at,
        }))
    }

    fn overwrite(&self, value: &str) -> anyhow::Result<u64> {
        let tx = self.conn.unchecked_transaction()?;
        let next = Self::current_version(&tx)?.unwrap_or(0) + 1;
        Self::write(&tx, next, value)?;
        tx.commit()?;
        Ok(next)
    }

    fn compare_and_swap(&self, expected: Option<u64>, value: &str) -> anyhow::Result<CasOutcome> {
        let tx = self.conn.unchecked_transaction()?;
        let current = Self::current_version(&tx)?;
        if current != expected {
            return Ok(CasOutcome::Conflict { current });
        }
        let next = current.unwrap_or(0) + 1;
        Self::write(&tx, next, value)?;
        tx.commit()?;
        Ok(CasOutcome::Written { version: next })
    }

    fn describe(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

/// In-process slot for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySlot {
    cell: RefCell<Option<Versioned>>,
}

#[cfg(test)]
impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl SlotStore for MemorySlot {
    fn read(&self) -> anyhow::Result<Option<Versioned>> {
        Ok(self.cell.borrow().clone())
    }

    fn overwrite(&self, value: &str) -> anyhow::Result<u64> {
        let mut cell = self.cell.borrow_mut();
        let version = cell.as_ref().map(|v| v.version).unwrap_or(0) + 1;
        *cell = Some(Versioned {
            value: value.to_string(),
            version,
            written_at: Utc::now(),
        });
        Ok(version)
    }

    fn compare_and_swap(&self, expected: Option<u64>, value: &str) -> anyhow::Result<CasOutcome> {
        let current = self.cell.borrow().as_ref().map(|v| v.version);
        if current != expected {
            return Ok(CasOutcome::Conflict { current });
        }
        let version = self.overwrite(value)?;
        Ok(CasOutcome::Written { version })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
