use crate::model::{
    default_batch_colors, DisciplinaryCase, HouseBaselines, SchoolState, Student, TeacherProfile,
};
use crate::seed;
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

pub const DB_FILE: &str = "meritd.sqlite3";

pub const SLOT_STUDENTS: &str = "students";
pub const SLOT_TEACHERS: &str = "teachers";
pub const SLOT_CASES: &str = "cases";
pub const SLOT_BATCH_COLORS: &str = "batchColors";
pub const SLOT_SCHOOL_PASSWORD: &str = "schoolPassword";
pub const SLOT_LANGUAGE: &str = "language";
pub const SLOT_LAST_SYNC: &str = "lastSync";
pub const SLOT_HOUSE_BASELINES: &str = "houseBaselines";
pub const SLOT_REMEMBER_ME: &str = "rememberMe";
pub const SLOT_CURRENT_USER: &str = "currentUser";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;",
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS slots(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;
    ensure_slots_updated_at(&conn)?;

    Ok(conn)
}

fn ensure_slots_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "slots", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE slots ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn slot_get(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM slots WHERE key = ?", [key], |r| r.get(0))
        .optional()?)
}

pub fn slot_set(conn: &Connection, key: &str, value: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO slots(key, value, updated_at)
         VALUES(?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        (key, value),
    )?;
    Ok(())
}

pub fn slot_delete(conn: &Connection, key: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM slots WHERE key = ?", [key])?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let Some(raw) = slot_get(conn, key)? else {
        return Ok(None);
    };
    Ok(serde_json::from_str(&raw).ok())
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    slot_set(conn, key, &serde_json::to_string(value)?)
}

fn slot_set_json<T: Serialize + ?Sized>(conn: &Connection, key: &str, value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string(value).with_context(|| format!("failed to serialize {}", key))?;
    slot_set(conn, key, &text)
}

/// A collection slot that exists but no longer parses. Loading stops so nothing overwrites it.
#[derive(Debug, thiserror::Error)]
#[error("stored {key} data is corrupt: {reason}")]
pub struct CorruptSlot {
    pub key: String,
    pub reason: String,
}

enum SlotRead<T> {
    Missing,
    Corrupt { raw: String, reason: String },
    Found(T),
}

fn slot_read<T: DeserializeOwned>(conn: &Connection, key: &str) -> anyhow::Result<SlotRead<T>> {
    let Some(raw) = slot_get(conn, key)? else {
        return Ok(SlotRead::Missing);
    };
    Ok(match serde_json::from_str(&raw) {
        Ok(v) => SlotRead::Found(v),
        Err(e) => SlotRead::Corrupt {
            raw,
            reason: e.to_string(),
        },
    })
}

pub fn corrupt_copy_key(key: &str) -> String {
    format!("{}.corrupt", key)
}

/// Settings slots: a missing one is `None`; an unreadable one is copied to
/// `<key>.corrupt`, logged, and also `None`.
fn slot_load<T: DeserializeOwned>(conn: &Connection, key: &str) -> anyhow::Result<Option<T>> {
    match slot_read(conn, key)? {
        SlotRead::Found(v) => Ok(Some(v)),
        SlotRead::Missing => Ok(None),
        SlotRead::Corrupt { raw, reason } => {
            slot_set(conn, &corrupt_copy_key(key), &raw)?;
            tracing::warn!(slot = key, error = %reason, "stored slot is corrupt, using defaults");
            Ok(None)
        }
    }
}

/// Collection slots: missing is `None`, unreadable is a [`CorruptSlot`] error.
fn slot_require<T: DeserializeOwned>(conn: &Connection, key: &str) -> anyhow::Result<Option<T>> {
    match slot_read(conn, key)? {
        SlotRead::Found(v) => Ok(Some(v)),
        SlotRead::Missing => Ok(None),
        SlotRead::Corrupt { reason, .. } => {
            tracing::error!(slot = key, error = %reason, "stored collection is corrupt");
            Err(CorruptSlot {
                key: key.to_string(),
                reason,
            }
            .into())
        }
    }
}

/// Writes every collection slot. One transaction so a crash never leaves half a save.
pub fn save_state(conn: &mut Connection, state: &SchoolState) -> anyhow::Result<()> {
    let tx = conn.transaction()?;
    slot_set_json(&tx, SLOT_STUDENTS, &state.students)?;
    slot_set_json(&tx, SLOT_TEACHERS, &state.teachers)?;
    slot_set_json(&tx, SLOT_CASES, &state.cases)?;
    slot_set_json(&tx, SLOT_BATCH_COLORS, &state.config.batch_colors)?;
    slot_set_json(&tx, SLOT_SCHOOL_PASSWORD, &state.config.school_password)?;
    slot_set_json(&tx, SLOT_LANGUAGE, &state.config.language)?;
    slot_set_json(&tx, SLOT_LAST_SYNC, &state.config.last_sync)?;
    slot_set_json(&tx, SLOT_HOUSE_BASELINES, &state.config.house_baselines)?;
    tx.commit().context("failed to commit state")?;
    Ok(())
}

#[derive(Debug)]
pub struct Loaded {
    pub state: SchoolState,
    /// True when students or teachers had to be generated.
    pub seeded: bool,
}

/// Each slot is read on its own; absent students/teachers are seeded.
pub fn load_state(conn: &Connection) -> anyhow::Result<Loaded> {
    let mut rng = rand::thread_rng();
    let defaults = seed::default_config();
    let mut seeded = false;

    let students: Vec<Student> = match slot_require(conn, SLOT_STUDENTS)? {
        Some(v) => v,
        None => {
            seeded = true;
            seed::generate_students(seed::SEED_STUDENT_COUNT, &mut rng)
        }
    };
    let teachers: Vec<TeacherProfile> = match slot_require(conn, SLOT_TEACHERS)? {
        Some(v) => v,
        None => {
            seeded = true;
            seed::seed_teachers()
        }
    };
    let drifted = students.iter().filter(|s| !s.points_consistent()).count();
    if drifted > 0 {
        tracing::warn!(drifted, "stored point totals disagree with record history");
    }
    let cases: Vec<DisciplinaryCase> = slot_require(conn, SLOT_CASES)?.unwrap_or_default();
    let batch_colors = slot_load(conn, SLOT_BATCH_COLORS)?.unwrap_or_else(default_batch_colors);
    let school_password =
        slot_load(conn, SLOT_SCHOOL_PASSWORD)?.unwrap_or(defaults.school_password);
    let language = slot_load(conn, SLOT_LANGUAGE)?.unwrap_or(defaults.language);
    let last_sync = slot_load::<Option<DateTime<Utc>>>(conn, SLOT_LAST_SYNC)?.flatten();
    let house_baselines: HouseBaselines =
        slot_load(conn, SLOT_HOUSE_BASELINES)?.unwrap_or_default();

    Ok(Loaded {
        state: SchoolState {
            students,
            teachers,
            cases,
            config: crate::model::SchoolConfig {
                batch_colors,
                school_password,
                language,
                last_sync,
                house_baselines,
            },
        },
        seeded,
    })
}

/// Remembered session: the teacher id, if the last login asked to be remembered.
pub fn remembered_teacher_id(conn: &Connection) -> anyhow::Result<Option<String>> {
    let remember: bool = slot_load(conn, SLOT_REMEMBER_ME)?.unwrap_or(false);
    if !remember {
        return Ok(None);
    }
    let user: Option<serde_json::Value> = slot_load(conn, SLOT_CURRENT_USER)?;
    Ok(user
        .as_ref()
        .and_then(|u| u.get("id"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string()))
}

pub fn remember_session(conn: &Connection, user: Option<&serde_json::Value>) -> anyhow::Result<()> {
    match user {
        Some(u) => {
            slot_set_json(conn, SLOT_REMEMBER_ME, &true)?;
            slot_set_json(conn, SLOT_CURRENT_USER, u)?;
        }
        None => {
            slot_set_json(conn, SLOT_REMEMBER_ME, &false)?;
            slot_delete(conn, SLOT_CURRENT_USER)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_workspace(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("meritd-db-{}-{}", tag, uuid::Uuid::new_v4()))
    }

    #[test]
    fn fresh_workspace_is_seeded_and_round_trips() {
        let ws = temp_workspace("seed");
        let mut conn = open_db(&ws).expect("open");
        let loaded = load_state(&conn).expect("load");
        assert!(loaded.seeded);
        assert_eq!(loaded.state.students.len(), seed::SEED_STUDENT_COUNT);

        save_state(&mut conn, &loaded.state).expect("save");
        let again = load_state(&conn).expect("reload");
        assert!(!again.seeded);
        assert_eq!(again.state, loaded.state);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn corrupt_setting_falls_back_and_keeps_a_copy() {
        let ws = temp_workspace("corrupt");
        let mut conn = open_db(&ws).expect("open");
        let loaded = load_state(&conn).expect("load");
        save_state(&mut conn, &loaded.state).expect("save");
        slot_set(&conn, SLOT_LANGUAGE, "42").expect("corrupt");

        let again = load_state(&conn).expect("reload");
        assert!(!again.seeded);
        assert_eq!(again.state.config.language, "en");
        assert_eq!(again.state.students, loaded.state.students);
        assert_eq!(
            slot_get(&conn, &corrupt_copy_key(SLOT_LANGUAGE)).expect("read"),
            Some("42".to_string())
        );
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn corrupt_roster_is_reported_and_never_reseeded() {
        let ws = temp_workspace("corrupt-roster");
        let mut conn = open_db(&ws).expect("open");
        let loaded = load_state(&conn).expect("load");
        save_state(&mut conn, &loaded.state).expect("save");
        let stored = slot_get(&conn, SLOT_STUDENTS).expect("read").expect("students slot");
        let truncated: String = stored.chars().take(stored.chars().count() / 2).collect();

        for key in [SLOT_STUDENTS, SLOT_TEACHERS, SLOT_CASES] {
            let original = slot_get(&conn, key).expect("read").expect("slot");
            slot_set(&conn, key, &truncated).expect("corrupt");
            let e = load_state(&conn).unwrap_err();
            let corrupt = e.downcast_ref::<CorruptSlot>().expect("corrupt slot error");
            assert_eq!(corrupt.key, key);
            assert_eq!(slot_get(&conn, key).expect("read").as_deref(), Some(truncated.as_str()));
            slot_set(&conn, key, &original).expect("restore");
        }
        assert_eq!(load_state(&conn).expect("reload").state, loaded.state);
        let _ = std::fs::remove_dir_all(ws);
    }

    #[test]
    fn remembered_session_needs_flag() {
        let ws = temp_workspace("remember");
        let conn = open_db(&ws).expect("open");
        assert_eq!(remembered_teacher_id(&conn).expect("read"), None);
        remember_session(&conn, Some(&serde_json::json!({"id": "ADMIN01"}))).expect("remember");
        assert_eq!(
            remembered_teacher_id(&conn).expect("read").as_deref(),
            Some("ADMIN01")
        );
        remember_session(&conn, None).expect("forget");
        assert_eq!(remembered_teacher_id(&conn).expect("read"), None);
        let _ = std::fs::remove_dir_all(ws);
    }
}
