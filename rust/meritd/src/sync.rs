use crate::cloud::SlotStore;
use crate::model::{DisciplinaryCase, SchoolState, Student, TeacherProfile};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("another sync operation is already running")]
    Busy,
    #[error("no cloud data found")]
    NoCloudData,
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("cloud store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Busy => "sync_busy",
            SyncError::NoCloudData => "no_cloud_data",
            SyncError::InvalidData(_) => "invalid_data",
            SyncError::Store(_) => "sync_failed",
        }
    }
}

/// What push writes to the shared slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudBlob {
    pub students: Vec<Student>,
    pub teachers: Vec<TeacherProfile>,
    #[serde(default)]
    pub cases: Vec<DisciplinaryCase>,
    #[serde(default)]
    pub batch_colors: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pushed_by: String,
}

/// What the copy/paste token carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncToken {
    pub students: Vec<Student>,
    pub teachers: Vec<TeacherProfile>,
    #[serde(default)]
    pub batch_colors: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Single in-flight flag for push/pull.
#[derive(Debug, Default)]
pub struct SyncGate {
    busy: Cell<bool>,
}

pub struct SyncPermit<'a> {
    gate: &'a SyncGate,
}

impl SyncGate {
    pub fn try_begin(&self) -> Result<SyncPermit<'_>, SyncError> {
        if self.busy.replace(true) {
            return Err(SyncError::Busy);
        }
        Ok(SyncPermit { gate: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }
}

impl Drop for SyncPermit<'_> {
    fn drop(&mut self) {
        self.gate.busy.set(false);
    }
}

fn simulate_latency(latency: Duration) {
    if !latency.is_zero() {
        std::thread::sleep(latency);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushOutcome {
    pub state: SchoolState,
    pub timestamp: DateTime<Utc>,
    pub version: u64,
}

/// Last writer wins: whatever was in the slot is replaced.
pub fn push(
    gate: &SyncGate,
    store: &dyn SlotStore,
    state: &SchoolState,
    pushed_by: &str,
    now: DateTime<Utc>,
    latency: Duration,
) -> Result<PushOutcome, SyncError> {
    let _permit = gate.try_begin()?;
    simulate_latency(latency);
    let blob = CloudBlob {
        students: state.students.clone(),
        teachers: state.teachers.clone(),
        cases: state.cases.clone(),
        batch_colors: state.config.batch_colors.clone(),
        timestamp: now,
        pushed_by: pushed_by.to_string(),
    };
    let text = serde_json::to_string(&blob).map_err(|e| SyncError::InvalidData(e.to_string()))?;
    let version = store.overwrite(&text)?;
    tracing::info!(
        version,
        students = blob.students.len(),
        store = %store.describe(),
        "pushed state to cloud slot"
    );
    let mut next = state.clone();
    next.config.last_sync = Some(now);
    Ok(PushOutcome {
        state: next,
        timestamp: now,
        version,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullOutcome {
    pub state: SchoolState,
    pub pushed_by: String,
    pub timestamp: DateTime<Utc>,
}

/// Replaces every collection with the slot's contents. Empty slot leaves state alone.
pub fn pull(
    gate: &SyncGate,
    store: &dyn SlotStore,
    state: &SchoolState,
    latency: Duration,
) -> Result<PullOutcome, SyncError> {
    let _permit = gate.try_begin()?;
    simulate_latency(latency);
    let Some(stored) = store.read()? else {
        return Err(SyncError::NoCloudData);
    };
    let blob: CloudBlob = serde_json::from_str(&stored.value).map_err(|e| {
        tracing::warn!(error = %e, "cloud slot holds unreadable data");
        SyncError::InvalidData(e.to_string())
    })?;
    check_students(&blob.students).map_err(|e| {
        tracing::warn!(error = %e, "cloud slot holds an invalid roster");
        e
    })?;
    tracing::info!(
        version = stored.version,
        pushed_by = %blob.pushed_by,
        "pulled state from cloud slot"
    );
    let mut next = state.clone();
    next.students = blob.students;
    next.teachers = blob.teachers;
    next.cases = blob.cases;
    next.config.batch_colors = blob.batch_colors;
    next.config.last_sync = Some(blob.timestamp);
    Ok(PullOutcome {
        state: next,
        pushed_by: blob.pushed_by,
        timestamp: blob.timestamp,
    })
}

/// Incoming rosters must carry sane point values and totals that match their history.
pub fn check_students(students: &[Student]) -> Result<(), SyncError> {
    if let Some(s) = students.iter().find(|s| !s.points_in_range()) {
        return Err(SyncError::InvalidData(format!("points out of range for student {}", s.id)));
    }
    if let Some(s) = students.iter().find(|s| !s.points_consistent()) {
        return Err(SyncError::InvalidData(format!(
            "total points for student {} do not match the record history",
            s.id
        )));
    }
    Ok(())
}

pub fn export_token(state: &SchoolState, now: DateTime<Utc>) -> Result<String, SyncError> {
    let token = SyncToken {
        students: state.students.clone(),
        teachers: state.teachers.clone(),
        batch_colors: state.config.batch_colors.clone(),
        timestamp: now,
    };
    let json = serde_json::to_vec(&token).map_err(|e| SyncError::InvalidData(e.to_string()))?;
    Ok(STANDARD.encode(json))
}

pub fn decode_token(token: &str) -> Result<SyncToken, SyncError> {
    let compact: String = token.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(SyncError::InvalidData("token is empty".into()));
    }
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| SyncError::InvalidData(format!("not a sync token: {}", e)))?;
    let decoded: SyncToken = serde_json::from_slice(&bytes)
        .map_err(|e| SyncError::InvalidData(format!("token payload is malformed: {}", e)))?;
    check_students(&decoded.students)?;
    Ok(decoded)
}

/// Decodes fully before touching anything; on error `state` is not consulted.
pub fn import_token(state: &SchoolState, token: &str) -> Result<(SchoolState, SyncToken), SyncError> {
    let decoded = decode_token(token)?;
    let mut next = state.clone();
    next.students = decoded.students.clone();
    next.teachers = decoded.teachers.clone();
    next.config.batch_colors = decoded.batch_colors.clone();
    Ok((next, decoded))
}
