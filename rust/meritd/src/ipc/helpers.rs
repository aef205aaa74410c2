use crate::auth::{self, AuthError};
use crate::db;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::model::{House, SchoolState, TeacherProfile};
use crate::roster::RosterError;
use crate::sync::SyncError;
use serde_json::Value;

pub type HandlerResult = Result<Value, Value>;

pub fn required_str(req: &Request, key: &str) -> Result<String, Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(bad_params(req, format!("{} must be a string", key))),
    }
}

pub fn optional_bool(req: &Request, key: &str) -> Result<Option<bool>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(bad_params(req, format!("{} must be boolean", key))),
    }
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("{} must be integer", key))),
    }
}

pub fn optional_grade(req: &Request, key: &str) -> Result<Option<u8>, Value> {
    match optional_i64(req, key)? {
        None => Ok(None),
        Some(g) => u8::try_from(g)
            .map(Some)
            .map_err(|_| bad_params(req, format!("{} is out of range", key))),
    }
}

pub fn optional_house(req: &Request, key: &str) -> Result<Option<House>, Value> {
    match optional_str(req, key)? {
        None => Ok(None),
        Some(h) => House::parse(&h)
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("unknown house: {}", h))),
    }
}

pub fn string_list(req: &Request, key: &str) -> Result<Option<Vec<String>>, Value> {
    match req.params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| bad_params(req, format!("{} must contain strings", key)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(bad_params(req, format!("{} must be an array", key))),
    }
}

pub fn bad_params(req: &Request, message: impl Into<String>) -> Value {
    err(&req.id, "bad_params", message, None)
}

pub fn school<'a>(state: &'a AppState, req: &Request) -> Result<&'a SchoolState, Value> {
    state
        .school
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// The signed-in teacher, looked up fresh so renames and removals apply.
pub fn session_teacher(state: &AppState, req: &Request) -> Result<TeacherProfile, Value> {
    let s = school(state, req)?;
    state
        .session
        .as_deref()
        .and_then(|id| s.teacher(id))
        .cloned()
        .ok_or_else(|| err(&req.id, "not_authenticated", "sign in first", None))
}

/// Like `session_teacher`, but absence is not an error.
pub fn maybe_session_teacher(state: &AppState) -> Option<TeacherProfile> {
    let s = state.school.as_ref()?;
    state.session.as_deref().and_then(|id| s.teacher(id)).cloned()
}

pub fn require_admin(state: &AppState, req: &Request) -> Result<TeacherProfile, Value> {
    let t = session_teacher(state, req)?;
    if !t.is_admin {
        return Err(err(&req.id, "forbidden", "administrator access required", None));
    }
    Ok(t)
}

/// Re-entry of the school password before a destructive action.
pub fn step_up(state: &AppState, req: &Request) -> Result<(), Value> {
    let s = school(state, req)?;
    let supplied = optional_str(req, "schoolPassword")?;
    auth::confirm_step_up(&s.config, supplied.as_deref()).map_err(|e| auth_err(req, e))
}

/// Persist, then swap. A failed save leaves the in-memory state as it was.
pub fn commit(state: &mut AppState, req: &Request, next: SchoolState) -> Result<(), Value> {
    let Some(conn) = state.db.as_mut() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    if let Err(e) = db::save_state(conn, &next) {
        tracing::error!(error = %format!("{e:#}"), method = %req.method, "failed to persist state");
        return Err(err(&req.id, "db_update_failed", format!("{e:#}"), None));
    }
    state.school = Some(next);
    Ok(())
}

pub fn roster_err(req: &Request, e: RosterError) -> Value {
    let details = match &e {
        RosterError::NotFound { kind, id } => Some(serde_json::json!({ "kind": kind, "id": id })),
        _ => None,
    };
    err(&req.id, e.code(), e.to_string(), details)
}

pub fn auth_err(req: &Request, e: AuthError) -> Value {
    err(&req.id, e.code(), e.to_string(), None)
}

pub fn sync_err(req: &Request, e: SyncError) -> Value {
    err(&req.id, e.code(), e.to_string(), None)
}
