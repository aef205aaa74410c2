use crate::ipc::error::{err, respond};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    commit, require_admin, required_str, school, session_teacher, sync_err, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::sync;
use chrono::Utc;
use serde_json::json;

fn no_cloud(req: &Request) -> serde_json::Value {
    err(&req.id, "sync_failed", "no cloud slot is attached to this workspace", None)
}

fn handle_sync_push(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = session_teacher(state, req)?;
    let latency = setup::sync_latency(state);
    let s = school(state, req)?;
    let store = state.cloud.as_deref().ok_or_else(|| no_cloud(req))?;
    let outcome = sync::push(&state.sync_gate, store, s, &actor.name, Utc::now(), latency)
        .map_err(|e| sync_err(req, e))?;
    commit(state, req, outcome.state)?;
    Ok(json!({
        "timestamp": outcome.timestamp,
        "version": outcome.version,
    }))
}

fn handle_sync_pull(state: &mut AppState, req: &Request) -> HandlerResult {
    session_teacher(state, req)?;
    let latency = setup::sync_latency(state);
    let s = school(state, req)?;
    let store = state.cloud.as_deref().ok_or_else(|| no_cloud(req))?;
    let outcome = sync::pull(&state.sync_gate, store, s, latency).map_err(|e| sync_err(req, e))?;
    let counts = json!({
        "students": outcome.state.students.len(),
        "teachers": outcome.state.teachers.len(),
        "cases": outcome.state.cases.len(),
    });
    commit(state, req, outcome.state)?;
    // The remembered session may point at a teacher the pull removed.
    if let Some(id) = state.session.clone() {
        if school(state, req)?.teacher(&id).is_none() {
            tracing::warn!(teacher_id = %id, "signed-in teacher no longer exists after pull");
            state.session = None;
        }
    }
    Ok(json!({
        "timestamp": outcome.timestamp,
        "pushedBy": outcome.pushed_by,
        "counts": counts,
    }))
}

fn handle_sync_status(state: &mut AppState, req: &Request) -> HandlerResult {
    let s = school(state, req)?;
    let remote = match state.cloud.as_deref() {
        None => None,
        Some(store) => match store.read() {
            Ok(v) => v.map(|v| json!({ "version": v.version, "writtenAt": v.written_at })),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "failed to read cloud slot");
                None
            }
        },
    };
    Ok(json!({
        "lastSync": s.config.last_sync,
        "busy": state.sync_gate.is_busy(),
        "cloudAttached": state.cloud.is_some(),
        "cloud": state.cloud.as_deref().map(|c| c.describe()),
        "remote": remote,
    }))
}

pub(super) fn handle_export_token(state: &mut AppState, req: &Request) -> HandlerResult {
    session_teacher(state, req)?;
    let s = school(state, req)?;
    let token = sync::export_token(s, Utc::now()).map_err(|e| sync_err(req, e))?;
    Ok(json!({ "token": token }))
}

/// Replaces students, teachers and batch colors; cases are left as they are.
pub(super) fn handle_import_token(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = require_admin(state, req)?;
    let token = required_str(req, "token")?;
    let (next, decoded) = sync::import_token(school(state, req)?, &token).map_err(|e| sync_err(req, e))?;
    commit(state, req, next)?;
    tracing::info!(
        students = decoded.students.len(),
        teachers = decoded.teachers.len(),
        by = %actor.id,
        "sync token imported"
    );
    if school(state, req)?.teacher(&actor.id).is_none() {
        state.session = None;
    }
    Ok(json!({
        "students": decoded.students.len(),
        "teachers": decoded.teachers.len(),
        "timestamp": decoded.timestamp,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "sync.push" => handle_sync_push(state, req),
        "sync.pull" => handle_sync_pull(state, req),
        "sync.status" => handle_sync_status(state, req),
        "sync.exportToken" => handle_export_token(state, req),
        "sync.importToken" => handle_import_token(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
