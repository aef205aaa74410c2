use crate::backup;
use crate::ipc::error::{err, respond};
use crate::ipc::handlers::sync::{handle_export_token, handle_import_token};
use crate::ipc::helpers::{commit, require_admin, required_str, school, session_teacher, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export_bundle(state: &mut AppState, req: &Request) -> HandlerResult {
    session_teacher(state, req)?;
    let out_path = PathBuf::from(required_str(req, "outPath")?);
    let s = school(state, req)?;
    let summary = backup::export_bundle(s, &out_path)
        .map_err(|e| err(&req.id, "backup_failed", format!("{e:#}"), None))?;
    tracing::info!(path = %out_path.display(), "bundle exported");
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
    }))
}

/// Whole-snapshot replace. Nothing changes unless the bundle reads cleanly.
fn handle_import_bundle(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = require_admin(state, req)?;
    let in_path = PathBuf::from(required_str(req, "inPath")?);
    let (next, summary) = backup::import_bundle(&in_path).map_err(|e| {
        tracing::warn!(path = %in_path.display(), error = %format!("{e:#}"), "bundle rejected");
        err(&req.id, "backup_failed", format!("{e:#}"), None)
    })?;
    let counts = json!({
        "students": next.students.len(),
        "teachers": next.teachers.len(),
        "cases": next.cases.len(),
    });
    commit(state, req, next)?;
    if school(state, req)?.teacher(&actor.id).is_none() {
        state.session = None;
    }
    tracing::info!(path = %in_path.display(), format = %summary.bundle_format_detected, "bundle imported");
    Ok(json!({
        "bundleFormatDetected": summary.bundle_format_detected,
        "counts": counts,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportToken" => handle_export_token(state, req),
        "backup.importToken" => handle_import_token(state, req),
        "backup.exportBundle" => handle_export_bundle(state, req),
        "backup.importBundle" => handle_import_bundle(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
