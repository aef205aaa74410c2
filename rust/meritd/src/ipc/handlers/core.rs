use crate::cloud::{SlotStore, SqliteSlot, CLOUD_FILE};
use crate::db;
use crate::ipc::error::{err, respond};
use crate::ipc::helpers::{optional_str, required_str, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};

pub const CLOUD_PATH_ENV: &str = "MERITD_CLOUD_PATH";

fn handle_health(state: &mut AppState, _req: &Request) -> HandlerResult {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "signedIn": state.session.is_some(),
        "cloudAttached": state.cloud.is_some(),
    }))
}

/// Param first, then the environment, then a file next to the local db.
fn resolve_cloud_path(workspace: &Path, param: Option<String>) -> PathBuf {
    if let Some(p) = param.filter(|p| !p.trim().is_empty()) {
        return PathBuf::from(p);
    }
    if let Ok(p) = std::env::var(CLOUD_PATH_ENV) {
        if !p.trim().is_empty() {
            return PathBuf::from(p);
        }
    }
    workspace.join(CLOUD_FILE)
}

fn open_cloud(path: &Path) -> Option<Box<dyn SlotStore>> {
    match SqliteSlot::open(path) {
        Ok(slot) => Some(Box::new(slot)),
        Err(e) => {
            // Local work continues without a cloud slot.
            tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "cloud slot unavailable");
            None
        }
    }
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> HandlerResult {
    let path = PathBuf::from(required_str(req, "path")?);
    let cloud_param = optional_str(req, "cloudPath")?;

    let mut conn = db::open_db(&path)
        .map_err(|e| err(&req.id, "db_open_failed", format!("{e:#}"), None))?;
    let loaded = db::load_state(&conn).map_err(|e| match e.downcast_ref::<db::CorruptSlot>() {
        Some(c) => err(
            &req.id,
            "invalid_data",
            format!("{e:#}"),
            Some(json!({ "slot": c.key })),
        ),
        None => err(&req.id, "db_open_failed", format!("{e:#}"), None),
    })?;
    if loaded.seeded {
        db::save_state(&mut conn, &loaded.state)
            .map_err(|e| err(&req.id, "db_update_failed", format!("{e:#}"), None))?;
        tracing::info!(students = loaded.state.students.len(), "seeded new workspace");
    }

    let session = match db::remembered_teacher_id(&conn) {
        Ok(Some(id)) if loaded.state.teacher(&id).is_some() => Some(id),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "ignoring unreadable remembered session");
            None
        }
    };

    let cloud_path = resolve_cloud_path(&path, cloud_param);
    let cloud = open_cloud(&cloud_path);

    tracing::info!(
        workspace = %path.display(),
        students = loaded.state.students.len(),
        teachers = loaded.state.teachers.len(),
        cases = loaded.state.cases.len(),
        restored_session = session.is_some(),
        "workspace opened"
    );

    let current_user = session
        .as_deref()
        .and_then(|id| loaded.state.teacher(id))
        .map(|t| t.public_view());
    state.workspace = Some(path.clone());
    state.db = Some(conn);
    state.school = Some(loaded.state);
    state.session = session;
    state.cloud = cloud;

    Ok(json!({
        "workspacePath": path.to_string_lossy(),
        "seeded": loaded.seeded,
        "currentUser": current_user,
        "cloudPath": state.cloud.as_ref().map(|_| cloud_path.to_string_lossy().to_string()),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => handle_health(state, req),
        "workspace.select" => handle_workspace_select(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
