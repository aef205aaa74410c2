use crate::auth;
use crate::db;
use crate::ipc::error::{err, respond};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    auth_err, commit, maybe_session_teacher, optional_bool, required_str, school, session_teacher,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_login(state: &mut AppState, req: &Request) -> HandlerResult {
    let identifier = required_str(req, "identifier")?;
    let password = required_str(req, "password")?;
    let remember = optional_bool(req, "rememberMe")?.unwrap_or(false);
    let policy = setup::login_policy(state);
    let s = school(state, req)?;

    let teacher =
        auth::login(&s.teachers, &identifier, &password, policy).map_err(|e| auth_err(req, e))?;
    let view = teacher.public_view();
    if let Some(conn) = state.db.as_ref() {
        let remembered = if remember { Some(&view) } else { None };
        if let Err(e) = db::remember_session(conn, remembered) {
            tracing::warn!(error = %format!("{e:#}"), "failed to persist remembered session");
        }
    }
    state.session = Some(teacher.id.clone());
    Ok(json!({ "user": view }))
}

fn handle_logout(state: &mut AppState, req: &Request) -> HandlerResult {
    school(state, req)?;
    if let Some(conn) = state.db.as_ref() {
        db::remember_session(conn, None)
            .map_err(|e| err(&req.id, "db_update_failed", format!("{e:#}"), None))?;
    }
    if let Some(id) = state.session.take() {
        tracing::info!(teacher_id = %id, "logged out");
    }
    Ok(json!({ "ok": true }))
}

fn handle_current(state: &mut AppState, req: &Request) -> HandlerResult {
    school(state, req)?;
    Ok(json!({
        "user": maybe_session_teacher(state).map(|t| t.public_view())
    }))
}

fn handle_change_password(state: &mut AppState, req: &Request) -> HandlerResult {
    let me = session_teacher(state, req)?;
    let current = required_str(req, "currentPassword")?;
    let new_password = required_str(req, "newPassword")?;
    let confirm = required_str(req, "confirmPassword")?;
    let min_len = setup::min_password_len(state);

    let credential = auth::change_password(&me.password, &current, &new_password, &confirm, min_len)
        .map_err(|e| auth_err(req, e))?;
    let mut next = school(state, req)?.clone();
    if let Some(t) = next.teachers.iter_mut().find(|t| t.id == me.id) {
        t.password = credential;
    }
    commit(state, req, next)?;
    tracing::info!(teacher_id = %me.id, "password changed");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "session.login" => handle_login(state, req),
        "session.logout" => handle_logout(state, req),
        "session.current" => handle_current(state, req),
        "session.changePassword" => handle_change_password(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
