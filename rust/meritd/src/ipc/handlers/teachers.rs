use crate::auth::{self, DEFAULT_TEACHER_PASSWORD};
use crate::ipc::error::{err, respond};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    auth_err, commit, optional_bool, optional_str, require_admin, required_str, roster_err,
    school, session_teacher, step_up, string_list, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, NewTeacher, TeacherPatch};
use serde_json::{json, Value};

fn handle_teachers_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let s = school(state, req)?;
    let teachers: Vec<Value> = s.teachers.iter().map(|t| t.public_view()).collect();
    Ok(json!({ "teachers": teachers }))
}

/// A supplied password must pass the same checks as a self-service change.
fn checked_password(state: &AppState, req: &Request) -> Result<Option<String>, Value> {
    let Some(p) = optional_str(req, "password")?.filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    auth::new_credential(&p, &p, setup::min_password_len(state)).map_err(|e| auth_err(req, e))?;
    Ok(Some(p))
}

fn handle_teachers_add(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = require_admin(state, req)?;
    let input = NewTeacher {
        name: required_str(req, "name")?,
        staff_id: required_str(req, "staffId")?,
        email: optional_str(req, "email")?.unwrap_or_default(),
        department: optional_str(req, "department")?.unwrap_or_default(),
        roles: string_list(req, "roles")?.unwrap_or_default(),
        subjects: string_list(req, "subjects")?.unwrap_or_default(),
        is_admin: optional_bool(req, "isAdmin")?.unwrap_or(false),
        password: checked_password(state, req)?,
    };
    let default_password = if input.password.is_none() {
        Some(DEFAULT_TEACHER_PASSWORD)
    } else {
        None
    };
    let (next, id) = roster::add_teacher(school(state, req)?, input).map_err(|e| roster_err(req, e))?;
    commit(state, req, next)?;
    tracing::info!(teacher_id = %id, by = %actor.id, "teacher added");
    Ok(json!({
        "teacherId": id,
        "defaultPassword": default_password,
    }))
}

/// Admins edit anyone; a teacher may edit their own profile but not their admin flag.
fn handle_teachers_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let me = session_teacher(state, req)?;
    let id = required_str(req, "teacherId")?;
    if !me.is_admin && me.id != id {
        return Err(err(&req.id, "forbidden", "administrator access required", None));
    }
    let is_admin = optional_bool(req, "isAdmin")?;
    if is_admin.is_some() && !me.is_admin {
        return Err(err(&req.id, "forbidden", "only administrators can change admin access", None));
    }
    let patch = TeacherPatch {
        name: optional_str(req, "name")?,
        staff_id: optional_str(req, "staffId")?,
        email: optional_str(req, "email")?,
        department: optional_str(req, "department")?,
        roles: string_list(req, "roles")?,
        subjects: string_list(req, "subjects")?,
        is_admin,
        password: checked_password(state, req)?,
    };
    let next = roster::update_teacher(school(state, req)?, &id, patch).map_err(|e| roster_err(req, e))?;
    commit(state, req, next)?;
    Ok(json!({ "ok": true }))
}

fn handle_teachers_remove(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = require_admin(state, req)?;
    step_up(state, req)?;
    let id = required_str(req, "teacherId")?;
    let next = roster::remove_teacher(school(state, req)?, &id, Some(actor.id.as_str()))
        .map_err(|e| roster_err(req, e))?;
    commit(state, req, next)?;
    tracing::info!(teacher_id = %id, by = %actor.id, "teacher removed");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "teachers.list" => handle_teachers_list(state, req),
        "teachers.add" => handle_teachers_add(state, req),
        "teachers.update" => handle_teachers_update(state, req),
        "teachers.remove" => handle_teachers_remove(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
