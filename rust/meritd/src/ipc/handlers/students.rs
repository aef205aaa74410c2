use crate::calc::{self, StudentFilter, StudentSort};
use crate::ipc::error::{err, respond};
use crate::ipc::helpers::{
    bad_params, commit, optional_grade, optional_house, optional_i64, optional_str, require_admin,
    required_str, roster_err, school, session_teacher, step_up, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::roster::{self, NewStudent, StudentPatch};
use crate::summary::{summarize_or_fallback, SummaryRequest};
use serde_json::json;

fn handle_students_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let s = school(state, req)?;
    let sort = match optional_str(req, "sort")? {
        None => StudentSort::default(),
        Some(raw) => StudentSort::parse(&raw)
            .ok_or_else(|| bad_params(req, format!("unknown sort: {}", raw)))?,
    };
    let filter = StudentFilter {
        query: optional_str(req, "query")?,
        grade: optional_grade(req, "grade")?,
        house: optional_house(req, "house")?,
        class_group: optional_str(req, "classGroup")?,
        sort,
    };
    let rows = calc::filter_students(&s.students, &filter);
    Ok(json!({
        "total": s.students.len(),
        "students": rows,
    }))
}

fn handle_students_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let s = school(state, req)?;
    let id = required_str(req, "studentId")?;
    let Some(student) = s.student(&id) else {
        return Err(err(
            &req.id,
            "not_found",
            format!("student not found: {}", id),
            Some(json!({ "kind": "student", "id": id })),
        ));
    };
    Ok(json!({ "student": student }))
}

fn handle_students_add(state: &mut AppState, req: &Request) -> HandlerResult {
    session_teacher(state, req)?;
    let input = NewStudent {
        first_name: required_str(req, "firstName")?,
        last_name: optional_str(req, "lastName")?.unwrap_or_default(),
        grade: optional_grade(req, "grade")?
            .ok_or_else(|| bad_params(req, "missing grade"))?,
        section: optional_str(req, "section")?.unwrap_or_default(),
        house: optional_house(req, "house")?
            .ok_or_else(|| bad_params(req, "missing house"))?,
    };
    let (next, id) = roster::add_student(school(state, req)?, input).map_err(|e| roster_err(req, e))?;
    commit(state, req, next)?;
    Ok(json!({ "studentId": id }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> HandlerResult {
    session_teacher(state, req)?;
    let id = required_str(req, "studentId")?;
    let patch = StudentPatch {
        first_name: optional_str(req, "firstName")?,
        last_name: optional_str(req, "lastName")?,
        grade: optional_grade(req, "grade")?,
        section: optional_str(req, "section")?,
        house: optional_house(req, "house")?,
    };
    let next = roster::update_student(school(state, req)?, &id, patch).map_err(|e| roster_err(req, e))?;
    commit(state, req, next)?;
    Ok(json!({ "ok": true }))
}

fn handle_students_remove(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = session_teacher(state, req)?;
    step_up(state, req)?;
    let id = required_str(req, "studentId")?;
    let next = roster::remove_student(school(state, req)?, &id).map_err(|e| roster_err(req, e))?;
    commit(state, req, next)?;
    tracing::info!(student_id = %id, by = %actor.id, "student removed");
    Ok(json!({ "ok": true }))
}

fn handle_students_add_batch(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = require_admin(state, req)?;
    step_up(state, req)?;
    let count = optional_i64(req, "count")?.ok_or_else(|| bad_params(req, "missing count"))?;
    let n = usize::try_from(count)
        .map_err(|_| err(&req.id, "validation_failed", "count must be positive", None))?;
    let before = school(state, req)?.students.len();
    let next = roster::add_batch(school(state, req)?, n, &mut rand::thread_rng())
        .map_err(|e| roster_err(req, e))?;
    let added = next.students.len() - before;
    commit(state, req, next)?;
    tracing::info!(added, by = %actor.id, "batch of students added");
    Ok(json!({ "added": added }))
}

fn handle_students_promote_all(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = require_admin(state, req)?;
    step_up(state, req)?;
    let next = roster::promote_all(school(state, req)?).map_err(|e| roster_err(req, e))?;
    let promoted = next.students.len();
    commit(state, req, next)?;
    tracing::info!(promoted, by = %actor.id, "all students promoted");
    Ok(json!({ "promoted": promoted }))
}

fn handle_students_clear_all(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = require_admin(state, req)?;
    step_up(state, req)?;
    let removed = school(state, req)?.students.len();
    let next = roster::clear_students(school(state, req)?);
    commit(state, req, next)?;
    tracing::warn!(removed, by = %actor.id, "student roster cleared");
    Ok(json!({ "removed": removed }))
}

fn handle_students_summary(state: &mut AppState, req: &Request) -> HandlerResult {
    let s = school(state, req)?;
    let id = required_str(req, "studentId")?;
    let Some(student) = s.student(&id) else {
        return Err(err(
            &req.id,
            "not_found",
            format!("student not found: {}", id),
            Some(json!({ "kind": "student", "id": id })),
        ));
    };
    let (text, fallback) =
        summarize_or_fallback(&*state.summarizer, &SummaryRequest::for_student(student));
    Ok(json!({ "summary": text, "fallback": fallback }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.get" => handle_students_get(state, req),
        "students.add" => handle_students_add(state, req),
        "students.update" => handle_students_update(state, req),
        "students.remove" => handle_students_remove(state, req),
        "students.addBatch" => handle_students_add_batch(state, req),
        "students.promoteAll" => handle_students_promote_all(state, req),
        "students.clearAll" => handle_students_clear_all(state, req),
        "students.summary" => handle_students_summary(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
