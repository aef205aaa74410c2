use crate::ipc::error::respond;
use crate::ipc::helpers::{
    bad_params, commit, maybe_session_teacher, optional_i64, optional_str, required_str,
    roster_err, school, string_list, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{
    reason_catalogue, House, MeritCategory, RecordType, CASE_CATEGORIES, CLASS_SECTIONS,
    MAX_GRADE, MIN_GRADE, SUBJECTS, TEACHER_ROLES,
};
use crate::roster::{self, RecordInput};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashSet;

fn record_input(req: &Request) -> Result<RecordInput, Value> {
    let raw_kind = required_str(req, "type")?;
    let kind = RecordType::parse(&raw_kind)
        .ok_or_else(|| bad_params(req, format!("unknown record type: {}", raw_kind)))?;
    Ok(RecordInput {
        kind,
        category: optional_str(req, "category")?,
        reason: required_str(req, "reason")?,
        points: optional_i64(req, "points")?.ok_or_else(|| bad_params(req, "missing points"))?,
    })
}

/// Without a session nothing is written and `applied` is false.
fn handle_records_apply(state: &mut AppState, req: &Request) -> HandlerResult {
    let student_id = required_str(req, "studentId")?;
    let input = record_input(req)?;
    let actor = maybe_session_teacher(state);
    let Some(actor) = actor else {
        school(state, req)?;
        tracing::debug!(student_id = %student_id, "record ignored without a session");
        return Ok(json!({ "applied": false }));
    };
    let next = roster::apply_record(school(state, req)?, Some(&actor), &student_id, &input, Utc::now())
        .map_err(|e| roster_err(req, e))?;
    let total = next.student(&student_id).map(|s| s.total_points);
    commit(state, req, next)?;
    Ok(json!({ "applied": true, "totalPoints": total }))
}

fn handle_records_apply_batch(state: &mut AppState, req: &Request) -> HandlerResult {
    let ids = string_list(req, "studentIds")?.ok_or_else(|| bad_params(req, "missing studentIds"))?;
    let input = record_input(req)?;
    let Some(actor) = maybe_session_teacher(state) else {
        school(state, req)?;
        return Ok(json!({ "applied": false, "count": 0 }));
    };
    let next = roster::apply_record_batch(school(state, req)?, Some(&actor), &ids, &input, Utc::now())
        .map_err(|e| roster_err(req, e))?;
    let mut seen = HashSet::new();
    let count = ids.iter().filter(|id| seen.insert(id.as_str())).count();
    commit(state, req, next)?;
    tracing::info!(count, kind = ?input.kind, by = %actor.id, "batch records applied");
    Ok(json!({ "applied": true, "count": count }))
}

fn handle_records_catalogue(_state: &mut AppState, _req: &Request) -> HandlerResult {
    let categories: Vec<&str> = MeritCategory::ALL.iter().map(|c| c.as_str()).collect();
    let houses: Vec<&str> = House::ALL.iter().map(|h| h.as_str()).collect();
    Ok(json!({
        "reasons": reason_catalogue(),
        "categories": categories,
        "houses": houses,
        "grades": (MIN_GRADE..=MAX_GRADE).collect::<Vec<u8>>(),
        "sections": CLASS_SECTIONS,
        "caseCategories": CASE_CATEGORIES,
        "roles": TEACHER_ROLES,
        "subjects": SUBJECTS,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "records.apply" => handle_records_apply(state, req),
        "records.applyBatch" => handle_records_apply_batch(state, req),
        "records.catalogue" => handle_records_catalogue(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
