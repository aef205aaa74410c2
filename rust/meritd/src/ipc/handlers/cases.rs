use crate::ipc::error::respond;
use crate::ipc::helpers::{
    bad_params, commit, optional_str, required_str, roster_err, school, session_teacher,
    string_list, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{CaseStatus, DisciplinaryCase, Severity};
use crate::roster::{self, CasePatch, NewCase};
use chrono::Utc;
use serde_json::{json, Value};

fn optional_severity(req: &Request) -> Result<Option<Severity>, Value> {
    match optional_str(req, "severity")? {
        None => Ok(None),
        Some(raw) => Severity::parse(&raw)
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("unknown severity: {}", raw))),
    }
}

fn optional_status(req: &Request) -> Result<Option<CaseStatus>, Value> {
    match optional_str(req, "status")? {
        None => Ok(None),
        Some(raw) => CaseStatus::parse(&raw)
            .map(Some)
            .ok_or_else(|| bad_params(req, format!("unknown status: {}", raw))),
    }
}

/// Most severe first, newest first within a severity.
fn handle_cases_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let s = school(state, req)?;
    let status = optional_status(req)?;
    let mut rows: Vec<&DisciplinaryCase> = s
        .cases
        .iter()
        .filter(|c| status.map_or(true, |st| c.status == st))
        .collect();
    rows.sort_by(|a, b| b.severity.cmp(&a.severity).then(b.date.cmp(&a.date)));
    Ok(json!({ "cases": rows }))
}

fn handle_cases_add(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = session_teacher(state, req)?;
    let input = NewCase {
        title: required_str(req, "title")?,
        category: optional_str(req, "category")?.unwrap_or_default(),
        description: optional_str(req, "description")?.unwrap_or_default(),
        location: optional_str(req, "location")?.unwrap_or_default(),
        severity: optional_severity(req)?.unwrap_or(Severity::Minor),
        perpetrator_ids: string_list(req, "perpetratorIds")?.unwrap_or_default(),
        victim_ids: string_list(req, "victimIds")?.unwrap_or_default(),
    };
    let (next, id) = roster::add_case(school(state, req)?, input, &actor.name, Utc::now())
        .map_err(|e| roster_err(req, e))?;
    commit(state, req, next)?;
    tracing::info!(case_id = %id, by = %actor.id, "case logged");
    Ok(json!({ "caseId": id }))
}

fn handle_cases_update(state: &mut AppState, req: &Request) -> HandlerResult {
    session_teacher(state, req)?;
    let id = required_str(req, "caseId")?;
    let patch = CasePatch {
        title: optional_str(req, "title")?,
        category: optional_str(req, "category")?,
        description: optional_str(req, "description")?,
        location: optional_str(req, "location")?,
        severity: optional_severity(req)?,
        perpetrator_ids: string_list(req, "perpetratorIds")?,
        victim_ids: string_list(req, "victimIds")?,
        decision: optional_str(req, "decision")?,
    };
    let next = roster::update_case(school(state, req)?, &id, patch).map_err(|e| roster_err(req, e))?;
    commit(state, req, next)?;
    Ok(json!({ "ok": true }))
}

fn handle_cases_set_status(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = session_teacher(state, req)?;
    let id = required_str(req, "caseId")?;
    let status = optional_status(req)?.ok_or_else(|| bad_params(req, "missing status"))?;
    let decision = optional_str(req, "decision")?;
    let next = roster::set_case_status(school(state, req)?, &id, status, decision)
        .map_err(|e| roster_err(req, e))?;
    commit(state, req, next)?;
    tracing::info!(case_id = %id, status = ?status, by = %actor.id, "case status changed");
    Ok(json!({ "ok": true }))
}

fn handle_cases_remove(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = session_teacher(state, req)?;
    let id = required_str(req, "caseId")?;
    let next = roster::remove_case(school(state, req)?, &id).map_err(|e| roster_err(req, e))?;
    commit(state, req, next)?;
    tracing::info!(case_id = %id, by = %actor.id, "case removed");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "cases.list" => handle_cases_list(state, req),
        "cases.add" => handle_cases_add(state, req),
        "cases.update" => handle_cases_update(state, req),
        "cases.setStatus" => handle_cases_set_status(state, req),
        "cases.remove" => handle_cases_remove(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
