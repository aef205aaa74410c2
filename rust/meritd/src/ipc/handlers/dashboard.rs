use crate::calc::{self, Scope};
use crate::ipc::error::respond;
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{bad_params, school, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_dashboard_stats(state: &mut AppState, req: &Request) -> HandlerResult {
    let scope = Scope::parse(req.params.get("scope")).map_err(|msg| bad_params(req, msg))?;
    let top_n = setup::top_bottom_count(state);
    let s = school(state, req)?;
    let stats = calc::dashboard(&s.students, &scope, &s.config.house_baselines, top_n);
    let standings = calc::house_standings(&stats);
    Ok(json!({
        "stats": stats,
        "houseStandings": standings,
        "topBottomCount": top_n,
        "lastSync": s.config.last_sync,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "dashboard.stats" => handle_dashboard_stats(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
