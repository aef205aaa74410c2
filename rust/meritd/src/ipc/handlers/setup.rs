use crate::auth::{self, LoginPolicy, MIN_PASSWORD_LEN};
use crate::calc::DEFAULT_TOP_BOTTOM_COUNT;
use crate::db;
use crate::ipc::error::{err, respond};
use crate::ipc::helpers::{auth_err, commit, required_str, require_admin, school, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::model::{House, HouseBaseline, HouseBaselines};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

const LANGUAGES: &[&str] = &["en", "ms"];

#[derive(Clone, Copy)]
enum SetupSection {
    Security,
    Sync,
    Dashboard,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "security" => Some(Self::Security),
            "sync" => Some(Self::Sync),
            "dashboard" => Some(Self::Dashboard),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Security => "setup.security",
            Self::Sync => "setup.sync",
            Self::Dashboard => "setup.dashboard",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Security => json!({
            "legacyLogin": false,
            "minPasswordLength": MIN_PASSWORD_LEN
        }),
        SetupSection::Sync => json!({
            "latencyMs": 0
        }),
        SetupSection::Dashboard => json!({
            "topBottomCount": DEFAULT_TOP_BOTTOM_COUNT
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Security => match k.as_str() {
                "legacyLogin" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "minPasswordLength" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 4, 64)?));
                }
                _ => return Err(format!("unknown security field: {}", k)),
            },
            SetupSection::Sync => match k.as_str() {
                "latencyMs" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 5000)?));
                }
                _ => return Err(format!("unknown sync field: {}", k)),
            },
            SetupSection::Dashboard => match k.as_str() {
                "topBottomCount" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 20)?));
                }
                _ => return Err(format!("unknown dashboard field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block setup.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

fn section_field(state: &AppState, section: SetupSection, key: &str) -> Option<Value> {
    let conn = state.db.as_ref()?;
    match load_section(conn, section) {
        Ok(v) => v.get(key).cloned(),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), section = section.key(), "failed to read setup");
            None
        }
    }
}

pub fn login_policy(state: &AppState) -> LoginPolicy {
    LoginPolicy {
        legacy_fallback: section_field(state, SetupSection::Security, "legacyLogin")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    }
}

pub fn min_password_len(state: &AppState) -> usize {
    section_field(state, SetupSection::Security, "minPasswordLength")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(MIN_PASSWORD_LEN)
}

pub fn sync_latency(state: &AppState) -> Duration {
    section_field(state, SetupSection::Sync, "latencyMs")
        .and_then(|v| v.as_u64())
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO)
}

pub fn top_bottom_count(state: &AppState) -> usize {
    section_field(state, SetupSection::Dashboard, "topBottomCount")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_TOP_BOTTOM_COUNT)
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7 && s.starts_with('#') && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_batch_colors(v: &Value) -> Result<BTreeMap<String, String>, String> {
    let obj = v
        .as_object()
        .ok_or_else(|| "batchColors must be an object".to_string())?;
    let mut out = BTreeMap::new();
    for (grade, color) in obj {
        let color = color
            .as_str()
            .filter(|c| is_hex_color(c))
            .ok_or_else(|| format!("batchColors.{} must be a #RRGGBB color", grade))?;
        out.insert(grade.clone(), color.to_ascii_uppercase());
    }
    Ok(out)
}

fn parse_house_baselines(v: &Value) -> Result<HouseBaselines, String> {
    let obj = v
        .as_object()
        .ok_or_else(|| "houseBaselines must be an object".to_string())?;
    let mut out = HouseBaselines::new();
    for (house, counts) in obj {
        let h = House::parse(house).ok_or_else(|| format!("unknown house: {}", house))?;
        let field = |name: &str| -> Result<u64, String> {
            match counts.get(name) {
                None | Some(Value::Null) => Ok(0),
                Some(n) => n
                    .as_u64()
                    .ok_or_else(|| format!("houseBaselines.{}.{} must be a count", house, name)),
            }
        };
        out.insert(
            h,
            HouseBaseline {
                merits: field("merits")?,
                demerits: field("demerits")?,
            },
        );
    }
    Ok(out)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let s = school(state, req)?;
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let mut sections = Map::new();
    for (name, section) in [
        ("security", SetupSection::Security),
        ("sync", SetupSection::Sync),
        ("dashboard", SetupSection::Dashboard),
    ] {
        let v = load_section(conn, section)
            .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
        sections.insert(name.to_string(), v);
    }
    sections.insert(
        "school".to_string(),
        json!({
            "language": s.config.language,
            "batchColors": s.config.batch_colors,
            "houseBaselines": s.config.house_baselines,
            "lastSync": s.config.last_sync,
        }),
    );
    Ok(Value::Object(sections))
}

fn update_school_section(state: &mut AppState, req: &Request, patch: &Map<String, Value>) -> HandlerResult {
    let mut next = school(state, req)?.clone();
    for (k, v) in patch {
        let applied = match k.as_str() {
            "language" => match v.as_str().filter(|l| LANGUAGES.contains(l)) {
                Some(l) => {
                    next.config.language = l.to_string();
                    Ok(())
                }
                None => Err(format!("language must be one of: {}", LANGUAGES.join(", "))),
            },
            "batchColors" => parse_batch_colors(v).map(|c| next.config.batch_colors = c),
            "houseBaselines" => parse_house_baselines(v).map(|b| next.config.house_baselines = b),
            _ => Err(format!("unknown school field: {}", k)),
        };
        applied.map_err(|msg| err(&req.id, "bad_params", msg, None))?;
    }
    commit(state, req, next)?;
    Ok(json!({ "ok": true }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> HandlerResult {
    require_admin(state, req)?;
    let section_raw = required_str(req, "section")?;
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "patch must be an object", None));
    };
    if section_raw == "school" {
        return update_school_section(state, req, patch_obj);
    }
    let Some(section) = SetupSection::parse(&section_raw) else {
        return Err(err(&req.id, "bad_params", "unknown section", None));
    };
    let Some(conn) = state.db.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let mut current = load_section(conn, section)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    merge_section_patch(section, &mut current, patch_obj)
        .map_err(|msg| err(&req.id, "bad_params", msg, None))?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| err(&req.id, "db_update_failed", e.to_string(), None))?;
    tracing::info!(section = section.key(), "setup updated");
    Ok(json!({ "ok": true }))
}

fn handle_change_school_password(state: &mut AppState, req: &Request) -> HandlerResult {
    require_admin(state, req)?;
    let current = required_str(req, "currentPassword")?;
    let new_password = required_str(req, "newPassword")?;
    let confirm = required_str(req, "confirmPassword")?;
    let min_len = min_password_len(state);
    let mut next = school(state, req)?.clone();
    next.config.school_password = auth::change_password(
        &next.config.school_password,
        &current,
        &new_password,
        &confirm,
        min_len,
    )
    .map_err(|e| match e {
        auth::AuthError::InvalidCredentials => auth_err(req, auth::AuthError::StepUpRejected),
        other => auth_err(req, other),
    })?;
    commit(state, req, next)?;
    tracing::info!("school password changed");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "setup.get" => handle_setup_get(state, req),
        "setup.update" => handle_setup_update(state, req),
        "setup.changeSchoolPassword" => handle_change_school_password(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
