use crate::calc::risk::RiskThresholds;
use crate::calc::EngineConfig;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Analysis,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "analysis" => Some(Self::Analysis),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Analysis => "setup.analysis",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Analysis => {
            let d = EngineConfig::default();
            json!({
                "riskAverageBelow": d.risk.average_below,
                "riskMinPercentage": d.risk.min_percentage,
                "riskMinActivities": d.risk.min_activities,
                "completenessCap": d.completeness_cap
            })
        }
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
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
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Analysis => match k.as_str() {
                "riskAverageBelow" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 5.0)?));
                }
                "riskMinPercentage" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                "riskMinActivities" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 50)?));
                }
                "completenessCap" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 1000)?));
                }
                _ => return Err(format!("unknown analysis field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &single);
            }
        }
    }
    Ok(current)
}

fn engine_config_from(analysis: &Value) -> EngineConfig {
    let d = EngineConfig::default();
    let f = |k: &str, fallback: f64| analysis.get(k).and_then(|v| v.as_f64()).unwrap_or(fallback);
    let n = |k: &str, fallback: usize| {
        analysis
            .get(k)
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(fallback)
    };
    EngineConfig {
        risk: RiskThresholds {
            average_below: f("riskAverageBelow", d.risk.average_below),
            min_percentage: f("riskMinPercentage", d.risk.min_percentage),
            min_activities: n("riskMinActivities", d.risk.min_activities),
        },
        completeness_cap: n("completenessCap", d.completeness_cap),
    }
}

pub fn load_engine_config(conn: &rusqlite::Connection) -> anyhow::Result<EngineConfig> {
    Ok(engine_config_from(&load_section(conn, SetupSection::Analysis)?))
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let analysis = match load_section(conn, SetupSection::Analysis) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "analysis": analysis }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    match section {
        SetupSection::Analysis => {
            state.config = engine_config_from(&current);
            state.invalidate();
            tracing::info!(config = ?state.config, "analysis settings updated");
        }
    }
    ok(&req.id, json!({ "ok": true, "analysis": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
