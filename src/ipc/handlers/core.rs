use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};
use anyhow::Context;
use serde_json::json;
use std::path::{Path, PathBuf};

/// Opens (or creates) the workspace store, applies saved settings and loads
/// the snapshot. State is only replaced once everything succeeded.
pub fn select_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    let config = setup::load_engine_config(&conn).context("failed to load settings")?;
    let snapshot = db::load_snapshot(&conn)?;
    tracing::info!(
        workspace = %path.display(),
        students = snapshot.students().len(),
        activities = snapshot.activities().len(),
        grades = snapshot.grades().len(),
        "workspace selected"
    );

    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.config = config;
    state.snapshot = snapshot;
    state.invalidate();
    Ok(())
}

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (hits, misses) = state.cache.stats();
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "cache": { "entries": state.cache.len(), "hits": hits, "misses": misses }
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match select_workspace(state, &path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
