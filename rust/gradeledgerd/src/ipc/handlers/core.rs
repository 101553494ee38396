use crate::cache::{LocalCache, SqliteKv};
use crate::config;
use crate::connectivity::Transition;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{self, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::GradeLedger;
use crate::remote::JsonDirRemote;
use crate::sync::SystemClock;
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "remotePath": state.remote_root.as_ref().map(|p| p.to_string_lossy().to_string()),
            "online": state.ledger.as_ref().map(|l| l.is_online()),
            "status": state.ledger.as_ref().map(|l| l.status()),
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
    let remote_root = req
        .params
        .get("remotePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .unwrap_or_else(|| path.join("remote"));
    let online = req
        .params
        .get("online")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    let mut cfg = match config::load(&conn) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "stored engine config is unusable, using defaults");
            config::EngineConfig::default()
        }
    };
    if let Some(patch) = req.params.get("config").and_then(|v| v.as_object()) {
        cfg = match cfg.patched(patch) {
            Ok(next) => next,
            Err(e) => return err(&req.id, "bad_params", format!("{e:#}"), None),
        };
        if let Err(e) = config::save(&conn, &cfg) {
            return err(&req.id, "db_update_failed", format!("{e:?}"), None);
        }
    }
    let kv = match SqliteKv::open(&path) {
        Ok(kv) => kv,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };

    // Pending timers of a previously open workspace are dropped; its cache
    // already holds everything needed to resume.
    let cache = LocalCache::new(Box::new(kv), cfg.cache_key.clone());
    let mut ledger = GradeLedger::new(
        cfg,
        cache,
        Box::new(JsonDirRemote::new(remote_root.clone())),
        Box::new(SystemClock),
        online,
    );
    let listener = ledger.subscribe_connectivity(|t| match t {
        Transition::Lost => info!("connectivity lost, edits stay local"),
        Transition::Regained => info!("connectivity regained, draining queue"),
    });
    let merged = if online {
        match ledger.sync_from_remote() {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "initial remote fetch failed");
                None
            }
        }
    } else {
        None
    };

    info!(workspace = %path.to_string_lossy(), online, "workspace opened");
    let result = json!({
        "workspacePath": path.to_string_lossy(),
        "remotePath": remote_root.to_string_lossy(),
        "online": online,
        "merged": merged,
        "sync": ledger.status_report(),
    });
    state.close_ledger();
    state.workspace = Some(path);
    state.remote_root = Some(remote_root);
    state.db = Some(conn);
    state.ledger = Some(ledger);
    state.connectivity_log = Some(listener);
    ok(&req.id, result)
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    match helpers::ledger_mut(state) {
        Ok(ledger) => ok(&req.id, json!({ "config": ledger.config() })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    match config_update(state, req) {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

fn config_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing params.patch"));
    };
    let next = {
        let ledger = helpers::ledger_mut(state)?;
        ledger.config().patched(patch).map_err(|e| HandlerErr {
            code: "bad_params",
            message: format!("{e:#}"),
            details: Some(json!({ "patch": patch })),
        })?
    };
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    config::save(conn, &next).map_err(|e| HandlerErr::new("db_update_failed", format!("{e:?}")))?;
    let ledger = helpers::ledger_mut(state)?;
    ledger.set_config(next);
    Ok(json!({ "config": ledger.config() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "config.get" => Some(handle_config_get(state, req)),
        "config.update" => Some(handle_config_update(state, req)),
        _ => None,
    }
}
