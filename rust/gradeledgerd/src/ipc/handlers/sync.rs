use crate::ipc::error::ok;
use crate::ipc::helpers::{self, HandlerErr};
use crate::ipc::types::{AppState, Request};

fn sync_status(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    helpers::to_json(&helpers::ledger_mut(state)?.status_report())
}

fn sync_force_flush(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    helpers::to_json(&helpers::ledger_mut(state)?.force_flush())
}

fn connectivity_set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let online = helpers::required_bool(&req.params, "online")?;
    helpers::to_json(&helpers::ledger_mut(state)?.set_online(online))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "sync.status" => sync_status(state),
        "sync.forceFlush" => sync_force_flush(state),
        "connectivity.set" => connectivity_set(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
