use crate::ipc::error::ok;
use crate::ipc::helpers::{self, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn locks_list(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let ledger = helpers::ledger_mut(state)?;
    Ok(json!({ "locks": helpers::to_json(&ledger.locks())? }))
}

fn locks_set(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let actor = helpers::actor(&req.params)?;
    let key = helpers::lock_key(&req.params)?;
    let locked = helpers::required_bool(&req.params, "locked")?;
    let is_locked = helpers::ledger_mut(state)?.set_lock(&actor, &key, locked)?;
    Ok(json!({ "id": key.document_id(), "isLocked": is_locked }))
}

fn locks_toggle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let actor = helpers::actor(&req.params)?;
    let key = helpers::lock_key(&req.params)?;
    let is_locked = helpers::ledger_mut(state)?.toggle_lock(&actor, &key)?;
    Ok(json!({ "id": key.document_id(), "isLocked": is_locked }))
}

fn locks_refresh(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let ledger = helpers::ledger_mut(state)?;
    let locked = ledger.refresh_locks()?;
    Ok(json!({ "locked": locked, "locks": helpers::to_json(&ledger.locks())? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "locks.list" => locks_list(state),
        "locks.set" => locks_set(state, req),
        "locks.toggle" => locks_toggle(state, req),
        "locks.refresh" => locks_refresh(state),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
