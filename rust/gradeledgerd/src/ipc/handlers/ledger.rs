use crate::ipc::error::ok;
use crate::ipc::helpers::{self, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::keys::LockKey;
use serde_json::json;

type HandlerResult = Result<serde_json::Value, HandlerErr>;

fn ledger_open(state: &mut AppState, _req: &Request) -> HandlerResult {
    let ledger = helpers::ledger_mut(state)?;
    let merged = ledger.sync_from_remote()?;
    Ok(json!({
        "merged": helpers::to_json(&merged)?,
        "locks": helpers::to_json(&ledger.locks())?,
        "sync": helpers::to_json(&ledger.status_report())?,
    }))
}

fn ledger_apply_edit(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = helpers::actor(&req.params)?;
    let at = helpers::entry_ref(&req.params)?;
    let field = helpers::grade_field(&req.params)?;
    let value = helpers::grade_value(&req.params)?;
    let outcome = helpers::ledger_mut(state)?.apply_edit(&actor, &at, field, value)?;
    helpers::to_json(&outcome)
}

fn ledger_enter_override(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = helpers::actor(&req.params)?;
    let at = helpers::entry_ref(&req.params)?;
    let outcome = helpers::ledger_mut(state)?.enter_override(&actor, &at)?;
    helpers::to_json(&outcome)
}

fn ledger_restore_override(state: &mut AppState, req: &Request) -> HandlerResult {
    let actor = helpers::actor(&req.params)?;
    let at = helpers::entry_ref(&req.params)?;
    let outcome = helpers::ledger_mut(state)?.restore_from_override(&actor, &at)?;
    helpers::to_json(&outcome)
}

fn ledger_get_record(state: &mut AppState, req: &Request) -> HandlerResult {
    let key = helpers::record_key(&req.params)?;
    let ledger = helpers::ledger_mut(state)?;
    Ok(json!({
        "id": key.document_id(),
        "record": helpers::to_json(&ledger.record(&key))?,
        "pending": ledger.is_pending(&key),
    }))
}

fn ledger_period_status(state: &mut AppState, req: &Request) -> HandlerResult {
    let subject = helpers::required_str(&req.params, "subjectName")?;
    let period = helpers::required_str(&req.params, "period")?;
    let students = helpers::student_ids(&req.params)?;
    let class_id = req.params.get("classId").and_then(|v| v.as_str());
    let ledger = helpers::ledger_mut(state)?;
    let locked = class_id.map(|c| ledger.is_locked(&LockKey::new(c, subject, period)));
    Ok(json!({
        "subjectName": subject,
        "period": period,
        "status": ledger.period_status(subject, period, &students),
        "locked": locked,
    }))
}

fn ledger_filter_students(state: &mut AppState, req: &Request) -> HandlerResult {
    let subject = helpers::required_str(&req.params, "subjectName")?;
    let period = helpers::required_str(&req.params, "period")?;
    let students = helpers::student_ids(&req.params)?;
    let filter = helpers::student_filter(&req.params)?;
    let ledger = helpers::ledger_mut(state)?;
    Ok(json!({
        "filter": filter,
        "studentIds": ledger.filter_students(subject, period, &students, filter),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "ledger.open" => ledger_open(state, req),
        "ledger.applyEdit" => ledger_apply_edit(state, req),
        "ledger.enterOverride" => ledger_enter_override(state, req),
        "ledger.restoreOverride" => ledger_restore_override(state, req),
        "ledger.getRecord" => ledger_get_record(state, req),
        "ledger.periodStatus" => ledger_period_status(state, req),
        "ledger.filterStudents" => ledger_filter_students(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
