mod test_support;

use serde_json::json;
use std::thread;
use std::time::Duration;
use test_support::{
    edit_params, fill_entry, remote_document, request_ok, spawn_sidecar, teacher, temp_dir,
};

#[test]
fn idle_sidecar_flushes_after_debounce_and_settles_to_ready() {
    let workspace = temp_dir("gradeledger-debounce");
    let remote = workspace.join("remote");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let cfg = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "config.update",
        json!({ "patch": { "debounceMs": 300, "doneDisplayMs": 300 } }),
    );
    assert_eq!(cfg["config"]["debounceMs"], 300);
    assert_eq!(cfg["config"]["gradesCollection"], "grades");

    let last = fill_entry(&mut stdin, &mut reader, "3", "s1", "Oct", [18, 20, 25, 25]);
    assert_eq!(last["status"], "SYNCING");
    assert!(remote_document(&remote, "grades", "s1-Math").is_none());

    // No request arrives; the sidecar's own timer drives the flush.
    thread::sleep(Duration::from_millis(1000));
    let doc = remote_document(&remote, "grades", "s1-Math").expect("flushed document");
    assert_eq!(doc["studentId"], "s1");
    assert_eq!(doc["months"]["Oct"]["total"], 88);
    assert_eq!(doc["months"]["Oct"]["finalScore"], 18);

    let status = request_ok(&mut stdin, &mut reader, "4", "sync.status", json!({}));
    assert_eq!(status["status"], "READY");
    assert_eq!(status["pending"], 0);
    assert!(status["lastSyncedAt"].is_string());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn forced_flush_writes_immediately_and_incomplete_entries_stay_local() {
    let workspace = temp_dir("gradeledger-force-flush");
    let remote = workspace.join("remote");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "config.update",
        json!({ "patch": { "debounceMs": 600000 } }),
    );

    let partial = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "ledger.applyEdit",
        edit_params(teacher(), "s2", "Oct", "oral", json!(9)),
    );
    assert_eq!(partial["status"], "PENDING");
    assert_eq!(partial["queued"], false);

    let _ = fill_entry(&mut stdin, &mut reader, "4", "s1", "Oct", [10, 10, 10, 10]);
    let report = request_ok(&mut stdin, &mut reader, "5", "sync.forceFlush", json!({}));
    assert_eq!(report["trigger"], "forced");
    assert_eq!(report["written"], 1);
    assert_eq!(report["remaining"], 0);
    assert_eq!(report["status"], "DONE");
    assert!(report["flushId"].is_string());

    assert!(remote_document(&remote, "grades", "s1-Math").is_some());
    assert!(remote_document(&remote, "grades", "s2-Math").is_none());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
