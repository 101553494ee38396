#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradeledgerd");
    let mut child = Command::new(exe)
        .env("GRADELEDGER_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradeledgerd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response");
    serde_json::from_str(line.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

/// Returns the error object of a request that is expected to fail.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

pub fn error_code(error: &serde_json::Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

pub fn teacher() -> serde_json::Value {
    json!({ "userId": "teacher-1", "isAdmin": false, "mayOverrideTotal": false })
}

pub fn overrider() -> serde_json::Value {
    json!({ "userId": "teacher-2", "isAdmin": false, "mayOverrideTotal": true })
}

pub fn admin() -> serde_json::Value {
    json!({ "userId": "admin-1", "isAdmin": true })
}

/// Params addressing one entry of class `p1`, subject `Math`.
pub fn entry_params(student: &str, period: &str) -> serde_json::Value {
    json!({
        "classId": "p1",
        "studentId": student,
        "subjectName": "Math",
        "period": period,
    })
}

pub fn edit_params(
    actor: serde_json::Value,
    student: &str,
    period: &str,
    field: &str,
    value: serde_json::Value,
) -> serde_json::Value {
    let mut p = entry_params(student, period);
    p["actor"] = actor;
    p["field"] = json!(field);
    p["value"] = value;
    p
}

/// Writes the four raw fields of one entry and returns the last edit result.
pub fn fill_entry(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id_prefix: &str,
    student: &str,
    period: &str,
    values: [i64; 4],
) -> serde_json::Value {
    let mut last = serde_json::Value::Null;
    for (i, (field, v)) in ["homework", "attendance", "oral", "written"]
        .iter()
        .zip(values)
        .enumerate()
    {
        last = request_ok(
            stdin,
            reader,
            &format!("{id_prefix}-{i}"),
            "ledger.applyEdit",
            edit_params(teacher(), student, period, field, json!(v)),
        );
    }
    last
}

pub fn remote_document(remote: &Path, collection: &str, id: &str) -> Option<serde_json::Value> {
    let bytes = std::fs::read(remote.join(collection).join(format!("{id}.json"))).ok()?;
    serde_json::from_slice(&bytes).ok()
}
