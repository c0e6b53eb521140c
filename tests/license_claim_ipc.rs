use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_tuitiond");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tuitiond");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn claim_is_idempotent_and_exclusive_per_device() {
    let workspace = temp_dir("tuitiond-license");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "license.add", json!({ "key": "TK-100" }));

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "license.status",
        json!({ "key": "TK-100" }),
    );
    assert_eq!(status["status"], "available");

    // First claim binds the key to this install's device identity.
    let claim = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "license.claim",
        json!({ "key": "TK-100", "appVersion": "1.0.0", "deviceModel": "Pixel 8" }),
    );
    assert_eq!(claim["result"], "success");

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "license.claim",
        json!({ "key": "TK-100" }),
    );
    assert_eq!(again["result"], "ok");

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "license.status",
        json!({ "key": "TK-100" }),
    );
    assert_eq!(status["status"], "used_by_this_device");

    // A different device sees the key as taken and cannot claim it.
    let status = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "license.status",
        json!({ "key": "TK-100", "device": "other-device" }),
    );
    assert_eq!(status["status"], "used_by_other_device");

    let conflict = request(
        &mut stdin,
        &mut reader,
        "8",
        "license.claim",
        json!({ "key": "TK-100", "device": "other-device" }),
    );
    assert_eq!(conflict["ok"], false);
    assert_eq!(conflict["error"]["code"], "already-exists");
    assert_eq!(conflict["error"]["details"]["retryable"], false);
}

#[test]
fn revoke_checks_device_ownership_and_releases_binding() {
    let workspace = temp_dir("tuitiond-license-revoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "license.add", json!({ "key": "TK-200" }));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "license.claim",
        json!({ "key": "TK-200", "device": "dev-a" }),
    );

    let denied = request(
        &mut stdin,
        &mut reader,
        "4",
        "license.revoke",
        json!({ "key": "TK-200", "device": "dev-b" }),
    );
    assert_eq!(denied["ok"], false);
    assert_eq!(denied["error"]["code"], "permission-denied");

    let revoked = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "license.revoke",
        json!({ "key": "TK-200", "device": "dev-a" }),
    );
    assert_eq!(revoked["success"], true);

    // Inactive: even the former owner cannot claim again.
    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "license.claim",
        json!({ "key": "TK-200", "device": "dev-a" }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "permission-denied");

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "license.status",
        json!({ "key": "TK-200" }),
    );
    assert_eq!(status["status"], "inactive");
}

#[test]
fn unknown_key_is_terminal_not_retryable() {
    let workspace = temp_dir("tuitiond-license-missing");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "license.claim",
        json!({ "key": "TK-NOPE" }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "not-found");
    assert_eq!(resp["error"]["details"]["retryable"], false);

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "license.status",
        json!({ "key": "TK-NOPE" }),
    );
    assert_eq!(status["status"], "invalid");
}
