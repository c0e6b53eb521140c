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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
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
fn school_year_group_student_lifecycle() {
    let workspace = temp_dir("tuitiond-crud");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let year = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schoolYears.create",
        json!({ "label": "2025/2026" }),
    );
    let year_id = year["schoolYearId"].as_str().expect("schoolYearId").to_string();

    let group = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "groups.create",
        json!({ "schoolYearId": year_id, "name": "Monday A" }),
    );
    let group_id = group["groupId"].as_str().expect("groupId").to_string();

    let mut student_ids = Vec::new();
    for (i, (last, first)) in [("Nagy", "Anna"), ("Kiss", "Bela"), ("Szabo", "Eva")]
        .iter()
        .enumerate()
    {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({
                "groupId": group_id,
                "lastName": last,
                "firstName": first,
                "studentNo": format!("{}", 100 + i),
            }),
        );
        student_ids.push(created["studentId"].as_str().expect("studentId").to_string());
    }

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "students.list",
        json!({ "groupId": group_id }),
    );
    assert_eq!(listed["students"].as_array().unwrap().len(), 3);
    assert_eq!(listed["hasMore"], false);
    // Insert order is preserved through sort_order.
    assert_eq!(listed["students"][0]["lastName"], "Nagy");
    assert_eq!(listed["students"][2]["firstName"], "Eva");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "students.update",
        json!({ "studentId": student_ids[0], "guardianPhone": "+36 30 123 4567" }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "students.list",
        json!({ "groupId": group_id, "query": "Nagy" }),
    );
    assert_eq!(listed["students"].as_array().unwrap().len(), 1);
    assert_eq!(listed["students"][0]["guardianPhone"], "+36 30 123 4567");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "students.delete",
        json!({ "studentId": student_ids[2] }),
    );
    let years = request_ok(&mut stdin, &mut reader, "14", "schoolYears.list", json!({}));
    assert_eq!(years["schoolYears"][0]["groupCount"], 1);
    assert_eq!(years["schoolYears"][0]["studentCount"], 2);

    // Deleting the year cascades through groups and students.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "schoolYears.delete",
        json!({ "schoolYearId": year_id }),
    );
    let years = request_ok(&mut stdin, &mut reader, "16", "schoolYears.list", json!({}));
    assert_eq!(years["schoolYears"].as_array().unwrap().len(), 0);
    let listed = request(
        &mut stdin,
        &mut reader,
        "17",
        "students.list",
        json!({ "groupId": group_id }),
    );
    assert_eq!(listed["ok"], false);
    assert_eq!(listed["error"]["code"], "not_found");
}

#[test]
fn requests_without_workspace_fail_cleanly() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "groups.create",
        json!({ "schoolYearId": "x", "name": "y" }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "no_workspace");

    let resp = request(&mut stdin, &mut reader, "2", "nope.method", json!({}));
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "not_implemented");

    // The daemon keeps serving after errors.
    let resp = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert!(resp["version"].is_string());
}
