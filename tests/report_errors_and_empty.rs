use serde_json::json;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_echovalleyd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn echovalleyd");
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

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
}

/// One-shot HTTP stub serving a single canned 200 response.
fn spawn_stub(body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    thread::spawn(move || {
        let (mut socket, _) = match listener.accept() {
            Ok(v) => v,
            Err(_) => return,
        };
        let mut head = BufReader::new(socket.try_clone().expect("clone socket"));
        loop {
            let mut line = String::new();
            match head.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) if line == "\r\n" || line == "\n" => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).ok();
        socket.flush().ok();
        let mut drain = [0u8; 512];
        let _ = socket.read(&mut drain);
    });
    format!("http://{}", addr)
}

#[test]
fn empty_result_is_an_explicit_empty_state() {
    let body = json!({ "total": 0, "items": [] }).to_string();
    let base_url = spawn_stub(body);
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let snap = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "report.open",
        json!({ "baseUrl": base_url }),
    );
    assert_eq!(snap.get("dataState").and_then(|v| v.as_str()), Some("empty"));
    assert!(snap.get("degradedReason").is_none());
    assert_eq!(snap.get("fetchedCount").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(snap.get("currentPage").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(snap.get("totalPages").and_then(|v| v.as_u64()), Some(1));

    let stats = snap.get("statistics").expect("statistics");
    assert_eq!(stats.get("total").and_then(|v| v.as_u64()), Some(0));
    for bucket in stats.get("grades").and_then(|v| v.as_array()).expect("grades") {
        assert_eq!(bucket.get("count").and_then(|v| v.as_u64()), Some(0));
        assert_eq!(bucket.get("rate").and_then(|v| v.as_f64()), Some(0.0));
    }
    for bin in stats
        .get("histogram")
        .and_then(|v| v.as_array())
        .expect("histogram")
    {
        assert_eq!(bin.get("count").and_then(|v| v.as_u64()), Some(0));
    }
}

#[test]
fn health_reports_session_state() {
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let result = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(result.get("sessionOpen").and_then(|v| v.as_bool()), Some(false));
    assert!(result.get("version").and_then(|v| v.as_str()).is_some());

    let _ = request_ok(&mut stdin, &mut reader, "2", "report.open", json!({}));
    let result = request_ok(&mut stdin, &mut reader, "3", "health", json!({}));
    assert_eq!(result.get("sessionOpen").and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn requests_before_open_are_rejected() {
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let value = request(&mut stdin, &mut reader, "1", "report.snapshot", json!({}));
    assert_eq!(error_code(&value), "no_session");

    let value = request(
        &mut stdin,
        &mut reader,
        "2",
        "report.setClass",
        json!({ "className": "all" }),
    );
    assert_eq!(error_code(&value), "no_session");

    let value = request(&mut stdin, &mut reader, "3", "catalog.questions", json!({}));
    assert_eq!(error_code(&value), "no_session");
}

#[test]
fn malformed_params_are_bad_params() {
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let _ = request_ok(&mut stdin, &mut reader, "1", "report.open", json!({}));

    let value = request(
        &mut stdin,
        &mut reader,
        "2",
        "report.setMode",
        json!({ "mode": "review" }),
    );
    assert_eq!(error_code(&value), "bad_params");

    let value = request(
        &mut stdin,
        &mut reader,
        "3",
        "report.setPage",
        json!({ "page": 0 }),
    );
    assert_eq!(error_code(&value), "bad_params");

    let value = request(
        &mut stdin,
        &mut reader,
        "4",
        "report.setGradeFilter",
        json!({ "grade": "amazing" }),
    );
    assert_eq!(error_code(&value), "bad_params");

    let value = request(
        &mut stdin,
        &mut reader,
        "5",
        "report.setSort",
        json!({ "field": "audio" }),
    );
    assert_eq!(error_code(&value), "bad_params");

    let value = request(&mut stdin, &mut reader, "6", "report.setSearch", json!({}));
    assert_eq!(error_code(&value), "bad_params");

    let value = request(
        &mut stdin,
        &mut reader,
        "7",
        "report.open",
        json!({ "pageSize": 0 }),
    );
    assert_eq!(error_code(&value), "bad_params");
}

#[test]
fn unknown_methods_and_close_lifecycle() {
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let value = request(&mut stdin, &mut reader, "1", "report.destroy", json!({}));
    assert_eq!(error_code(&value), "not_implemented");

    let _ = request_ok(&mut stdin, &mut reader, "2", "report.open", json!({}));
    let result = request_ok(&mut stdin, &mut reader, "3", "report.close", json!({}));
    assert_eq!(result.get("closed").and_then(|v| v.as_bool()), Some(true));

    let value = request(&mut stdin, &mut reader, "4", "report.snapshot", json!({}));
    assert_eq!(error_code(&value), "no_session");

    // Closing again is a no-op, not an error.
    let result = request_ok(&mut stdin, &mut reader, "5", "report.close", json!({}));
    assert_eq!(result.get("closed").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn custom_question_catalogs_are_honored() {
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let snap = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "report.open",
        json!({
            "questions": [
                { "id": "u1", "title": "Unit 1", "type": "imitation" },
                { "id": "final", "title": "Final", "type": "exam" }
            ]
        }),
    );
    assert_eq!(
        snap.get("dataState").and_then(|v| v.as_str()),
        Some("degraded")
    );

    let result = request_ok(&mut stdin, &mut reader, "2", "catalog.questions", json!({}));
    let ids: Vec<&str> = result
        .get("questions")
        .and_then(|v| v.as_array())
        .expect("questions")
        .iter()
        .map(|q| q.get("id").and_then(|v| v.as_str()).expect("id"))
        .collect();
    assert_eq!(ids, vec!["u1"]);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "report.setQuestion",
        json!({ "questionId": "u1" }),
    );
    let value = request(
        &mut stdin,
        &mut reader,
        "4",
        "report.setQuestion",
        json!({ "questionId": "q1" }),
    );
    assert_eq!(error_code(&value), "bad_params");

    let value = request(
        &mut stdin,
        &mut reader,
        "5",
        "report.open",
        json!({ "questions": [ { "id": "x", "type": "mystery" } ] }),
    );
    assert_eq!(error_code(&value), "bad_params");
}
