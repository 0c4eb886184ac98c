//! API integration tests.

use std::io::Read;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};

mod common;
use common::{
    body_bytes, body_json, get, multipart_upload, post_json, session_cookie, test_app,
    test_app_with, with_cookie,
};

// ============================================================================
// Health and sessions
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();

    let response = app.send(get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_session_cookie_issued_once() {
    let app = test_app();

    let response = app.send(get("/api/terminal")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response);
    assert!(cookie.starts_with("hostdeck_session="));

    let response = app.send(with_cookie(get("/api/terminal"), &cookie)).await;
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_malformed_session_cookie_is_replaced() {
    let app = test_app();

    let response = app
        .send(with_cookie(get("/api/terminal"), "hostdeck_session=not-a-uuid"))
        .await;
    let cookie = session_cookie(&response);
    assert!(cookie.starts_with("hostdeck_session="));
    assert_ne!(cookie, "hostdeck_session=not-a-uuid");
}

// ============================================================================
// Terminal
// ============================================================================

#[cfg(unix)]
async fn exec(app: &common::TestApp, cookie: &str, cmd: &str) -> (StatusCode, Value) {
    let response = app
        .send(with_cookie(
            post_json("/api/terminal/exec", json!({ "cmd": cmd })),
            cookie,
        ))
        .await;
    let status = response.status();
    (status, body_json(response).await)
}

#[cfg(unix)]
#[tokio::test]
async fn test_terminal_echo_and_clear() {
    let app = test_app();
    let cookie = session_cookie(&app.send(get("/api/terminal")).await);

    let (status, json) = exec(&app, &cookie, "echo hello").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["output"].as_str().unwrap().contains("hello"));
    assert_eq!(json["exit_code"], 0);

    let response = app
        .send(with_cookie(post_json("/api/terminal/clear", json!({})), &cookie))
        .await;
    assert_eq!(body_json(response).await["status"], "cleared");

    let json = body_json(app.send(with_cookie(get("/api/terminal"), &cookie)).await).await;
    assert_eq!(json["output_history"].as_array().unwrap().len(), 0);
    assert_eq!(json["command_history"], json!(["echo hello"]));
}

#[cfg(unix)]
#[tokio::test]
async fn test_terminal_cd_and_escape() {
    let app = test_app();
    std::fs::create_dir(app.root().join("logs")).unwrap();
    let cookie = session_cookie(&app.send(get("/api/terminal")).await);

    let (_, json) = exec(&app, &cookie, "cd logs").await;
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["relative_cwd"], "logs");

    let (_, json) = exec(&app, &cookie, "cd missing").await;
    assert_eq!(json["exit_code"], 1);
    assert_eq!(json["output"], "cd: missing: No such file or directory");
    assert_eq!(json["relative_cwd"], "logs");

    let (_, json) = exec(&app, &cookie, "cd ../..").await;
    assert_eq!(json["exit_code"], 1);
    assert_eq!(
        json["output"],
        "cd: ../..: Permission denied (outside sandbox root)"
    );

    let response = app
        .send(with_cookie(post_json("/api/terminal/reset", json!({})), &cookie))
        .await;
    let json = body_json(response).await;
    assert_eq!(json["status"], "reset");

    let json = body_json(app.send(with_cookie(get("/api/terminal"), &cookie)).await).await;
    assert_eq!(json["relative_cwd"], "");
    assert_eq!(json["command_history"], json!([]));
}

#[cfg(unix)]
#[tokio::test]
async fn test_terminal_sessions_are_isolated() {
    let app = test_app();
    std::fs::create_dir(app.root().join("a")).unwrap();
    let first = session_cookie(&app.send(get("/api/terminal")).await);
    let second = session_cookie(&app.send(get("/api/terminal")).await);
    assert_ne!(first, second);

    exec(&app, &first, "cd a").await;

    let json = body_json(app.send(with_cookie(get("/api/terminal"), &second)).await).await;
    assert_eq!(json["relative_cwd"], "");
    assert_eq!(json["command_history"], json!([]));
}

#[cfg(unix)]
#[tokio::test]
async fn test_exec_reports_its_own_directory_when_queued() {
    let app = test_app();
    std::fs::create_dir(app.root().join("a")).unwrap();
    std::fs::create_dir(app.root().join("b")).unwrap();
    let root = app.root().canonicalize().unwrap();
    let cd_a = format!("cd {}", root.join("a").display());
    let cd_b = format!("cd {}", root.join("b").display());
    let cookie = session_cookie(&app.send(get("/api/terminal")).await);

    let (slow, to_a, to_b) = tokio::join!(
        exec(&app, &cookie, "sleep 0.5"),
        exec(&app, &cookie, &cd_a),
        exec(&app, &cookie, &cd_b),
    );
    assert_eq!(slow.1["exit_code"], 0);
    assert_eq!(to_a.1["exit_code"], 0);
    assert_eq!(to_a.1["relative_cwd"], "a");
    assert_eq!(to_b.1["exit_code"], 0);
    assert_eq!(to_b.1["relative_cwd"], "b");
}

#[cfg(unix)]
#[tokio::test]
async fn test_terminal_rejects_blank_and_unknown_shell() {
    let app = test_app();
    let cookie = session_cookie(&app.send(get("/api/terminal")).await);

    let (status, _) = exec(&app, &cookie, "   ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let response = app
        .send(with_cookie(
            post_json("/api/terminal/exec", json!({ "cmd": "ls", "shell": "zsh" })),
            &cookie,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Scripts and jobs
// ============================================================================

#[cfg(unix)]
async fn wait_for_terminal_state(app: &common::TestApp, name: &str) -> Value {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let json = body_json(app.send(get(&format!("/api/scripts/{name}"))).await).await;
        if json["status"] != "running" {
            return json;
        }
        assert!(Instant::now() < deadline, "job {name} never finished");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_script_lifecycle() {
    let app = test_app();
    std::fs::write(
        app.scripts_dir().join("build.sh"),
        "sleep 0.1\necho \"built $1\"\n",
    )
    .unwrap();

    let response = app
        .send(post_json(
            "/api/scripts/run",
            json!({ "script": "build.sh", "args_line": "release  fast" }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["status"], "running");
    assert_eq!(json["args"], json!(["release", "fast"]));

    let response = app
        .send(post_json("/api/scripts/run", json!({ "script": "build.sh" })))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let json = wait_for_terminal_state(&app, "build.sh").await;
    assert_eq!(json["status"], "finished");
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["stdout"], "built release\n");

    let json = body_json(app.send(get("/api/jobs")).await).await;
    assert_eq!(json["jobs"][0]["name"], "build.sh");
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_script() {
    let app = test_app();
    std::fs::write(app.scripts_dir().join("serve.sh"), "sleep 30\n").unwrap();

    let response = app
        .send(post_json("/api/scripts/run", json!({ "script": "serve.sh" })))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = app
        .send(post_json("/api/scripts/serve.sh/stop", json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "stopped");

    let response = app
        .send(post_json("/api/scripts/serve.sh/stop", json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_script_errors() {
    let app = test_app();

    let response = app
        .send(post_json("/api/scripts/run", json!({ "script": "nope.sh" })))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");

    std::fs::write(app.scripts_dir().join("readme.txt"), "hi").unwrap();
    let response = app
        .send(post_json("/api/scripts/run", json!({ "script": "readme.txt" })))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.send(get("/api/scripts/never.sh")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_script_catalog_and_upload() {
    let app = test_app();

    let response = app
        .send(multipart_upload("/api/scripts/upload", "hello.sh", b"echo hi\n"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["path"], "hello.sh");

    let response = app
        .send(multipart_upload("/api/scripts/upload", "tool.exe", b"MZ"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(app.send(get("/api/scripts")).await).await;
    let scripts = json["scripts"].as_array().unwrap();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0]["name"], "hello.sh");
    assert_eq!(scripts[0]["status"], "idle");
}

// ============================================================================
// Files
// ============================================================================

#[tokio::test]
async fn test_browse_orders_directories_first() {
    let app = test_app();
    std::fs::write(app.root().join("b.txt"), "b").unwrap();
    std::fs::write(app.root().join("A.txt"), "a").unwrap();
    std::fs::create_dir(app.root().join("zdir")).unwrap();

    let response = app.send(get("/api/files")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    let names: Vec<&str> = json["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    // scripts/ is created at startup
    assert_eq!(names, ["scripts", "zdir", "A.txt", "b.txt"]);
    assert_eq!(json["path"], "");
    assert!(json["parent"].is_null());
}

#[tokio::test]
async fn test_file_routes_reject_traversal() {
    let app = test_app();

    for uri in [
        "/api/files?path=../",
        "/api/files/view?path=../../etc/passwd",
        "/api/files/download?path=sub/../../x",
        "/api/files/backup?path=..",
    ] {
        let response = app.send(get(uri)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body_json(response).await["code"], "FORBIDDEN");
    }
}

#[tokio::test]
async fn test_view_and_edit_text_file() {
    let app = test_app();
    std::fs::write(app.root().join("notes.txt"), "first").unwrap();
    std::fs::write(app.root().join("blob.bin"), b"\x00\x01\x02").unwrap();

    let json = body_json(app.send(get("/api/files/view?path=notes.txt")).await).await;
    assert_eq!(json["is_text"], true);
    assert_eq!(json["content"], "first");

    let json = body_json(app.send(get("/api/files/view?path=blob.bin")).await).await;
    assert_eq!(json["is_text"], false);
    assert!(json.get("content").is_none());

    let response = app
        .send(
            Request::builder()
                .uri("/api/files/edit?path=notes.txt")
                .method(Method::PUT)
                .body(Body::from("second"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        std::fs::read_to_string(app.root().join("notes.txt")).unwrap(),
        "second"
    );

    let response = app
        .send(
            Request::builder()
                .uri("/api/files/edit?path=blob.bin")
                .method(Method::PUT)
                .body(Body::from("text"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(
            Request::builder()
                .uri("/api/files/edit?path=missing.txt")
                .method(Method::PUT)
                .body(Body::from("text"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_and_download() {
    let app = test_app();
    std::fs::create_dir(app.root().join("inbox")).unwrap();

    let response = app
        .send(multipart_upload(
            "/api/files/upload?path=inbox",
            "../report.csv",
            b"a,b\n1,2\n",
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["path"], "inbox/_report.csv");

    let response = app
        .send(get("/api/files/download?path=inbox/_report.csv"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(disposition, "attachment; filename=\"_report.csv\"");
    assert_eq!(body_bytes(response).await, b"a,b\n1,2\n");

    let response = app.send(get("/api/files/download?path=inbox")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_backup_directory() {
    let app = test_app();
    std::fs::create_dir(app.root().join("site")).unwrap();
    std::fs::write(app.root().join("site/index.html"), "<h1>hi</h1>").unwrap();

    let response = app.send(get("/api/files/backup?path=site")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/zip"
    );

    let bytes = body_bytes(response).await;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut entry = archive.by_name("site/index.html").unwrap();
    let mut content = String::new();
    entry.read_to_string(&mut content).unwrap();
    assert_eq!(content, "<h1>hi</h1>");
}

#[tokio::test]
async fn test_backup_refuses_over_size_cap() {
    let app = test_app_with(|config| config.files.max_backup_bytes = 16);
    std::fs::write(app.root().join("big.log"), vec![b'x'; 64]).unwrap();

    let response = app.send(get("/api/files/backup?path=big.log")).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

// ============================================================================
// Logs
// ============================================================================

fn write_aged(path: &std::path::Path, body: &str, age_secs: u64) {
    std::fs::write(path, body).unwrap();
    let when = std::time::SystemTime::now() - Duration::from_secs(age_secs);
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_times(std::fs::FileTimes::new().set_modified(when))
        .unwrap();
}

#[tokio::test]
async fn test_list_logs_newest_first() {
    let app = test_app();
    std::fs::create_dir(app.root().join("var")).unwrap();
    write_aged(&app.root().join("boot.log"), "old", 600);
    write_aged(&app.root().join("var/app.log"), "new", 5);
    write_aged(&app.root().join("readme.md"), "skip", 0);

    let response = app.send(get("/api/logs")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;

    let paths: Vec<&str> = json["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, ["var/app.log", "boot.log"]);
    assert_eq!(json["files"][0]["size"], 3);
}

#[tokio::test]
async fn test_tail_log_returns_last_lines() {
    let app = test_app_with(|config| config.logs.tail_lines = 2);
    let body: String = (1..=10).map(|i| format!("entry {i}\n")).collect();
    std::fs::write(app.root().join("service.log"), body).unwrap();

    let json = body_json(app.send(get("/api/logs/tail?path=service.log")).await).await;
    assert_eq!(json["path"], "service.log");
    assert_eq!(json["lines"], 2);
    assert_eq!(json["content"], "entry 9\nentry 10");

    // Requests above the configured length are capped
    let response = app.send(get("/api/logs/tail?path=service.log&lines=50")).await;
    let json = body_json(response).await;
    assert_eq!(json["lines"], 2);

    let response = app.send(get("/api/logs/tail?path=service.log&lines=1")).await;
    let json = body_json(response).await;
    assert_eq!(json["content"], "entry 10");
}

#[tokio::test]
async fn test_tail_log_errors() {
    let app = test_app();
    std::fs::create_dir(app.root().join("logs")).unwrap();

    let response = app.send(get("/api/logs/tail?path=../outside.log")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.send(get("/api/logs/tail?path=missing.log")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.send(get("/api/logs/tail?path=logs")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
