// ABOUTME: Router-level tests for the Botyard HTTP API
// ABOUTME: Drives project, file and lifecycle endpoints through tower's oneshot

use super::{json_body, TestApp};
use axum::http::{Method, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "botyard");
}

#[tokio::test]
async fn test_engine_endpoint_reports_reachability() {
    let app = TestApp::new().await;
    let body = json_body(app.request(Method::GET, "/api/engine", None).await).await;
    assert_eq!(body["data"]["reachable"], true);

    app.runtime.engine_down.store(true, Ordering::SeqCst);
    let body = json_body(app.request(Method::GET, "/api/engine", None).await).await;
    assert_eq!(body["data"]["reachable"], false);
    assert!(body["data"]["error"].as_str().is_some());
}

#[tokio::test]
async fn test_create_and_list_projects() {
    let app = TestApp::new().await;
    let id = app.create_project().await;
    assert_eq!(id.len(), 12);

    let body = json_body(app.request(Method::GET, "/api/projects", None).await).await;
    let projects = body["data"].as_array().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["name"], "Greeter");
    assert_eq!(
        projects[0]["inviteUrl"],
        "https://discord.com/oauth2/authorize?client_id=123456789&permissions=8&scope=bot"
    );

    let detail = json_body(
        app.request(Method::GET, &format!("/api/projects/{}", id), None)
            .await,
    )
    .await;
    assert_eq!(detail["data"]["status"]["state"], "absent");
}

#[tokio::test]
async fn test_create_project_without_files_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/projects",
            Some(json!({ "name": "empty", "files": {} })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, "/api/projects/0123456789ab/tree", None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert!(body["request_id"].as_str().is_some());
}

#[tokio::test]
async fn test_file_round_trip_and_tree() {
    let app = TestApp::new().await;
    let id = app.create_project().await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/projects/{}/file", id),
            Some(json!({ "path": "cogs/admin.py", "content": "# admin\n" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(
        app.request(
            Method::GET,
            &format!("/api/projects/{}/file?path=cogs/admin.py", id),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(body["data"]["content"], "# admin\n");

    let tree = json_body(
        app.request(Method::GET, &format!("/api/projects/{}/tree", id), None)
            .await,
    )
    .await;
    let names: Vec<&str> = tree["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"cogs"));
    assert!(names.contains(&"bot.py"));
    assert!(!names.contains(&".botyard.json"));

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/projects/{}/file?path=cogs/admin.py", id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_path_traversal_is_refused() {
    let app = TestApp::new().await;
    let id = app.create_project().await;

    let response = app
        .request(
            Method::GET,
            &format!("/api/projects/{}/file?path=../../etc/passwd", id),
            None,
        )
        .await;
    assert!(response.status().is_client_error());

    let response = app
        .request(
            Method::PUT,
            &format!("/api/projects/{}/file", id),
            Some(json!({ "path": "../escape.py", "content": "x" })),
        )
        .await;
    assert!(response.status().is_client_error() || response.status().is_server_error());
    assert!(!app._dir.path().join("escape.py").exists());
}

#[tokio::test]
async fn test_start_stop_cycle() {
    let app = TestApp::new().await;
    let id = app.create_project().await;

    let response = app
        .request(Method::POST, &format!("/api/projects/{}/start", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["state"], "running");
    assert_eq!(body["data"]["runtimeId"], format!("bot-{}", id));
    assert!(app.runtime.is_live(&id));

    // Second start is a conflict
    let response = app
        .request(Method::POST, &format!("/api/projects/{}/start", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"]["code"], "ALREADY_RUNNING");

    // Delete while running is a conflict
    let response = app
        .request(Method::DELETE, &format!("/api/projects/{}", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let logs = json_body(
        app.request(Method::GET, &format!("/api/projects/{}/logs", id), None)
            .await,
    )
    .await;
    assert_eq!(logs["data"]["lines"][0]["text"], "Logged in as TestBot");
    assert_eq!(logs["data"]["ready"], true);

    let response = app
        .request(Method::POST, &format!("/api/projects/{}/stop", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["state"], "absent");
    assert!(!app.runtime.is_live(&id));

    let response = app
        .request(Method::GET, &format!("/api/projects/{}/logs", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"]["code"], "NOT_RUNNING");

    let response = app
        .request(Method::DELETE, &format!("/api/projects/{}", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_engine_down_is_service_unavailable() {
    let app = TestApp::new().await;
    let id = app.create_project().await;
    app.runtime.engine_down.store(true, Ordering::SeqCst);

    let response = app
        .request(Method::POST, &format!("/api/projects/{}/start", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["error"]["code"], "ENGINE_DOWN");

    let status = json_body(
        app.request(Method::GET, &format!("/api/projects/{}/status", id), None)
            .await,
    )
    .await;
    assert_eq!(status["data"]["state"], "absent");
}

#[tokio::test]
async fn test_build_failure_returns_output() {
    let app = TestApp::new().await;
    let id = app.create_project().await;
    app.runtime.fail_build.store(true, Ordering::SeqCst);

    let response = app
        .request(Method::POST, &format!("/api/projects/{}/start", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "BUILD_FAILED");
    assert_eq!(
        body["error"]["details"]["output"],
        "ModuleNotFoundError: No module named 'discord'"
    );

    let status = json_body(
        app.request(Method::GET, &format!("/api/projects/{}/status", id), None)
            .await,
    )
    .await;
    assert_eq!(status["data"]["state"], "failed");
    assert_eq!(status["data"]["inProgress"], false);
}

#[tokio::test]
async fn test_edits_restart_running_project() {
    let app = TestApp::new().await;
    let id = app.create_project().await;
    let edits = json!({ "files": { "bot.py": "print('v2')\n" } });

    let body = json_body(
        app.request(
            Method::POST,
            &format!("/api/projects/{}/edits", id),
            Some(edits.clone()),
        )
        .await,
    )
    .await;
    assert_eq!(body["data"]["restarted"], false);

    app.request(Method::POST, &format!("/api/projects/{}/start", id), None)
        .await;
    let body = json_body(
        app.request(
            Method::POST,
            &format!("/api/projects/{}/edits", id),
            Some(edits),
        )
        .await,
    )
    .await;
    assert_eq!(body["data"]["restarted"], true);
    assert_eq!(body["data"]["handle"]["state"], "running");
    assert_eq!(
        app.controller.store().read_file(&id, "bot.py").await.unwrap(),
        "print('v2')\n"
    );
}

#[tokio::test]
async fn test_disconnect_always_succeeds() {
    let app = TestApp::new().await;
    let id = app.create_project().await;
    app.request(Method::POST, &format!("/api/projects/{}/start", id), None)
        .await;

    app.runtime.engine_down.store(true, Ordering::SeqCst);
    let response = app
        .request(Method::POST, &format!("/api/projects/{}/disconnect", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    app.runtime.engine_down.store(false, Ordering::SeqCst);
    let response = app
        .request(Method::POST, &format!("/api/projects/{}/disconnect", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!app.runtime.is_live(&id));
}

#[tokio::test]
async fn test_regenerate_replaces_tree() {
    let app = TestApp::new().await;
    let id = app.create_project().await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/projects/{}/tree", id),
            Some(json!({ "files": { "main.py": "print('new')\n" } })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::GET,
            &format!("/api/projects/{}/file?path=bot.py", id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_log_stream_requires_a_run() {
    let app = TestApp::new().await;
    let id = app.create_project().await;

    let response = app
        .request(Method::GET, &format!("/api/projects/{}/logs/stream", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    app.request(Method::POST, &format!("/api/projects/{}/start", id), None)
        .await;
    let response = app
        .request(Method::GET, &format!("/api/projects/{}/logs/stream", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
}
