//! End-to-end API tests covering the documented run/session lifecycle.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;
use common::{test_app, test_app_with_config, test_app_with_state};

async fn send(app: &axum::Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri).method(method);
    let request = match body {
        Some(b) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            builder.body(Body::from(serde_json::to_vec(&b).unwrap())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn health_endpoint_reports_ok_without_auth() {
    let app = test_app().await;
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

async fn register_runner(app: &axum::Router, profile: &str, capabilities: &[&str]) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/runner/register",
        Some(json!({
            "hostname": "h1",
            "project_dir": "/p",
            "executor_profile": profile,
            "capabilities": capabilities,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["runner_id"].as_str().unwrap().to_string()
}

async fn create_echo_blueprint(app: &axum::Router, name: &str) {
    let (status, _) = send(
        app,
        Method::POST,
        "/agents",
        Some(json!({
            "name": name,
            "type": "autonomous",
            "parameters_schema": {"type": "object"},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

/// Scenario 1: start happy path.
#[tokio::test]
async fn start_happy_path_reaches_finished_with_result() {
    let app = test_app().await;
    register_runner(&app, "claude-code", &["internal"]).await;
    create_echo_blueprint(&app, "echo").await;

    let (status, created) = send(
        &app,
        Method::POST,
        "/runs",
        Some(json!({
            "type": "start",
            "agent_name": "echo",
            "parameters": {"prompt": "hi"},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["status"], "pending");
    let run_id = created["run_id"].as_str().unwrap().to_string();
    let session_id = created["session_id"].as_str().unwrap().to_string();

    // No demands means any runner matches; fetch the runner id back out via /runners.
    let (_, runners) = send(&app, Method::GET, "/runners", None).await;
    let runner_id = runners["runners"][0]["runner_id"].as_str().unwrap().to_string();

    let (status, dispatched) =
        send(&app, Method::GET, &format!("/runner/runs?runner_id={runner_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dispatched["run"]["run_id"], run_id);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/runner/runs/{run_id}/started"),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/runner/runs/{run_id}/completed"),
        Some(json!({"result_text": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, result) = send(&app, Method::GET, &format!("/sessions/{session_id}/result"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["result"], "hi");

    let (_, session) = send(&app, Method::GET, &format!("/sessions/{session_id}"), None).await;
    assert_eq!(session["status"], "finished");
}

/// Scenario 2: demand timeout — no runner can ever match, run fails after a sweep.
#[tokio::test]
async fn demand_mismatch_times_out_to_failed() {
    let mut config = coordinator::config::AppConfig::default();
    config.scheduling.no_match_timeout_seconds = 0;
    let (app, state) = test_app_with_config(config).await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/agents",
        Some(json!({
            "name": "gpu-only",
            "type": "autonomous",
            "parameters_schema": {"type": "object"},
            "demands": {"tags": ["gpu"]},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, created) = send(
        &app,
        Method::POST,
        "/runs",
        Some(json!({"type": "start", "agent_name": "gpu-only", "parameters": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let run_id = created["run_id"].as_str().unwrap().to_string();
    let session_id = created["session_id"].as_str().unwrap().to_string();

    let swept = state.queue.sweep_timeouts().await.unwrap();
    assert_eq!(swept, 1);

    let (_, run) = send(&app, Method::GET, &format!("/runs/{run_id}"), None).await;
    assert_eq!(run["status"], "failed");

    let (_, session) = send(&app, Method::GET, &format!("/sessions/{session_id}"), None).await;
    assert_eq!(session["status"], "failed");
}

/// Scenario 3: stop during execution.
#[tokio::test]
async fn stop_during_execution_drains_through_runner() {
    let app = test_app().await;
    register_runner(&app, "claude-code", &[]).await;
    create_echo_blueprint(&app, "echo").await;

    let (_, created) = send(
        &app,
        Method::POST,
        "/runs",
        Some(json!({"type": "start", "agent_name": "echo", "parameters": {"prompt": "hi"}})),
    )
    .await;
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let (_, runners) = send(&app, Method::GET, "/runners", None).await;
    let runner_id = runners["runners"][0]["runner_id"].as_str().unwrap().to_string();
    let (_, _) = send(&app, Method::GET, &format!("/runner/runs?runner_id={runner_id}"), None).await;

    send(&app, Method::POST, &format!("/runner/runs/{run_id}/started"), Some(json!({}))).await;

    let (status, stopped) = send(&app, Method::POST, &format!("/runs/{run_id}/stop"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["status"], "stopping");

    let (status, dispatched) =
        send(&app, Method::GET, &format!("/runner/runs?runner_id={runner_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dispatched["stop_runs"][0], run_id);

    send(&app, Method::POST, &format!("/runner/runs/{run_id}/stopped"), Some(json!({}))).await;

    let (_, run) = send(&app, Method::GET, &format!("/runs/{run_id}"), None).await;
    assert_eq!(run["status"], "stopped");
}

/// Scenario 4: a completed async_callback run auto-enqueues a resume on its parent.
#[tokio::test]
async fn callback_completion_enqueues_resume_on_parent() {
    let app = test_app().await;
    register_runner(&app, "claude-code", &[]).await;
    create_echo_blueprint(&app, "echo").await;

    let (_, parent) = send(
        &app,
        Method::POST,
        "/runs",
        Some(json!({"type": "start", "agent_name": "echo", "parameters": {"prompt": "hi"}})),
    )
    .await;
    let parent_session_id = parent["session_id"].as_str().unwrap().to_string();
    let parent_run_id = parent["run_id"].as_str().unwrap().to_string();
    send(&app, Method::POST, &format!("/runner/runs/{parent_run_id}/started"), Some(json!({}))).await;

    let (status, child) = send(
        &app,
        Method::POST,
        "/runs",
        Some(json!({
            "type": "start",
            "agent_name": "echo",
            "parent_session_id": parent_session_id,
            "parameters": {"prompt": "child"},
            "execution_mode": "async_callback",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let child_run_id = child["run_id"].as_str().unwrap().to_string();

    send(&app, Method::POST, &format!("/runner/runs/{child_run_id}/started"), Some(json!({}))).await;
    send(
        &app,
        Method::POST,
        &format!("/runner/runs/{child_run_id}/completed"),
        Some(json!({"result_text": "done"})),
    )
    .await;

    let (_, runs) = send(&app, Method::GET, &format!("/sessions/{parent_session_id}/runs"), None).await;
    let runs = runs["runs"].as_array().unwrap();
    let resume = runs.iter().find(|r| r["run_type"] == "resume").expect("resume run was enqueued");
    assert_eq!(resume["status"], "pending");
}

/// Scenario 5: concurrent claim — exactly one of two runners gets the run.
#[tokio::test]
async fn concurrent_claim_never_double_dispatches() {
    let (app, state) = test_app_with_state().await;
    let r1 = register_runner(&app, "claude-code", &[]).await;
    let r2 = register_runner(&app, "claude-code", &[]).await;
    create_echo_blueprint(&app, "echo").await;

    send(
        &app,
        Method::POST,
        "/runs",
        Some(json!({"type": "start", "agent_name": "echo", "parameters": {}})),
    )
    .await;

    let q1 = state.queue.clone();
    let q2 = state.queue.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { q1.get_work(&r1).await }),
        tokio::spawn(async move { q2.get_work(&r2).await }),
    );

    let claims = [a.unwrap().unwrap(), b.unwrap().unwrap()];
    let claimed = claims
        .iter()
        .filter(|d| matches!(d, coordinator::queue::DispatchResult::Run(_)))
        .count();
    assert_eq!(claimed, 1, "exactly one runner should have claimed the run");
}

/// A runner that registers with a contributed blueprint makes it visible
/// while online and hides it (without deleting it) once it isn't.
#[tokio::test]
async fn contributed_blueprint_visible_only_while_runner_is_online() {
    let (app, state) = test_app_with_state().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/runner/register",
        Some(json!({
            "hostname": "h1",
            "project_dir": "/p",
            "executor_profile": "claude-code",
            "capabilities": [],
            "contributed_blueprints": [{
                "name": "local-shell",
                "type": "procedural",
                "command": "./run.sh",
                "parameters_schema": {"type": "object"},
            }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let runner_id = body["runner_id"].as_str().unwrap().to_string();

    let (_, agents) = send(&app, Method::GET, "/agents", None).await;
    let names: Vec<&str> = agents["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"local-shell"));

    state.registry.deregister_external(&runner_id).await.unwrap();
    let (_, agents) = send(&app, Method::GET, "/agents", None).await;
    let names: Vec<&str> = agents["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert!(!names.contains(&"local-shell"));
}

/// Scenario 6: recovery under RECOVERY_MODE=all fails anything left running,
/// simulating a restart while a run is mid-flight.
#[tokio::test]
async fn recovery_all_fails_running_runs() {
    let (app, state) = test_app_with_state().await;
    register_runner(&app, "claude-code", &[]).await;
    create_echo_blueprint(&app, "echo").await;

    let (_, created) = send(
        &app,
        Method::POST,
        "/runs",
        Some(json!({"type": "start", "agent_name": "echo", "parameters": {}})),
    )
    .await;
    let run_id = created["run_id"].as_str().unwrap().to_string();
    let session_id = created["session_id"].as_str().unwrap().to_string();

    let (_, runners) = send(&app, Method::GET, "/runners", None).await;
    let runner_id = runners["runners"][0]["runner_id"].as_str().unwrap().to_string();
    send(&app, Method::GET, &format!("/runner/runs?runner_id={runner_id}"), None).await;
    send(&app, Method::POST, &format!("/runner/runs/{run_id}/started"), Some(json!({}))).await;

    let summary = state
        .sessions
        .recover(coordinator::config::RecoveryMode::All)
        .await
        .unwrap();
    assert_eq!(summary.marked_failed, 1);

    let (status, run) = send(&app, Method::GET, &format!("/runs/{run_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "failed");

    let (_, session) = send(&app, Method::GET, &format!("/sessions/{session_id}"), None).await;
    assert_eq!(session["status"], "failed");
}
