// HTTP-level integration tests exercising the full router against a real
// rules file on disk.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use policyshield::api::{create_router, AppState};
use policyshield::config::Config;
use policyshield::engine::Engine;
use serde_json::{json, Value};
use std::io::Write;
use tempfile::TempDir;
use tower::ServiceExt;

fn write_rules(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("rules.yaml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

fn build_router(dir: &TempDir, rules_path: std::path::PathBuf) -> axum::Router {
    let mut config = Config::test_config();
    config.rules_path = rules_path.clone();
    config.trace_path = dir.path().join("trace.jsonl");
    let rule_set = policyshield::rules::load(&rules_path).unwrap();
    let engine = std::sync::Arc::new(Engine::new(rule_set, config).unwrap());
    create_router(AppState { engine }, None)
}

async fn send_json(router: &axum::Router, method: &str, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let parsed: Value = if bytes.is_empty() { json!(null) } else { serde_json::from_slice(&bytes).unwrap() };
    (status, parsed)
}

async fn get_json(router: &axum::Router, path: &str) -> (StatusCode, Value) {
    let request = Request::builder().method("GET").uri(path).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let parsed: Value = if bytes.is_empty() { json!(null) } else { serde_json::from_slice(&bytes).unwrap() };
    (status, parsed)
}

const APPROVE_RULES: &str = r#"
shield_name: test-shield
version: 1
default_verdict: ALLOW
rules:
  - id: approve-deploy
    when:
      tool: deploy
    then: approve
    severity: critical
    message: "deploy requires human approval"
    approval_strategy: once
"#;

#[tokio::test]
async fn approve_round_trip_through_http() {
    let dir = TempDir::new().unwrap();
    let rules_path = write_rules(&dir, APPROVE_RULES);
    let router = build_router(&dir, rules_path);

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/check",
        json!({"tool_name": "deploy", "args": {"env": "prod"}, "session_id": "s1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"], "APPROVE");
    let approval_id = body["approval_id"].as_str().unwrap().to_string();

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/check-approval",
        json!({"approval_id": approval_id}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    let (status, _) = send_json(
        &router,
        "POST",
        "/api/v1/respond-approval",
        json!({"approval_id": approval_id, "approved": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/check-approval",
        json!({"approval_id": approval_id}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");

    // Same tool/session again: the approve-once strategy returns the same
    // (now-approved) record instead of minting a new pending approval.
    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/check",
        json!({"tool_name": "deploy", "args": {"env": "prod"}, "session_id": "s1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"], "ALLOW");
}

#[tokio::test]
async fn pending_approval_collapses_to_denied_when_rule_dropped_by_reload() {
    let dir = TempDir::new().unwrap();
    let rules_path = write_rules(&dir, APPROVE_RULES);
    let router = build_router(&dir, rules_path.clone());

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/check",
        json!({"tool_name": "deploy", "args": {"env": "prod"}, "session_id": "s1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"], "APPROVE");
    let approval_id = body["approval_id"].as_str().unwrap().to_string();

    // Reload with a ruleset that no longer has the approve-deploy rule.
    let mut file = std::fs::File::create(&rules_path).unwrap();
    file.write_all(
        br#"
shield_name: test-shield
version: 2
default_verdict: ALLOW
rules: []
"#,
    )
    .unwrap();
    let (status, _) = send_json(&router, "POST", "/api/v1/reload", json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/check-approval",
        json!({"approval_id": approval_id}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "denied");
    assert_eq!(body["responder"], "__rule_removed__");
}

#[tokio::test]
async fn hot_reload_via_http_changes_live_behavior() {
    let dir = TempDir::new().unwrap();
    let rules_path = write_rules(
        &dir,
        r#"
shield_name: test-shield
version: 1
default_verdict: ALLOW
rules: []
"#,
    );
    let router = build_router(&dir, rules_path.clone());

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/check",
        json!({"tool_name": "exec", "args": {"command": "ls"}, "session_id": "s1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"], "ALLOW");

    let mut file = std::fs::File::create(&rules_path).unwrap();
    file.write_all(
        br#"
shield_name: test-shield
version: 2
default_verdict: ALLOW
rules:
  - id: block-exec
    when:
      tool: exec
    then: block
    severity: high
    message: "no shell access"
"#,
    )
    .unwrap();

    let (status, body) = send_json(&router, "POST", "/api/v1/reload", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rules_count"], 1);

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/check",
        json!({"tool_name": "exec", "args": {"command": "ls"}, "session_id": "s1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"], "BLOCK");
    assert_eq!(body["rule_id"], "block-exec");
}

#[tokio::test]
async fn honeypot_blocks_even_in_audit_mode() {
    let dir = TempDir::new().unwrap();
    let rules_path = write_rules(
        &dir,
        r#"
shield_name: test-shield
version: 1
default_verdict: ALLOW
rules: []
honeypots:
  - tool: admin_backdoor
"#,
    );
    let mut config = Config::test_config();
    config.rules_path = rules_path.clone();
    config.trace_path = dir.path().join("trace.jsonl");
    config.mode = policyshield::config::ShieldMode::Audit;
    let rule_set = policyshield::rules::load(&rules_path).unwrap();
    let engine = std::sync::Arc::new(Engine::new(rule_set, config).unwrap());
    let router = create_router(AppState { engine }, None);

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/check",
        json!({"tool_name": "admin_backdoor", "args": {}, "session_id": "s1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"], "BLOCK");
    assert_eq!(body["rule_id"], "__honeypot__");
}

#[tokio::test]
async fn constraints_summary_describes_rules_but_hides_honeypots() {
    let dir = TempDir::new().unwrap();
    let rules_path = write_rules(
        &dir,
        r#"
shield_name: test-shield
version: 1
default_verdict: ALLOW
rules:
  - id: block-exec
    when:
      tool: exec
    then: block
    severity: high
    message: "no shell access"
honeypots:
  - tool: admin_backdoor
"#,
    );
    let router = build_router(&dir, rules_path);

    let (status, body) = get_json(&router, "/api/v1/constraints").await;
    assert_eq!(status, StatusCode::OK);
    let summary = body["summary"].as_str().unwrap();
    assert!(summary.contains("exec"));
    assert!(!summary.contains("admin_backdoor"));
}

#[tokio::test]
async fn check_redact_scenario_reports_pii_types_on_wire() {
    let dir = TempDir::new().unwrap();
    let rules_path = write_rules(
        &dir,
        r#"
shield_name: test-shield
version: 1
default_verdict: ALLOW
rules:
  - id: redact-email
    when:
      tool: send_email
    then: redact
    severity: medium
    message: "pii redacted"
"#,
    );
    let router = build_router(&dir, rules_path);

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/check",
        json!({
            "tool_name": "send_email",
            "args": {"to": "secret@company.com", "body": "Hello"},
            "session_id": "s1"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"], "REDACT");
    assert_eq!(body["pii_types"], json!(["EMAIL"]));
    assert!(body.get("pii_matches").is_none());
    assert!(!body["modified_args"]["to"].as_str().unwrap().contains("secret@company.com"));
}

#[tokio::test]
async fn reload_with_invalid_rules_returns_4xx_and_keeps_old_ruleset() {
    let dir = TempDir::new().unwrap();
    let rules_path = write_rules(
        &dir,
        r#"
shield_name: test-shield
version: 1
default_verdict: ALLOW
rules: []
"#,
    );
    let router = build_router(&dir, rules_path.clone());

    let mut file = std::fs::File::create(&rules_path).unwrap();
    file.write_all(b"not: [valid, yaml: structure").unwrap();

    let (status, body) = send_json(&router, "POST", "/api/v1/reload", json!({})).await;
    assert!(status.is_client_error(), "expected 4xx, got {status}");
    assert!(body.get("error").is_some());

    let (status, body) = send_json(
        &router,
        "POST",
        "/api/v1/check",
        json!({"tool_name": "exec", "args": {}, "session_id": "s1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verdict"], "ALLOW");
}

#[tokio::test]
async fn bearer_auth_rejects_missing_token() {
    let dir = TempDir::new().unwrap();
    let rules_path = write_rules(
        &dir,
        r#"
shield_name: test-shield
version: 1
default_verdict: ALLOW
rules: []
"#,
    );
    let mut config = Config::test_config();
    config.rules_path = rules_path.clone();
    config.trace_path = dir.path().join("trace.jsonl");
    let rule_set = policyshield::rules::load(&rules_path).unwrap();
    let engine = std::sync::Arc::new(Engine::new(rule_set, config).unwrap());
    let auth_state = std::sync::Arc::new(policyshield::auth::auth_middleware::AuthState {
        api_token: Some("secret".to_string()),
    });
    let router = create_router(AppState { engine }, Some(auth_state));

    let (status, _) = send_json(
        &router,
        "POST",
        "/api/v1/check",
        json!({"tool_name": "read_file", "args": {}, "session_id": "s1"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // /api/v1/health bypasses auth.
    let (status, _) = get_json(&router, "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
}
