// Request handlers for PolicyShield's HTTP surface.

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::responses::ApiError;
use crate::api::AppState;
use crate::core::errors::ShieldError;
use crate::core::models::{ApprovalStatus, PiiType, ShieldResult, Verdict};

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub verdict: Verdict,
    pub rule_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_args: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    pub pii_types: Vec<PiiType>,
}

impl From<ShieldResult> for CheckResponse {
    fn from(result: ShieldResult) -> Self {
        let pii_types = result.pii_matches.iter().map(|m| m.pii_type.clone()).collect();
        Self {
            verdict: result.verdict,
            rule_id: result.rule_id,
            message: result.message,
            modified_args: result.modified_args,
            approval_id: result.approval_id,
            pii_types,
        }
    }
}

/// POST /api/v1/check
pub async fn check_handler(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let result = state.engine.check(&req.tool_name, req.args, &req.session_id)?;
    info!(tool = %req.tool_name, session_id = %req.session_id, verdict = result.verdict.as_str(), rule_id = %result.rule_id, "check");
    Ok(Json(result.into()))
}

#[derive(Debug, Deserialize)]
pub struct PostCheckRequest {
    pub tool_name: String,
    pub result: serde_json::Value,
    pub session_id: String,
    #[serde(default)]
    pub rule_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PostCheckResponse {
    pub pii_types: Vec<PiiType>,
    pub redacted_output: serde_json::Value,
}

/// POST /api/v1/post-check
pub async fn post_check_handler(
    State(state): State<AppState>,
    Json(req): Json<PostCheckRequest>,
) -> Result<Json<PostCheckResponse>, ApiError> {
    let (pii_types, redacted_output) = state.engine.post_check(
        &req.tool_name,
        &req.result,
        &req.session_id,
        req.rule_id.as_deref(),
    );
    Ok(Json(PostCheckResponse { pii_types, redacted_output }))
}

#[derive(Debug, Serialize)]
pub struct ConstraintsResponse {
    pub summary: String,
}

/// GET /api/v1/constraints
///
/// Returns a human-readable digest of the active rules, meant to be folded
/// into an agent's own system prompt so it can self-police before ever
/// calling a tool. Honeypot rules are deliberately never described here.
pub async fn constraints_handler(State(state): State<AppState>) -> Json<ConstraintsResponse> {
    let rule_set = state.engine.ruleset();
    Json(ConstraintsResponse { summary: crate::engine::summarize_constraints(&rule_set) })
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub status: String,
    pub rules_count: usize,
    pub rules_hash: String,
}

/// POST /api/v1/reload
pub async fn reload_handler(State(state): State<AppState>) -> Result<Json<ReloadResponse>, ApiError> {
    let rule_set = crate::rules::load(&state.engine.config.rules_path).map_err(ShieldError::from)?;
    let rules_count = rule_set.rules.len();
    let rules_hash = rule_set.rules_hash.clone();
    state.engine.reload(rule_set);
    info!(rules_count, rules_hash = %rules_hash, "rules reloaded via API");
    Ok(Json(ReloadResponse {
        status: "reloaded".to_string(),
        rules_count,
        rules_hash,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RespondApprovalRequest {
    pub approval_id: String,
    pub approved: bool,
    #[serde(default)]
    pub responder: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RespondApprovalResponse {
    pub status: String,
}

/// POST /api/v1/respond-approval
pub async fn respond_approval_handler(
    State(state): State<AppState>,
    Json(req): Json<RespondApprovalRequest>,
) -> Result<Json<RespondApprovalResponse>, ApiError> {
    state
        .engine
        .approvals()
        .respond(&req.approval_id, req.approved, req.responder)
        .map_err(ShieldError::Approval)?;
    Ok(Json(RespondApprovalResponse {
        status: if req.approved { "approved" } else { "denied" }.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CheckApprovalRequest {
    pub approval_id: String,
}

#[derive(Debug, Serialize)]
pub struct CheckApprovalResponse {
    pub approval_id: String,
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responder: Option<String>,
}

/// POST /api/v1/check-approval
pub async fn check_approval_handler(
    State(state): State<AppState>,
    Json(req): Json<CheckApprovalRequest>,
) -> Result<Json<CheckApprovalResponse>, ApiError> {
    let record = state
        .engine
        .poll_approval(&req.approval_id)
        .map_err(ShieldError::Approval)?;
    Ok(Json(CheckApprovalResponse {
        approval_id: record.approval_id,
        status: record.status,
        responder: record.responder,
    }))
}

/// GET /api/v1/pending-approvals
pub async fn pending_approvals_handler(
    State(state): State<AppState>,
) -> Json<Vec<crate::core::models::PendingApproval>> {
    Json(state.engine.approvals().list_pending())
}

#[derive(Debug, Deserialize)]
pub struct ClearTaintRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct ClearTaintResponse {
    pub status: String,
}

/// POST /api/v1/clear-taint
pub async fn clear_taint_handler(
    State(state): State<AppState>,
    Json(req): Json<ClearTaintRequest>,
) -> Json<ClearTaintResponse> {
    state.engine.clear_session_taint(&req.session_id);
    Json(ClearTaintResponse { status: "cleared".to_string() })
}

#[derive(Debug, Deserialize)]
pub struct KillRequest {
    #[serde(default = "default_kill_reason")]
    pub reason: String,
}

fn default_kill_reason() -> String {
    "manual kill switch".to_string()
}

#[derive(Debug, Serialize)]
pub struct KillSwitchResponse {
    pub status: String,
}

/// POST /admin/kill
pub async fn kill_handler(
    State(state): State<AppState>,
    Json(req): Json<KillRequest>,
) -> Json<KillSwitchResponse> {
    warn!(reason = %req.reason, "kill switch engaged via admin API");
    state.engine.kill(req.reason);
    Json(KillSwitchResponse { status: "killed".to_string() })
}

/// POST /admin/resume
pub async fn resume_handler(State(state): State<AppState>) -> Json<KillSwitchResponse> {
    state.engine.resume();
    info!("kill switch resumed via admin API");
    Json(KillSwitchResponse { status: "resumed".to_string() })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub shield_name: String,
    pub rules_count: usize,
    pub rules_hash: String,
    pub mode: String,
    pub killed: bool,
}

/// GET /api/v1/health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let rule_set = state.engine.ruleset();
    Json(HealthResponse {
        status: "ok",
        shield_name: rule_set.shield_name.clone(),
        rules_count: rule_set.rules.len(),
        rules_hash: rule_set.rules_hash.clone(),
        mode: format!("{:?}", state.engine.config.mode).to_lowercase(),
        killed: state.engine.is_killed(),
    })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub pending_approvals: usize,
}

/// GET /api/v1/status
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running",
        pending_approvals: state.engine.approvals().list_pending().len(),
    })
}

pub type SharedAuthState = Arc<crate::auth::auth_middleware::AuthState>;
