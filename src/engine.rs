// Decision engine: the top-level `check`/`post_check` pipeline (spec 4.5).

use crate::approval::ApprovalStore;
use crate::config::{Config, FailMode, ShieldMode};
use crate::core::errors::ShieldError;
use crate::core::models::{
    now, ApprovalStatus, DefaultVerdict, PiiMatch, PiiType, Rule, RuleAction, RuleSet,
    SessionEvent, ShieldResult, TaintTrigger, Verdict, DEFAULT_DENY_RULE_ID, ERROR_RULE_ID,
    HONEYPOT_RULE_ID, KILLSWITCH_RULE_ID, SANITIZER_RULE_ID,
};
use crate::matcher;
use crate::pii::PiiDetector;
use crate::sanitizer;
use crate::session::{rate_limit_exceeded, SessionTable};
use crate::trace::{hash_args, TraceRecord, TraceRecorder};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// The single value owning all PolicyShield state: ruleset pointer, session
/// table, approval store, trace buffer, kill-switch flag. One `Engine` is
/// created at startup and shared (via `Arc`) across request handlers.
pub struct Engine {
    ruleset: RwLock<Arc<RuleSet>>,
    sessions: SessionTable,
    approvals: ApprovalStore,
    trace: TraceRecorder,
    killed: AtomicBool,
    kill_reason: RwLock<Option<String>>,
    pub config: Config,
}

impl Engine {
    pub fn new(rule_set: RuleSet, config: Config) -> std::io::Result<Self> {
        let trace = TraceRecorder::open(&config.trace_path, config.trace_flush_threshold)?;
        Ok(Self {
            ruleset: RwLock::new(Arc::new(rule_set)),
            sessions: SessionTable::new(config.ring_buffer_capacity, config.session_ttl_secs),
            approvals: ApprovalStore::new(config.approval_max_age_secs),
            trace,
            killed: AtomicBool::new(false),
            kill_reason: RwLock::new(None),
            config,
        })
    }

    pub fn ruleset(&self) -> Arc<RuleSet> {
        self.ruleset.read().unwrap().clone()
    }

    /// Atomically swaps in a newly loaded RuleSet. In-flight requests observe
    /// either the old or the new set, never a mix.
    pub fn reload(&self, rule_set: RuleSet) {
        let mut guard = self.ruleset.write().unwrap();
        *guard = Arc::new(rule_set);
    }

    pub fn kill(&self, reason: String) {
        *self.kill_reason.write().unwrap() = Some(reason);
        self.killed.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.killed.store(false, Ordering::SeqCst);
        *self.kill_reason.write().unwrap() = None;
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn approvals(&self) -> &ApprovalStore {
        &self.approvals
    }

    /// Polls an approval against the live ruleset. If the rule it was
    /// created under has since been dropped by a hot-reload, a still-pending
    /// approval collapses to `Denied` (spec: rule removal collapses a
    /// pending approval to BLOCK) rather than hanging forever.
    pub fn poll_approval(
        &self,
        approval_id: &str,
    ) -> Result<crate::core::models::PendingApproval, crate::core::errors::ApprovalError> {
        let rule_set = self.ruleset();
        self.approvals
            .poll_checking_rule(approval_id, |rule_id| rule_set.rule_by_id(rule_id).is_some())
    }

    pub fn clear_session_taint(&self, session_id: &str) {
        self.sessions.evict_idle();
        self.sessions.clear_taint(session_id);
    }

    pub fn flush_trace(&self) {
        self.trace.flush();
    }

    /// The top-level `check(tool_name, args, session_id, sender)` pipeline.
    ///
    /// Evaluation is run behind `catch_unwind`: an unexpected panic deep in
    /// the pipeline (a poisoned lock, a malformed snapshot) is a
    /// `DecisionError` per spec §7, not a crashed request. The startup-time
    /// `fail_mode` decides whether that failure synthesizes BLOCK
    /// (`__error__`, fail-closed) or ALLOW with a warning log (fail-open).
    pub fn check(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        session_id: &str,
    ) -> Result<ShieldResult, ShieldError> {
        match catch_unwind(AssertUnwindSafe(|| self.check_impl(tool_name, &args, session_id))) {
            Ok(result) => Ok(result),
            Err(panic) => {
                let detail = panic_message(&panic);
                tracing::error!(tool = %tool_name, session_id = %session_id, error = %detail, "decision engine panicked; applying fail_mode");
                let result = match self.config.fail_mode {
                    FailMode::Closed => ShieldResult {
                        verdict: Verdict::Block,
                        rule_id: ERROR_RULE_ID.to_string(),
                        message: format!("internal error, failing closed: {detail}"),
                        modified_args: None,
                        approval_id: None,
                        pii_matches: vec![],
                    },
                    FailMode::Open => {
                        tracing::warn!(tool = %tool_name, "internal error, failing open per configured fail_mode");
                        ShieldResult {
                            verdict: Verdict::Allow,
                            rule_id: ERROR_RULE_ID.to_string(),
                            message: format!("internal error, failing open: {detail}"),
                            modified_args: None,
                            approval_id: None,
                            pii_matches: vec![],
                        }
                    }
                };
                self.trace_result(tool_name, &args, session_id, &result);
                Ok(result)
            }
        }
    }

    fn check_impl(&self, tool_name: &str, args: &serde_json::Value, session_id: &str) -> ShieldResult {
        if self.config.mode == ShieldMode::Disabled {
            let result = ShieldResult {
                verdict: Verdict::Allow,
                rule_id: "__disabled__".to_string(),
                message: "shield disabled".to_string(),
                modified_args: None,
                approval_id: None,
                pii_matches: vec![],
            };
            self.trace_result(tool_name, args, session_id, &result);
            return result;
        }

        let rule_set = self.ruleset();
        let session_lock = self.sessions.get_or_create(session_id);
        let pii = PiiDetector::new(&rule_set.pii_patterns);

        // 1. kill switch
        if self.is_killed() {
            let reason = self
                .kill_reason
                .read()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "kill switch engaged".to_string());
            let result = ShieldResult {
                verdict: Verdict::Block,
                rule_id: KILLSWITCH_RULE_ID.to_string(),
                message: format!("kill switch engaged: {reason}"),
                modified_args: None,
                approval_id: None,
                pii_matches: vec![],
            };
            self.trace_result(tool_name, args, session_id, &result);
            return result;
        }

        // 2. honeypot check (bypasses AUDIT)
        if rule_set
            .honeypots
            .iter()
            .any(|h| matches_honeypot(&h.tool, tool_name))
        {
            let result = ShieldResult {
                verdict: Verdict::Block,
                rule_id: HONEYPOT_RULE_ID.to_string(),
                message: "honeypot tool invoked".to_string(),
                modified_args: None,
                approval_id: None,
                pii_matches: vec![],
            };
            self.trace_result(tool_name, args, session_id, &result);
            return result;
        }

        // 3. sanitizer (AUDIT may downgrade; a ruleset may opt out entirely)
        if rule_set.sanitizer_enabled {
            if let Some(hit) = sanitizer::scan(args) {
                let mut result = ShieldResult {
                    verdict: Verdict::Block,
                    rule_id: SANITIZER_RULE_ID.to_string(),
                    message: hit.message().to_string(),
                    modified_args: None,
                    approval_id: None,
                    pii_matches: vec![],
                };
                if self.config.mode == ShieldMode::Audit {
                    result.verdict = Verdict::Allow;
                }
                self.trace_result(tool_name, args, session_id, &result);
                return result;
            }
        }

        // 4. matcher
        let matched_rule = {
            let session = session_lock.lock().unwrap();
            matcher::find_matching_rule(&rule_set.rules, tool_name, args, &session, &pii).cloned()
        };

        let mut result = match matched_rule {
            None => self.apply_default(&rule_set, &session_lock, tool_name),
            Some(rule) => self.apply_rule(&rule, &rule_set, tool_name, args, session_id, &session_lock, &pii),
        };

        // AUDIT-mode rewrite, unless kill switch/honeypot (already returned above)
        if self.config.mode == ShieldMode::Audit
            && matches!(result.verdict, Verdict::Block | Verdict::Redact)
        {
            result.verdict = Verdict::Allow;
            result.modified_args = None;
        }

        self.record_event(&session_lock, tool_name, result.verdict);
        self.trace_result(tool_name, args, session_id, &result);
        result
    }

    fn apply_default(
        &self,
        rule_set: &RuleSet,
        session_lock: &Arc<std::sync::Mutex<crate::core::models::Session>>,
        _tool_name: &str,
    ) -> ShieldResult {
        let verdict = rule_set.default_verdict.as_verdict();
        if verdict == Verdict::Allow {
            session_lock.lock().unwrap().counter += 1;
        }
        ShieldResult {
            verdict,
            rule_id: DEFAULT_DENY_RULE_ID.to_string(),
            message: "no rule matched; applying default verdict".to_string(),
            modified_args: None,
            approval_id: None,
            pii_matches: vec![],
        }
    }

    fn apply_rule(
        &self,
        rule: &Rule,
        rule_set: &RuleSet,
        tool_name: &str,
        args: &serde_json::Value,
        session_id: &str,
        session_lock: &Arc<std::sync::Mutex<crate::core::models::Session>>,
        pii: &PiiDetector,
    ) -> ShieldResult {
        let mut result = match rule.then {
            RuleAction::Allow => {
                session_lock.lock().unwrap().counter += 1;
                ShieldResult {
                    verdict: Verdict::Allow,
                    rule_id: rule.id.clone(),
                    message: rule.message.clone(),
                    modified_args: None,
                    approval_id: None,
                    pii_matches: vec![],
                }
            }
            RuleAction::Block => ShieldResult {
                verdict: Verdict::Block,
                rule_id: rule.id.clone(),
                message: rule.message.clone(),
                modified_args: None,
                approval_id: None,
                pii_matches: vec![],
            },
            RuleAction::Redact => {
                let pii_matches = pii.scan_dict(args);
                let modified = pii.redact_dict(args);
                session_lock.lock().unwrap().counter += 1;
                ShieldResult {
                    verdict: Verdict::Redact,
                    rule_id: rule.id.clone(),
                    message: rule.message.clone(),
                    modified_args: Some(modified),
                    approval_id: None,
                    pii_matches,
                }
            }
            RuleAction::Approve => {
                let strategy = rule.approval_strategy.unwrap_or(crate::core::models::ApprovalStrategy::Once);
                let approval_id = self.approvals.create(&rule.id, tool_name, args.clone(), session_id, strategy);
                let status = self.approvals.poll(&approval_id).ok().map(|a| a.status);
                let verdict = match status {
                    Some(ApprovalStatus::Approved) => Verdict::Allow,
                    Some(ApprovalStatus::Denied) => Verdict::Block,
                    _ => Verdict::Approve,
                };
                if verdict == Verdict::Allow {
                    session_lock.lock().unwrap().counter += 1;
                }
                ShieldResult {
                    verdict,
                    rule_id: rule.id.clone(),
                    message: rule.message.clone(),
                    modified_args: None,
                    approval_id: Some(approval_id),
                    pii_matches: vec![],
                }
            }
        };

        // taint_chain propagation is handled in post_check; here we only
        // apply the rate-limit override, which takes priority over the
        // rule's own verdict (spec §9 open question: rate limit wins).
        // Looked up from the ruleset's derived `rate_limits` index (the
        // canonical source) rather than `rule.rate_limit` directly.
        if let Some(rate_limit) = rule_set.rate_limits.get(&rule.id) {
            let mut session = session_lock.lock().unwrap();
            let counted_before = result.verdict == Verdict::Allow || result.verdict == Verdict::Redact;
            if counted_before
                && rate_limit_exceeded(&mut session, &rule.id, rate_limit.max_calls, rate_limit.window_seconds)
            {
                session.counter -= 1;
                result.verdict = Verdict::Block;
                result.modified_args = None;
                result.message = format!("rate limit exceeded for rule '{}'", rule.id);
            }
        }

        result
    }

    fn record_event(&self, session_lock: &Arc<std::sync::Mutex<crate::core::models::Session>>, tool_name: &str, verdict: Verdict) {
        let mut session = session_lock.lock().unwrap();
        session.last_seen = now();
        session.push_event(SessionEvent {
            timestamp: now(),
            tool: tool_name.to_string(),
            verdict,
        });
    }

    fn trace_result(&self, tool_name: &str, args: &serde_json::Value, session_id: &str, result: &ShieldResult) {
        self.trace.record(&TraceRecord {
            ts: now(),
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            verdict: result.verdict,
            rule_id: result.rule_id.clone(),
            pii_types: result.pii_matches.iter().map(|m| m.pii_type.clone()).collect(),
            message: result.message.clone(),
            args_hash: hash_args(args),
        });
    }

    /// `post_check(tool_name, args, result, session_id)`: scans a tool
    /// output for PII, returns `{pii_types, redacted_output}`, and unions
    /// detected types into the session's tainted-PII set when the matched
    /// rule had `taint_chain` enabled.
    pub fn post_check(
        &self,
        tool_name: &str,
        result_value: &serde_json::Value,
        session_id: &str,
        matched_rule_id: Option<&str>,
    ) -> (Vec<PiiType>, serde_json::Value) {
        let rule_set = self.ruleset();
        let pii = PiiDetector::new(&rule_set.pii_patterns);

        let truncated = truncate_value(result_value, self.config.post_check_truncate_bytes);
        let matches = pii.scan_dict(&truncated);
        let redacted = pii.redact_dict(&truncated);
        let types: Vec<PiiType> = matches.into_iter().map(|m| m.pii_type).collect();

        if let Some(rule_id) = matched_rule_id {
            if let Some(rule) = rule_set.rule_by_id(rule_id) {
                if let Some(taint_chain) = &rule.taint_chain {
                    let applies = matches!(taint_chain.on, TaintTrigger::Redact | TaintTrigger::Block);
                    if applies {
                        let session_lock = self.sessions.get_or_create(session_id);
                        let mut session = session_lock.lock().unwrap();
                        for t in &types {
                            if taint_chain.types.contains(t) {
                                session.taint.insert(t.clone());
                            }
                        }
                    }
                }
            }
        }

        let _ = tool_name;
        (types, redacted)
    }
}

/// Extracts a loggable string from a caught panic payload without leaking
/// argument contents (the payload is the panic message, not the request).
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Renders a ruleset as a short plain-English digest, e.g. for folding into
/// an agent's own system prompt so it can self-police before calling a
/// tool. Honeypot entries are intentionally omitted: describing them would
/// tell a malicious agent exactly which tool names are being watched.
pub fn summarize_constraints(rule_set: &RuleSet) -> String {
    let mut lines = vec![format!(
        "Shield '{}' (v{}): {} rule(s), default verdict when nothing matches is {:?}.",
        rule_set.shield_name,
        rule_set.version,
        rule_set.rules.len(),
        rule_set.default_verdict,
    )];
    for rule in &rule_set.rules {
        let tools = match &rule.when.tool {
            crate::core::models::ToolMatcher::Single(t) => t.clone(),
            crate::core::models::ToolMatcher::List(ts) => ts.join(", "),
        };
        lines.push(format!(
            "- {tools}: {:?} ({:?}) — {}",
            rule.then, rule.severity, rule.message
        ));
    }
    lines.join("\n")
}

fn matches_honeypot(pattern: &str, tool_name: &str) -> bool {
    if pattern.contains('*') {
        crate::matcher::glob_match(pattern, tool_name)
    } else {
        pattern == tool_name
    }
}

fn truncate_value(value: &serde_json::Value, max_bytes: usize) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) if s.len() > max_bytes => {
            serde_json::Value::String(s.chars().take(max_bytes).collect())
        }
        other => other.clone(),
    }
}
