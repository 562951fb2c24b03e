// Cross-module unit tests exercising behavior that spans more than one file
// (most single-module behavior is covered by each module's own
// `#[cfg(test)]` block).

use policyshield::config::{Config, ShieldMode};
use policyshield::core::models::{
    DefaultVerdict, PiiType, RateLimit, Rule, RuleAction, RuleSet, RuleWhen, Severity, ToolMatcher,
    Verdict,
};
use policyshield::engine::Engine;
use std::collections::HashMap;
use tempfile::TempDir;

fn engine_with(rules: Vec<Rule>, mode: ShieldMode) -> (Engine, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut config = Config::test_config();
    config.trace_path = dir.path().join("trace.jsonl");
    config.mode = mode;
    let rate_limits = rules
        .iter()
        .filter_map(|r| r.rate_limit.clone().map(|rl| (r.id.clone(), rl)))
        .collect();
    let rule_set = RuleSet {
        shield_name: "test".to_string(),
        version: 1,
        default_verdict: DefaultVerdict::Allow,
        rules,
        honeypots: vec![],
        pii_patterns: HashMap::new(),
        sanitizer_enabled: true,
        rate_limits,
        rules_hash: "h".to_string(),
    };
    (Engine::new(rule_set, config).unwrap(), dir)
}

fn redact_rule(id: &str, tool: &str) -> Rule {
    Rule {
        id: id.to_string(),
        when: RuleWhen { tool: ToolMatcher::Single(tool.to_string()), args: HashMap::new(), chain: None, session_has_taint: Vec::new() },
        then: RuleAction::Redact,
        severity: Severity::Medium,
        message: "pii redacted".to_string(),
        approval_strategy: None,
        rate_limit: None,
        taint_chain: None,
    }
}

/// Scenario 2: a REDACT rule scrubs PII from args and returns modified_args.
#[test]
fn redact_scenario_scrubs_pii_through_full_pipeline() {
    let (engine, _dir) = engine_with(vec![redact_rule("redact-email", "send_email")], ShieldMode::Enforce);
    let result = engine
        .check("send_email", serde_json::json!({"body": "contact me at jane@example.com"}), "s1")
        .unwrap();
    assert_eq!(result.verdict, Verdict::Redact);
    assert!(result.pii_matches.iter().any(|m| m.pii_type == PiiType::Email));
    let modified = result.modified_args.unwrap();
    assert!(!modified["body"].as_str().unwrap().contains("jane@example.com"));
}

/// AUDIT mode downgrades a REDACT verdict to ALLOW and drops modified_args,
/// but the PII matches are still reported for observability.
#[test]
fn audit_mode_downgrades_redact_to_allow() {
    let (engine, _dir) = engine_with(vec![redact_rule("redact-email", "send_email")], ShieldMode::Audit);
    let result = engine
        .check("send_email", serde_json::json!({"body": "jane@example.com"}), "s1")
        .unwrap();
    assert_eq!(result.verdict, Verdict::Allow);
    assert!(result.modified_args.is_none());
}

/// Rate limit overrides even an ALLOW verdict once the window overflows,
/// decrementing the counter that had just been incremented.
#[test]
fn rate_limit_overrides_allow_and_keeps_counter_consistent() {
    let allow_rule = Rule {
        id: "allow-read".to_string(),
        when: RuleWhen { tool: ToolMatcher::Single("read_file".to_string()), args: HashMap::new(), chain: None, session_has_taint: Vec::new() },
        then: RuleAction::Allow,
        severity: Severity::Low,
        message: "ok".to_string(),
        approval_strategy: None,
        rate_limit: Some(RateLimit { max_calls: 1, window_seconds: 60 }),
        taint_chain: None,
    };
    let (engine, _dir) = engine_with(vec![allow_rule], ShieldMode::Enforce);

    let first = engine.check("read_file", serde_json::json!({}), "s1").unwrap();
    assert_eq!(first.verdict, Verdict::Allow);

    let second = engine.check("read_file", serde_json::json!({}), "s1").unwrap();
    assert_eq!(second.verdict, Verdict::Block);
    assert!(second.message.contains("rate limit"));
}

/// A disabled shield allows everything but still traces decisions.
#[test]
fn disabled_mode_allows_everything() {
    let (engine, _dir) = engine_with(vec![redact_rule("r", "send_email")], ShieldMode::Disabled);
    let result = engine.check("send_email", serde_json::json!({"body": "x"}), "s1").unwrap();
    assert_eq!(result.verdict, Verdict::Allow);
    assert_eq!(result.rule_id, "__disabled__");
}
