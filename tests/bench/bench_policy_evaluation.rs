// Performance benchmarks for the decision engine's hot path.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use policyshield::config::Config;
use policyshield::core::models::{
    DefaultVerdict, Rule, RuleAction, RuleSet, RuleWhen, Severity, ToolMatcher,
};
use policyshield::engine::Engine;
use std::collections::HashMap;
use tempfile::TempDir;

fn build_engine(dir: &TempDir) -> Engine {
    let mut config = Config::test_config();
    config.trace_path = dir.path().join("trace.jsonl");
    let rule_set = RuleSet {
        shield_name: "bench".to_string(),
        version: 1,
        default_verdict: DefaultVerdict::Allow,
        rules: vec![Rule {
            id: "block-exec".to_string(),
            when: RuleWhen {
                tool: ToolMatcher::Single("exec".to_string()),
                args: HashMap::new(),
                chain: None,
                session_has_taint: Vec::new(),
            },
            then: RuleAction::Block,
            severity: Severity::High,
            message: "no shell access".to_string(),
            approval_strategy: None,
            rate_limit: None,
            taint_chain: None,
        }],
        honeypots: vec![],
        pii_patterns: HashMap::new(),
        sanitizer_enabled: true,
        rate_limits: HashMap::new(),
        rules_hash: "bench".to_string(),
    };
    Engine::new(rule_set, config).unwrap()
}

fn bench_check(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let engine = build_engine(&dir);

    c.bench_function("check_allow_default", |b| {
        b.iter(|| {
            engine
                .check(black_box("read_file"), black_box(serde_json::json!({"path": "a.txt"})), black_box("s1"))
                .unwrap();
        });
    });

    c.bench_function("check_block_matched_rule", |b| {
        b.iter(|| {
            engine
                .check(black_box("exec"), black_box(serde_json::json!({"command": "ls"})), black_box("s1"))
                .unwrap();
        });
    });
}

criterion_group!(benches, bench_check);
criterion_main!(benches);
