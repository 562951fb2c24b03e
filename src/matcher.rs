// Matcher engine: tool-name matching, arg predicate evaluation, chain conditions.

use crate::core::models::{ArgPredicate, ChainCondition, Rule, Session, ToolMatcher};
use crate::pii::PiiDetector;
use regex::Regex;
use serde_json::Value;

/// Iterates `rules` in declared order and returns the first whose `when`
/// clause matches. Ordering is a contract the rule author controls; there
/// are no tie-breaks because only the first match is ever returned.
pub fn find_matching_rule<'a>(
    rules: &'a [Rule],
    tool_name: &str,
    args: &Value,
    session: &Session,
    pii: &PiiDetector,
) -> Option<&'a Rule> {
    rules.iter().find(|rule| rule_matches(rule, tool_name, args, session, pii))
}

fn rule_matches(rule: &Rule, tool_name: &str, args: &Value, session: &Session, pii: &PiiDetector) -> bool {
    if !tool_matches(&rule.when.tool, tool_name) {
        return false;
    }
    if !rule
        .when
        .args
        .iter()
        .all(|(field, predicate)| arg_matches(predicate, args.get(field), pii))
    {
        return false;
    }
    if let Some(chain) = &rule.when.chain {
        if !chain_matches(chain, session) {
            return false;
        }
    }
    if !rule
        .when
        .session_has_taint
        .iter()
        .all(|t| session.has_taint(t))
    {
        return false;
    }
    true
}

fn tool_matches(matcher: &ToolMatcher, tool_name: &str) -> bool {
    match matcher {
        ToolMatcher::Single(pattern) => name_matches_pattern(pattern, tool_name),
        ToolMatcher::List(patterns) => patterns.iter().any(|p| name_matches_pattern(p, tool_name)),
    }
}

fn name_matches_pattern(pattern: &str, name: &str) -> bool {
    if pattern.contains('*') {
        glob_match(pattern, name)
    } else {
        pattern == name
    }
}

/// Minimal `*`-wildcard glob matcher (no `?` or character classes; the
/// patterns here are tool-name globs, not filesystem globs).
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut cursor = 0usize;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text[cursor..].starts_with(part) {
                return false;
            }
            cursor += part.len();
        } else if i == parts.len() - 1 {
            if !text[cursor..].ends_with(part) {
                return false;
            }
        } else {
            match text[cursor..].find(part) {
                Some(pos) => cursor += pos + part.len(),
                None => return false,
            }
        }
    }
    true
}

fn arg_matches(predicate: &ArgPredicate, value: Option<&Value>, pii: &PiiDetector) -> bool {
    match predicate {
        ArgPredicate::Equals(expected) => value == Some(expected),
        ArgPredicate::Contains(needle) => value
            .and_then(Value::as_str)
            .map(|s| s.contains(needle.as_str()))
            .unwrap_or(false),
        ArgPredicate::Regex(pattern) => {
            let Ok(re) = Regex::new(pattern) else { return false };
            value.and_then(Value::as_str).map(|s| re.is_match(s)).unwrap_or(false)
        }
        ArgPredicate::Glob(pattern) => value
            .and_then(Value::as_str)
            .map(|s| glob_match(pattern, s))
            .unwrap_or(false),
        ArgPredicate::HasPii(expected) => {
            let found = value
                .and_then(Value::as_str)
                .map(|s| !pii.scan(s).is_empty())
                .unwrap_or(false);
            found == *expected
        }
        ArgPredicate::Any(inner) => match value {
            Some(Value::Array(items)) => items.iter().any(|v| arg_matches(inner, Some(v), pii)),
            Some(Value::Object(map)) => map.values().any(|v| arg_matches(inner, Some(v), pii)),
            _ => false,
        },
        ArgPredicate::All(inner) => match value {
            Some(Value::Array(items)) => {
                !items.is_empty() && items.iter().all(|v| arg_matches(inner, Some(v), pii))
            }
            Some(Value::Object(map)) => {
                !map.is_empty() && map.values().all(|v| arg_matches(inner, Some(v), pii))
            }
            _ => false,
        },
    }
}

fn chain_matches(chain: &ChainCondition, session: &Session) -> bool {
    let count = session.find_recent(&chain.tool, chain.within_seconds, chain.verdict);
    count >= chain.min_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{RuleAction, RuleWhen, Severity};
    use std::collections::HashMap;

    fn rule(id: &str, tool: &str) -> Rule {
        Rule {
            id: id.to_string(),
            when: RuleWhen {
                tool: ToolMatcher::Single(tool.to_string()),
                args: HashMap::new(),
                chain: None,
                session_has_taint: Vec::new(),
            },
            then: RuleAction::Block,
            severity: Severity::High,
            message: "blocked".to_string(),
            approval_strategy: None,
            rate_limit: None,
            taint_chain: None,
        }
    }

    #[test]
    fn exact_tool_match() {
        let rules = vec![rule("r1", "exec")];
        let session = Session::new("s".to_string(), 10);
        let pii = PiiDetector::new(&HashMap::new());
        let found = find_matching_rule(&rules, "exec", &serde_json::json!({}), &session, &pii);
        assert!(found.is_some());
    }

    #[test]
    fn glob_tool_match() {
        assert!(glob_match("admin_*", "admin_panel"));
        assert!(!glob_match("admin_*", "user_panel"));
        assert!(glob_match("*_exec", "shell_exec"));
        assert!(glob_match("*mid*", "middleware"));
    }

    #[test]
    fn first_match_wins() {
        let rules = vec![rule("first", "exec"), rule("second", "exec")];
        let session = Session::new("s".to_string(), 10);
        let pii = PiiDetector::new(&HashMap::new());
        let found = find_matching_rule(&rules, "exec", &serde_json::json!({}), &session, &pii);
        assert_eq!(found.unwrap().id, "first");
    }

    #[test]
    fn session_has_taint_predicate_requires_prior_taint() {
        use crate::core::models::PiiType;
        let mut rules = vec![rule("needs-taint", "send_email")];
        rules[0].when.session_has_taint = vec![PiiType::Email];
        let pii = PiiDetector::new(&HashMap::new());
        let clean_session = Session::new("s".to_string(), 10);
        assert!(find_matching_rule(&rules, "send_email", &serde_json::json!({}), &clean_session, &pii).is_none());

        let mut tainted_session = Session::new("s".to_string(), 10);
        tainted_session.taint.insert(PiiType::Email);
        assert!(find_matching_rule(&rules, "send_email", &serde_json::json!({}), &tainted_session, &pii).is_some());
    }

    #[test]
    fn chain_condition_requires_min_count() {
        let mut session = Session::new("s".to_string(), 10);
        use crate::core::models::{SessionEvent, Verdict};
        for _ in 0..3 {
            session.push_event(SessionEvent {
                timestamp: crate::core::models::now(),
                tool: "read_file".to_string(),
                verdict: Verdict::Allow,
            });
        }
        let chain = ChainCondition { tool: "read_file".to_string(), within_seconds: 60, min_count: 3, verdict: None };
        assert!(chain_matches(&chain, &session));
        let chain_too_many = ChainCondition { tool: "read_file".to_string(), within_seconds: 60, min_count: 4, verdict: None };
        assert!(!chain_matches(&chain_too_many, &session));
    }
}
