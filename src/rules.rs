// Rule model loader: YAML parsing with !include and ${ENV_VAR} substitution,
// schema validation, regex compilation, content hashing.

use crate::core::errors::RuleLoadError;
use crate::core::models::{ArgPredicate, RuleSet};
use crate::pii::MAX_PATTERN_LEN;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const ENV_VAR_RE: &str = r"\$\{([A-Z0-9_]+)\}";

/// Loads, resolves includes in, substitutes env vars into, and validates a
/// RuleSet from its root YAML file.
pub fn load<P: AsRef<Path>>(path: P) -> Result<RuleSet, RuleLoadError> {
    let root = path.as_ref();
    let raw = std::fs::read_to_string(root).map_err(|e| RuleLoadError::Io {
        path: root.display().to_string(),
        source: e,
    })?;

    let substituted = substitute_env_vars(&raw);

    let mut value: serde_yaml::Value =
        serde_yaml::from_str(&substituted).map_err(|e| RuleLoadError::Parse {
            path: root.display().to_string(),
            line: e.location().map(|l| l.line()).unwrap_or(0),
            source: e,
        })?;

    let base_dir = root.parent().unwrap_or_else(|| Path::new("."));
    resolve_includes(&mut value, base_dir)?;

    let mut rule_set: RuleSet =
        serde_yaml::from_value(value).map_err(|e| RuleLoadError::Parse {
            path: root.display().to_string(),
            line: e.location().map(|l| l.line()).unwrap_or(0),
            source: e,
        })?;

    validate(&rule_set, &root.display().to_string())?;
    rule_set.rate_limits = rule_set
        .rules
        .iter()
        .filter_map(|r| r.rate_limit.clone().map(|rl| (r.id.clone(), rl)))
        .collect();
    rule_set.rules_hash = content_hash(&rule_set);

    Ok(rule_set)
}

fn substitute_env_vars(text: &str) -> String {
    let re = Regex::new(ENV_VAR_RE).unwrap();
    re.replace_all(text, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

/// Recursively walks a parsed YAML value, replacing any `!include <path>`
/// tagged scalar with the parsed contents of that sibling file.
fn resolve_includes(value: &mut serde_yaml::Value, base_dir: &Path) -> Result<(), RuleLoadError> {
    match value {
        serde_yaml::Value::Tagged(tagged) => {
            if tagged.tag == serde_yaml::Tag::new("!include") {
                let include_path = tagged
                    .value
                    .as_str()
                    .ok_or_else(|| RuleLoadError::Include {
                        path: base_dir.display().to_string(),
                        message: "!include target must be a string path".to_string(),
                    })?;
                let full_path: PathBuf = base_dir.join(include_path);
                let raw = std::fs::read_to_string(&full_path).map_err(|_| RuleLoadError::Include {
                    path: full_path.display().to_string(),
                    message: "included file not found".to_string(),
                })?;
                let substituted = substitute_env_vars(&raw);
                let mut included: serde_yaml::Value =
                    serde_yaml::from_str(&substituted).map_err(|e| RuleLoadError::Include {
                        path: full_path.display().to_string(),
                        message: e.to_string(),
                    })?;
                resolve_includes(&mut included, full_path.parent().unwrap_or(base_dir))?;
                *value = included;
            } else {
                resolve_includes(&mut tagged.value, base_dir)?;
            }
        }
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                resolve_includes(item, base_dir)?;
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                resolve_includes(v, base_dir)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate(rule_set: &RuleSet, path: &str) -> Result<(), RuleLoadError> {
    let mut seen_ids = HashSet::new();
    for rule in &rule_set.rules {
        if !seen_ids.insert(rule.id.clone()) {
            return Err(RuleLoadError::Validation {
                path: path.to_string(),
                message: format!("duplicate rule id '{}'", rule.id),
            });
        }

        validate_args(&rule.when.args, path)?;

        if let Some(chain) = &rule.when.chain {
            if chain.min_count == 0 {
                return Err(RuleLoadError::Validation {
                    path: path.to_string(),
                    message: format!("rule '{}': chain.min_count must be >= 1", rule.id),
                });
            }
        }

        if rule.then == crate::core::models::RuleAction::Approve
            && rule.approval_strategy.is_none()
        {
            return Err(RuleLoadError::Validation {
                path: path.to_string(),
                message: format!("rule '{}': then=approve requires approval_strategy", rule.id),
            });
        }
    }

    for (name, pattern) in &rule_set.pii_patterns {
        compile_bounded(pattern).map_err(|e| RuleLoadError::Pattern {
            path: path.to_string(),
            message: format!("custom pattern '{name}': {e}"),
        })?;
    }

    Ok(())
}

fn validate_args(
    args: &std::collections::HashMap<String, ArgPredicate>,
    path: &str,
) -> Result<(), RuleLoadError> {
    for (field, predicate) in args {
        validate_predicate(field, predicate, path)?;
    }
    Ok(())
}

fn validate_predicate(field: &str, predicate: &ArgPredicate, path: &str) -> Result<(), RuleLoadError> {
    match predicate {
        ArgPredicate::Regex(pattern) => {
            compile_bounded(pattern).map_err(|e| RuleLoadError::Pattern {
                path: path.to_string(),
                message: format!("field '{field}': {e}"),
            })?;
        }
        ArgPredicate::Any(inner) | ArgPredicate::All(inner) => {
            validate_predicate(field, inner, path)?;
        }
        _ => {}
    }
    Ok(())
}

fn compile_bounded(pattern: &str) -> Result<Regex, String> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(format!(
            "pattern length {} exceeds max {}",
            pattern.len(),
            MAX_PATTERN_LEN
        ));
    }
    Regex::new(pattern).map_err(|e| e.to_string())
}

/// Stable hex digest over the canonicalized YAML, used by `/health` to
/// signal whether a reload changed anything. `RuleSet` carries `HashMap`
/// fields (`pii_patterns`, each rule's `when.args`) whose iteration order is
/// not stable across instances, so we serialize through `serde_json::Value`
/// first: its `Map` is `BTreeMap`-backed (we don't enable serde_json's
/// `preserve_order` feature), which sorts object keys on insert regardless
/// of the source map's iteration order.
fn content_hash(rule_set: &RuleSet) -> String {
    let mut hashable = rule_set.clone();
    hashable.rules_hash = String::new();
    let canonical_value = serde_json::to_value(&hashable).unwrap_or(serde_json::Value::Null);
    let canonical = serde_json::to_vec(&canonical_value).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    hex::encode(digest)
}
