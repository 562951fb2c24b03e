// Built-in sanitizer detectors: path traversal, shell/SQL injection, SSRF, URL schemes.
//
// Runs unconditionally before rule matching. A trip always yields
// rule_id = "__sanitizer__"; AUDIT-mode downgrade is applied by the caller
// (the decision engine), not here.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PATH_HINT_KEYS: &[&str] = &["path", "file", "filename", "filepath", "dir", "directory"];
static URL_HINT_KEYS: &[&str] = &["url", "uri", "endpoint", "href", "link"];
static COMMAND_HINT_KEYS: &[&str] = &["command", "cmd", "args", "argv", "shell", "script"];

static SQL_INJECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(union\s+select|drop\s+table)\b|--|/\*").unwrap()
});

static SHELL_META: Lazy<Regex> = Lazy::new(|| Regex::new(r";|&&|\|\||`|\$\(").unwrap());

static PRIVATE_IP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(127\.|10\.|169\.254\.|192\.168\.|172\.(1[6-9]|2\d|3[01])\.)").unwrap()
});

const RISKY_SCHEMES: &[&str] = &["file://", "gopher://", "dict://", "ftp://"];
const SSRF_METADATA_HOSTS: &[&str] = &["169.254.169.254", "metadata.google.internal"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizerHit {
    PathTraversal,
    ShellInjection,
    SqlInjection,
    Ssrf,
    RiskyUrlScheme,
}

impl SanitizerHit {
    pub fn message(&self) -> &'static str {
        match self {
            SanitizerHit::PathTraversal => "path traversal sequence detected",
            SanitizerHit::ShellInjection => "shell metacharacter detected in command-like argument",
            SanitizerHit::SqlInjection => "SQL injection token detected",
            SanitizerHit::Ssrf => "request targets a private or link-local address",
            SanitizerHit::RiskyUrlScheme => "URL uses a disallowed scheme",
        }
    }
}

fn key_hints(key: &str, hints: &[&str]) -> bool {
    let lower = key.to_lowercase();
    hints.iter().any(|h| lower.contains(h))
}

/// Scans a tool call's arguments for the built-in attack patterns. Returns
/// the first hit found (order: path traversal, shell injection, SQL
/// injection, SSRF, risky URL scheme), or `None` if clean.
pub fn scan(args: &Value) -> Option<SanitizerHit> {
    scan_value(args, "")
}

fn scan_value(value: &Value, key: &str) -> Option<SanitizerHit> {
    match value {
        Value::String(s) => scan_string(key, s),
        Value::Array(items) => items.iter().find_map(|v| scan_value(v, key)),
        Value::Object(map) => map.iter().find_map(|(k, v)| scan_value(v, k)),
        _ => None,
    }
}

fn scan_string(key: &str, s: &str) -> Option<SanitizerHit> {
    if key_hints(key, PATH_HINT_KEYS) && s.contains("..") {
        return Some(SanitizerHit::PathTraversal);
    }
    if key_hints(key, COMMAND_HINT_KEYS) && SHELL_META.is_match(s) {
        return Some(SanitizerHit::ShellInjection);
    }
    if SQL_INJECTION.is_match(s) {
        return Some(SanitizerHit::SqlInjection);
    }
    if key_hints(key, URL_HINT_KEYS) {
        if PRIVATE_IP.is_match(s) || SSRF_METADATA_HOSTS.iter().any(|h| s.contains(h)) {
            return Some(SanitizerHit::Ssrf);
        }
        if RISKY_SCHEMES.iter().any(|scheme| s.starts_with(scheme)) {
            return Some(SanitizerHit::RiskyUrlScheme);
        }
    }
    None
}
