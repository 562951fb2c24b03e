// Core domain types: rules, sessions, approvals, decisions.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

/// The four possible decision outcomes. Wire literals are exactly these
/// variant names (`ALLOW`, `BLOCK`, `REDACT`, `APPROVE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "ALLOW")]
    Allow,
    #[serde(rename = "BLOCK")]
    Block,
    #[serde(rename = "REDACT")]
    Redact,
    #[serde(rename = "APPROVE")]
    Approve,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "ALLOW",
            Verdict::Block => "BLOCK",
            Verdict::Redact => "REDACT",
            Verdict::Approve => "APPROVE",
        }
    }
}

/// Rule severity, informational only (surfaced in traces and `/constraints`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Approval de-duplication strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStrategy {
    Once,
    PerSession,
    PerRule,
    PerTool,
}

/// Built-in PII categories. Custom patterns carry their own type name as a
/// plain string key in `RuleSet::pii_patterns` and are reported the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PiiType {
    Email,
    Phone,
    CreditCard,
    Ssn,
    Iban,
    Ip,
    Passport,
    Dob,
    Inn,
    Snils,
    Custom(String),
}

impl PiiType {
    pub fn as_str(&self) -> &str {
        match self {
            PiiType::Email => "EMAIL",
            PiiType::Phone => "PHONE",
            PiiType::CreditCard => "CREDIT_CARD",
            PiiType::Ssn => "SSN",
            PiiType::Iban => "IBAN",
            PiiType::Ip => "IP",
            PiiType::Passport => "PASSPORT",
            PiiType::Dob => "DOB",
            PiiType::Inn => "INN",
            PiiType::Snils => "SNILS",
            PiiType::Custom(name) => name.as_str(),
        }
    }
}

impl Serialize for PiiType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PiiType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "EMAIL" => PiiType::Email,
            "PHONE" => PiiType::Phone,
            "CREDIT_CARD" => PiiType::CreditCard,
            "SSN" => PiiType::Ssn,
            "IBAN" => PiiType::Iban,
            "IP" => PiiType::Ip,
            "PASSPORT" => PiiType::Passport,
            "DOB" => PiiType::Dob,
            "INN" => PiiType::Inn,
            "SNILS" => PiiType::Snils,
            other => PiiType::Custom(other.to_string()),
        })
    }
}

/// A single PII hit produced by the detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiMatch {
    #[serde(rename = "type")]
    pub pii_type: PiiType,
    pub field: String,
    pub redacted_value: String,
}

/// Predicate applied to one `args` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgPredicate {
    Equals(serde_json::Value),
    Contains(String),
    Regex(String),
    Glob(String),
    HasPii(bool),
    #[serde(rename = "_any")]
    Any(Box<ArgPredicate>),
    #[serde(rename = "_all")]
    All(Box<ArgPredicate>),
}

/// `tool` side of a `when` clause: a single name, a list, or a glob pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolMatcher {
    Single(String),
    List(Vec<String>),
}

/// Temporal predicate over a session's recent event ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainCondition {
    pub tool: String,
    pub within_seconds: u64,
    pub min_count: usize,
    #[serde(default)]
    pub verdict: Option<Verdict>,
}

/// Rate-limit configuration attached to a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_calls: usize,
    pub window_seconds: u64,
}

/// PII-propagation config attached to a rule's `then` branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaintChain {
    pub types: Vec<PiiType>,
    pub on: TaintTrigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaintTrigger {
    Redact,
    Block,
}

/// The action a rule takes once matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Block,
    Redact,
    Approve,
}

/// The `when` clause of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleWhen {
    pub tool: ToolMatcher,
    #[serde(default)]
    pub args: HashMap<String, ArgPredicate>,
    #[serde(default)]
    pub chain: Option<ChainCondition>,
    /// Session-state predicate: matches iff the session's tainted-PII set
    /// (populated by a prior `post_check` with `taint_chain`) already
    /// contains every listed type. The `session.has_taint(type)` hook spec
    /// §4.5 refers to, surfaced as something a rule author can write.
    #[serde(default)]
    pub session_has_taint: Vec<PiiType>,
}

/// A single declarative rule, loaded from YAML in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub id: String,
    pub when: RuleWhen,
    pub then: RuleAction,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub approval_strategy: Option<ApprovalStrategy>,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
    #[serde(default)]
    pub taint_chain: Option<TaintChain>,
}

/// A honeypot entry: a decoy tool-name pattern whose invocation always BLOCKs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Honeypot {
    pub tool: String,
}

/// Default verdict applied when no rule, honeypot, or sanitizer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DefaultVerdict {
    Allow,
    Block,
}

impl DefaultVerdict {
    pub fn as_verdict(&self) -> Verdict {
        match self {
            DefaultVerdict::Allow => Verdict::Allow,
            DefaultVerdict::Block => Verdict::Block,
        }
    }
}

/// The loaded, validated, immutable configuration. Hot-reload swaps the
/// whole `Arc<RuleSet>` atomically; nothing mutates a `RuleSet` in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSet {
    pub shield_name: String,
    pub version: u32,
    pub default_verdict: DefaultVerdict,
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub honeypots: Vec<Honeypot>,
    #[serde(default)]
    pub pii_patterns: HashMap<String, String>,
    /// Opt-out for the built-in sanitizer (path-traversal/shell/SQL/SSRF/URL
    /// scheme detectors). Runs unconditionally unless a ruleset sets this
    /// to `false` (spec §4.3).
    #[serde(default = "default_sanitizer_enabled")]
    pub sanitizer_enabled: bool,
    /// Rule-id-keyed index over each rule's inline `rate_limit`, rebuilt by
    /// the loader after parsing rather than authored separately in YAML.
    #[serde(skip)]
    pub rate_limits: HashMap<String, RateLimit>,
    #[serde(skip)]
    pub rules_hash: String,
}

fn default_sanitizer_enabled() -> bool {
    true
}

impl RuleSet {
    pub fn rule_by_id(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }
}

/// One event in a session's ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub timestamp: f64,
    pub tool: String,
    pub verdict: Verdict,
}

/// Per-session rate-limit sliding window, keyed by rule id.
#[derive(Debug, Default)]
pub struct RateWindow {
    pub timestamps: VecDeque<f64>,
}

/// Mutable per-session state. Guarded by a lock in the session table; see
/// `crate::session`.
#[derive(Debug)]
pub struct Session {
    pub session_id: String,
    pub counter: u64,
    pub rate_windows: HashMap<String, RateWindow>,
    pub events: VecDeque<SessionEvent>,
    pub ring_capacity: usize,
    pub taint: HashSet<PiiType>,
    pub last_seen: f64,
}

impl Session {
    pub fn new(session_id: String, ring_capacity: usize) -> Self {
        Self {
            session_id,
            counter: 0,
            rate_windows: HashMap::new(),
            events: VecDeque::with_capacity(ring_capacity),
            ring_capacity,
            taint: HashSet::new(),
            last_seen: now(),
        }
    }

    pub fn push_event(&mut self, event: SessionEvent) {
        if self.events.len() >= self.ring_capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn find_recent(
        &self,
        tool: &str,
        within_seconds: u64,
        verdict_filter: Option<Verdict>,
    ) -> usize {
        let cutoff = now() - within_seconds as f64;
        self.events
            .iter()
            .filter(|e| e.tool == tool && e.timestamp >= cutoff)
            .filter(|e| verdict_filter.map_or(true, |v| e.verdict == v))
            .count()
    }

    pub fn has_taint(&self, pii_type: &PiiType) -> bool {
        self.taint.contains(pii_type)
    }
}

/// Approval record lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

/// A single pending-approval record, created when a rule's `then: approve`
/// fires and no prior approval covers this call under its strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub approval_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub session_id: String,
    pub rule_id: String,
    pub created_at: f64,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub responder: Option<String>,
}

/// The result of a single `check()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldResult {
    pub verdict: Verdict,
    pub rule_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_args: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    pub pii_matches: Vec<PiiMatch>,
}

pub const DEFAULT_DENY_RULE_ID: &str = "__default_deny__";
pub const HONEYPOT_RULE_ID: &str = "__honeypot__";
pub const SANITIZER_RULE_ID: &str = "__sanitizer__";
pub const KILLSWITCH_RULE_ID: &str = "__killswitch__";
pub const ERROR_RULE_ID: &str = "__error__";
pub const RULE_REMOVED_RULE_ID: &str = "__rule_removed__";

/// Seconds since the Unix epoch, as a float. Used for ring-buffer
/// timestamps and rate-limit windows.
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
