// PII detector: built-in regex catalog, Luhn validation, redaction.

use crate::core::models::{PiiMatch, PiiType};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Maximum length accepted for a rule-author-supplied regex pattern, to keep
/// worst-case matching bounded.
pub const MAX_PATTERN_LEN: usize = 500;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap());
static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?\d{1,3}[\s.\-]?\(?\d{3}\)?[\s.\-]?\d{3}[\s.\-]?\d{4}\b").unwrap()
});
static CREDIT_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d(?:[ \-]?\d){12,15}\b").unwrap());
static SSN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static IBAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{2}\d{2}[A-Z0-9]{11,30}\b").unwrap());
static IP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b")
        .unwrap()
});
static PASSPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{7,9}\b").unwrap());
static DOB: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b|\b\d{2}/\d{2}/\d{4}\b").unwrap());
static INN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{10}(?:\d{2})?\b").unwrap());
static SNILS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{3}-\d{3} \d{2}\b").unwrap());

fn luhn_valid(digits: &str) -> bool {
    let cleaned: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
    if cleaned.len() < 13 {
        return false;
    }
    let mut sum = 0u32;
    let mut double = false;
    for d in cleaned.iter().rev() {
        let mut v = *d;
        if double {
            v *= 2;
            if v > 9 {
                v -= 9;
            }
        }
        sum += v;
        double = !double;
    }
    sum % 10 == 0
}

fn ssn_valid(s: &str) -> bool {
    !s.starts_with("000") && !s.starts_with("666")
}

/// Validates a Russian INN (taxpayer number): 10-digit entities carry one
/// check digit, 12-digit individuals carry two, each a weighted-sum mod-11
/// (then mod-10) checksum over the preceding digits.
fn inn_valid(s: &str) -> bool {
    let digits: Vec<u32> = s.chars().filter_map(|c| c.to_digit(10)).collect();
    let checksum = |nums: &[u32], weights: &[u32]| -> u32 {
        (nums.iter().zip(weights).map(|(d, w)| d * w).sum::<u32>() % 11) % 10
    };
    match digits.len() {
        10 => {
            const W: [u32; 9] = [2, 4, 10, 3, 5, 9, 4, 6, 8];
            checksum(&digits[..9], &W) == digits[9]
        }
        12 => {
            const W11: [u32; 11] = [7, 2, 4, 10, 3, 5, 9, 4, 6, 8, 0];
            const W12: [u32; 11] = [3, 7, 2, 4, 10, 3, 5, 9, 4, 6, 8];
            checksum(&digits[..11], &W11) == digits[10] && checksum(&digits[..11], &W12) == digits[11]
        }
        _ => false,
    }
}

/// Validates a Russian SNILS (pension insurance number): 9 digits plus a
/// two-digit checksum computed as a descending-weight sum mod 101.
fn snils_valid(s: &str) -> bool {
    let digits: Vec<u32> = s.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 {
        return false;
    }
    let sum: u32 = digits[..9].iter().enumerate().map(|(i, d)| d * (9 - i as u32)).sum();
    let expected = match sum {
        0..=99 => sum,
        100 | 101 => 0,
        _ => {
            let rem = sum % 101;
            if rem == 100 {
                0
            } else {
                rem
            }
        }
    };
    let actual = digits[9] * 10 + digits[10];
    expected == actual
}

/// Scans text for every built-in PII type, plus any custom patterns
/// registered on the active RuleSet.
pub struct PiiDetector {
    custom: HashMap<String, Regex>,
}

impl PiiDetector {
    /// Builds a detector from the RuleSet's custom pattern map. Patterns
    /// longer than `MAX_PATTERN_LEN` or that fail to compile are rejected by
    /// the rule loader before this is constructed, so compilation here is
    /// infallible for a validated RuleSet.
    pub fn new(custom_patterns: &HashMap<String, String>) -> Self {
        let mut custom = HashMap::new();
        for (name, pattern) in custom_patterns {
            if let Ok(re) = Regex::new(pattern) {
                custom.insert(name.clone(), re);
            }
        }
        Self { custom }
    }

    /// Finds all PII matches in a single string.
    pub fn scan(&self, text: &str) -> Vec<PiiMatch> {
        let mut matches = Vec::new();
        self.scan_into(text, "", &mut matches);
        matches
    }

    fn scan_into(&self, text: &str, field: &str, out: &mut Vec<PiiMatch>) {
        for hit in EMAIL.find_iter(text) {
            out.push(mk_match(PiiType::Email, field, hit.as_str()));
        }
        for hit in CREDIT_CARD.find_iter(text) {
            if luhn_valid(hit.as_str()) {
                out.push(mk_match(PiiType::CreditCard, field, hit.as_str()));
            }
        }
        for hit in SSN.find_iter(text) {
            if ssn_valid(hit.as_str()) {
                out.push(mk_match(PiiType::Ssn, field, hit.as_str()));
            }
        }
        for hit in IBAN.find_iter(text) {
            out.push(mk_match(PiiType::Iban, field, hit.as_str()));
        }
        for hit in IP.find_iter(text) {
            out.push(mk_match(PiiType::Ip, field, hit.as_str()));
        }
        for hit in SNILS.find_iter(text) {
            if snils_valid(hit.as_str()) {
                out.push(mk_match(PiiType::Snils, field, hit.as_str()));
            }
        }
        for hit in PHONE.find_iter(text) {
            out.push(mk_match(PiiType::Phone, field, hit.as_str()));
        }
        for hit in PASSPORT.find_iter(text) {
            out.push(mk_match(PiiType::Passport, field, hit.as_str()));
        }
        for hit in DOB.find_iter(text) {
            out.push(mk_match(PiiType::Dob, field, hit.as_str()));
        }
        for hit in INN.find_iter(text) {
            if inn_valid(hit.as_str()) {
                out.push(mk_match(PiiType::Inn, field, hit.as_str()));
            }
        }
        for (name, re) in &self.custom {
            for hit in re.find_iter(text) {
                out.push(mk_match(PiiType::Custom(name.clone()), field, hit.as_str()));
            }
        }
    }

    /// Recurses into a JSON value, collecting PII matches with dotted field
    /// paths (e.g. `"user.email"`).
    pub fn scan_dict(&self, value: &serde_json::Value) -> Vec<PiiMatch> {
        let mut matches = Vec::new();
        self.scan_value(value, "", &mut matches);
        matches
    }

    fn scan_value(&self, value: &serde_json::Value, path: &str, out: &mut Vec<PiiMatch>) {
        match value {
            serde_json::Value::String(s) => self.scan_into(s, path, out),
            serde_json::Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let next = if path.is_empty() {
                        i.to_string()
                    } else {
                        format!("{path}.{i}")
                    };
                    self.scan_value(item, &next, out);
                }
            }
            serde_json::Value::Object(map) => {
                for (k, v) in map {
                    let next = if path.is_empty() {
                        k.clone()
                    } else {
                        format!("{path}.{k}")
                    };
                    self.scan_value(v, &next, out);
                }
            }
            _ => {}
        }
    }

    /// Returns a deep copy of `value` with every detected PII substring
    /// replaced by `[<TYPE> REDACTED]`. Structure and non-matching content
    /// are preserved byte-for-byte.
    pub fn redact_dict(&self, value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => serde_json::Value::String(self.redact_text(s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.redact_dict(v)).collect())
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.redact_dict(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Rebuilds `text` with every span `scan_into` would report replaced by
    /// its `[TYPE REDACTED]` marker. Spans are gathered through the same
    /// validator-gated passes as `scan_into` so a string that merely looks
    /// like a credit card or SSN but fails its checksum is left untouched.
    fn redact_text(&self, text: &str) -> String {
        let mut spans: Vec<(usize, usize, &str)> = Vec::new();
        for hit in EMAIL.find_iter(text) {
            spans.push((hit.start(), hit.end(), "EMAIL"));
        }
        for hit in CREDIT_CARD.find_iter(text) {
            if luhn_valid(hit.as_str()) {
                spans.push((hit.start(), hit.end(), "CREDIT_CARD"));
            }
        }
        for hit in SSN.find_iter(text) {
            if ssn_valid(hit.as_str()) {
                spans.push((hit.start(), hit.end(), "SSN"));
            }
        }
        for hit in IBAN.find_iter(text) {
            spans.push((hit.start(), hit.end(), "IBAN"));
        }
        for hit in IP.find_iter(text) {
            spans.push((hit.start(), hit.end(), "IP"));
        }
        for hit in SNILS.find_iter(text) {
            if snils_valid(hit.as_str()) {
                spans.push((hit.start(), hit.end(), "SNILS"));
            }
        }
        for hit in PHONE.find_iter(text) {
            spans.push((hit.start(), hit.end(), "PHONE"));
        }
        for hit in PASSPORT.find_iter(text) {
            spans.push((hit.start(), hit.end(), "PASSPORT"));
        }
        for hit in DOB.find_iter(text) {
            spans.push((hit.start(), hit.end(), "DOB"));
        }
        for hit in INN.find_iter(text) {
            if inn_valid(hit.as_str()) {
                spans.push((hit.start(), hit.end(), "INN"));
            }
        }
        for (name, re) in &self.custom {
            for hit in re.find_iter(text) {
                spans.push((hit.start(), hit.end(), name.as_str()));
            }
        }
        if spans.is_empty() {
            return text.to_string();
        }
        spans.sort_by_key(|s| s.0);
        let mut result = String::new();
        let mut cursor = 0usize;
        for (start, end, label) in spans {
            if start < cursor {
                continue; // overlapping match already covered
            }
            result.push_str(&text[cursor..start]);
            result.push_str(&format!("[{label} REDACTED]"));
            cursor = end;
        }
        result.push_str(&text[cursor..]);
        result
    }
}

fn mk_match(pii_type: PiiType, field: &str, value: &str) -> PiiMatch {
    PiiMatch {
        pii_type,
        field: field.to_string(),
        redacted_value: value.to_string(),
    }
}
