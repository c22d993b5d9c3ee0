//! Ordered rule tables
//!
//! Keyword heuristics live here as `(pattern, verdict)` tables evaluated in
//! order; the first matching rule wins. Matching is case-insensitive.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// A single `(pattern, verdict)` rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule<V: 'static> {
    /// Substring to look for (upper case)
    pub pattern: &'static str,
    /// Verdict when the pattern matches
    pub verdict: V,
}

impl<V: Copy> Rule<V> {
    const fn new(pattern: &'static str, verdict: V) -> Self {
        Self { pattern, verdict }
    }
}

/// Evaluate an ordered table against already upper-cased text
fn first_match<V: Copy>(table: &[Rule<V>], upper: &str) -> Option<V> {
    table
        .iter()
        .find(|rule| upper.contains(rule.pattern))
        .map(|rule| rule.verdict)
}

/// Safety classification of a plan's text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyClass {
    /// Matches a deny-listed pattern; needs a human
    Controlled(&'static str),
    /// Plain read/insert; auto-approved
    Standard,
    /// Nothing recognizable; needs a human
    Ambiguous,
}

/// Safety rules: deny list first, then standard operations
pub static SAFETY_RULES: &[Rule<SafetyClass>] = &[
    Rule::new("DROP TABLE", SafetyClass::Controlled("DROP TABLE")),
    Rule::new("DELETE FROM", SafetyClass::Controlled("DELETE FROM")),
    Rule::new("TRUNCATE", SafetyClass::Controlled("TRUNCATE")),
    Rule::new("GRANT ALL", SafetyClass::Controlled("GRANT ALL")),
    Rule::new("REVOKE", SafetyClass::Controlled("REVOKE")),
    Rule::new("FORCE PUSH", SafetyClass::Controlled("FORCE PUSH")),
    Rule::new("ALTER TABLE", SafetyClass::Controlled("ALTER TABLE")),
    Rule::new("CREATE TABLE", SafetyClass::Controlled("CREATE TABLE")),
    Rule::new("SELECT", SafetyClass::Standard),
    Rule::new("INSERT", SafetyClass::Standard),
];

/// Classify SQL or diff text
#[must_use]
pub fn classify_plan_text(text: &str) -> SafetyClass {
    first_match(SAFETY_RULES, &text.to_uppercase()).unwrap_or(SafetyClass::Ambiguous)
}

/// Deny-listed pattern in the text, if any
#[must_use]
pub fn controlled_pattern(text: &str) -> Option<&'static str> {
    match classify_plan_text(text) {
        SafetyClass::Controlled(pattern) => Some(pattern),
        SafetyClass::Standard | SafetyClass::Ambiguous => None,
    }
}

/// Markers that point at a vendor or upstream API problem
pub static VENDOR_RULES: &[Rule<()>] = &[
    Rule::new("VENDOR", ()),
    Rule::new("UPSTREAM", ()),
    Rule::new("API", ()),
    Rule::new("TIMEOUT", ()),
    Rule::new("HTTP_503", ()),
    Rule::new("503", ()),
    Rule::new("CONNECTION REFUSED", ()),
    Rule::new("GATEWAY", ()),
];

/// First vendor marker found in the text
#[must_use]
pub fn mentions_vendor(text: &str) -> Option<&'static str> {
    let upper = text.to_uppercase();
    VENDOR_RULES
        .iter()
        .find(|rule| upper.contains(rule.pattern))
        .map(|rule| rule.pattern)
}

/// Error codes of the form `HTTP_*` come from an upstream API
#[inline]
#[must_use]
pub fn is_http_error_code(code: &str) -> bool {
    code.to_uppercase().starts_with("HTTP_")
}

/// Outcome of the investigator's regex pre-scan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FastScan {
    /// `division by zero` seen
    DivisionByZero,
    /// A column reported missing
    ColumnMissing,
    /// An `ERROR_*` code seen
    ErrorCode(String),
    /// Nothing recognized
    Unknown,
}

impl FastScan {
    /// Check for an unrecognized scan
    #[inline]
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}

impl fmt::Display for FastScan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DivisionByZero => f.write_str("LOGIC_ERROR: DIVISION_BY_ZERO"),
            Self::ColumnMissing => f.write_str("SCHEMA_ERROR: COLUMN_MISSING"),
            Self::ErrorCode(code) => write!(f, "ERROR_CODE: {code}"),
            Self::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

static DIVISION_BY_ZERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)division by zero").unwrap());

static COLUMN_MISSING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)column.*missing").unwrap());

static ERROR_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"ERROR_[A-Z0-9_]+").unwrap());

/// Regex pre-scan over flattened log text
#[must_use]
pub fn fast_scan(text: &str) -> FastScan {
    if DIVISION_BY_ZERO.is_match(text) {
        FastScan::DivisionByZero
    } else if COLUMN_MISSING.is_match(text) {
        FastScan::ColumnMissing
    } else if let Some(code) = ERROR_CODE.find(text) {
        FastScan::ErrorCode(code.as_str().to_string())
    } else {
        FastScan::Unknown
    }
}

/// First `ERROR_*` code in the text
#[must_use]
pub fn extract_error_code(text: &str) -> Option<String> {
    ERROR_CODE.find(text).map(|m| m.as_str().to_string())
}

/// Mentions a division-by-zero bug
#[inline]
#[must_use]
pub fn mentions_division_by_zero(text: &str) -> bool {
    DIVISION_BY_ZERO.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn deny_list_wins_over_standard() {
        assert_eq!(
            classify_plan_text("DELETE FROM t WHERE id IN (SELECT id FROM t)"),
            SafetyClass::Controlled("DELETE FROM")
        );
        assert_eq!(
            classify_plan_text("alter table sales_data add column if not exists d varchar"),
            SafetyClass::Controlled("ALTER TABLE")
        );
    }

    #[test]
    fn standard_and_ambiguous() {
        assert_eq!(classify_plan_text("SELECT 1"), SafetyClass::Standard);
        assert_eq!(classify_plan_text("insert into t values (1)"), SafetyClass::Standard);
        assert_eq!(classify_plan_text("UPDATE t SET x = 1"), SafetyClass::Ambiguous);
    }

    #[test]
    fn vendor_markers() {
        assert_eq!(mentions_vendor("Upstream returned HTTP 503"), Some("UPSTREAM"));
        assert_eq!(mentions_vendor("connection refused by host"), Some("CONNECTION REFUSED"));
        assert_eq!(mentions_vendor("column d missing"), None);
        assert!(is_http_error_code("http_502"));
        assert!(!is_http_error_code("ERR_SCHEMA_001"));
    }

    #[test]
    fn fast_scan_priority() {
        assert_eq!(fast_scan("ERROR_XY: division by zero"), FastScan::DivisionByZero);
        assert_eq!(fast_scan("Column 'region' is missing"), FastScan::ColumnMissing);
        assert_eq!(
            fast_scan("job failed with ERROR_DEADLOCK_712").to_string(),
            "ERROR_CODE: ERROR_DEADLOCK_712"
        );
        assert!(fast_scan("all quiet").is_unknown());
    }

    proptest! {
        #[test]
        fn deny_pattern_anywhere_is_controlled(
            prefix in "[a-z ]{0,20}",
            suffix in "[a-z ]{0,20}",
            idx in 0usize..8,
            lower in any::<bool>(),
        ) {
            let pattern = SAFETY_RULES[idx].pattern;
            let pattern = if lower { pattern.to_lowercase() } else { pattern.to_string() };
            let text = format!("{prefix} {pattern} {suffix}");
            prop_assert!(matches!(classify_plan_text(&text), SafetyClass::Controlled(_)));
        }

        #[test]
        fn digits_only_never_vendor(text in "[0-4 ]{0,40}") {
            prop_assert_eq!(mentions_vendor(&text), None);
        }
    }
}
