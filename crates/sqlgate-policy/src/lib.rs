use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlgate_protocol::GuardrailDecision;

/// Keywords that block a statement not starting with `SELECT`.
pub const MUTATING_KEYWORDS: [&str; 11] = [
    "DROP", "TRUNCATE", "ALTER", "DELETE", "UPDATE", "INSERT", "MERGE", "CREATE", "REPLACE",
    "GRANT", "REVOKE",
];

pub const MULTIPLE_STATEMENTS_WARNING: &str =
    "Multiple SQL statements detected; only single SELECT allowed";

static KEYWORD_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    MUTATING_KEYWORDS
        .iter()
        .filter_map(|kw| {
            Regex::new(&format!(r"\b{}\b", kw))
                .ok()
                .map(|re| (*kw, re))
        })
        .collect()
});

/// Decide whether `sql` may run.
///
/// Allow-list first: a statement beginning with `SELECT` skips the keyword
/// scan; everything else is scanned for [`MUTATING_KEYWORDS`] as whole words.
/// Independently, any `;` other than a single trailing terminator blocks.
/// Keyword text inside literals or identifiers is not distinguished.
pub fn validate(sql: &str) -> GuardrailDecision {
    let normalized = sql.trim().to_uppercase();
    let mut warnings = Vec::new();
    let mut block = false;

    if !normalized.starts_with("SELECT") {
        for (kw, re) in KEYWORD_PATTERNS.iter() {
            if re.is_match(&normalized) {
                warnings.push(format!("Detected dangerous keyword: {}", kw));
                block = true;
            }
        }
    }

    let body = normalized.strip_suffix(';').unwrap_or(&normalized);
    if body.contains(';') {
        warnings.push(MULTIPLE_STATEMENTS_WARNING.to_string());
        block = true;
    }

    GuardrailDecision {
        is_safe: !block,
        warnings,
        block,
    }
}

/// When the guardrail must run before an explicit execute request.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalPolicy {
    #[serde(default)]
    pub require_sql_approval: bool,
}

impl ApprovalPolicy {
    pub fn new(require_sql_approval: bool) -> Self {
        Self {
            require_sql_approval,
        }
    }

    pub fn requires_check(&self, requested: bool) -> bool {
        requested || self.require_sql_approval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_select_is_safe() {
        let d = validate("SELECT id, total FROM orders");
        assert!(d.is_safe);
        assert!(!d.block);
        assert!(d.warnings.is_empty());
    }

    #[test]
    fn single_trailing_semicolon_allowed() {
        assert!(validate("  select 1;  ").is_safe);
    }

    #[test]
    fn second_trailing_semicolon_blocks() {
        let d = validate("SELECT 1;;");
        assert!(d.block);
        assert_eq!(d.warnings, vec![MULTIPLE_STATEMENTS_WARNING.to_string()]);
    }

    #[test]
    fn stacked_statements_block_even_after_select() {
        let d = validate("SELECT 1; DROP TABLE orders");
        assert!(d.block);
        assert!(!d.is_safe);
        // SELECT prefix skips the keyword scan, only the stacking warning remains
        assert_eq!(d.warnings.len(), 1);
    }

    #[test]
    fn every_mutating_keyword_blocks() {
        for kw in MUTATING_KEYWORDS {
            let sql = format!("{} something", kw.to_lowercase());
            let d = validate(&sql);
            assert!(d.block, "{kw} should block");
            assert!(d.warnings.iter().any(|w| w.contains(kw)), "{kw}");
        }
    }

    #[test]
    fn delete_warning_names_keyword() {
        let d = validate("DELETE FROM orders");
        assert!(d.block);
        assert_eq!(d.warnings, vec!["Detected dangerous keyword: DELETE".to_string()]);
    }

    #[test]
    fn keywords_match_whole_words_only() {
        let d = validate("WITH updated_rows AS (SELECT 1) SELECT * FROM updated_rows");
        assert!(d.is_safe, "{:?}", d.warnings);
    }

    #[test]
    fn non_select_without_keywords_passes() {
        assert!(validate("WITH t AS (SELECT 1) SELECT * FROM t").is_safe);
        assert!(validate("EXPLAIN QUERY PLAN SELECT 1").is_safe);
    }

    #[test]
    fn keyword_and_stacking_both_reported() {
        let d = validate("UPDATE t SET a = 1; SELECT 1");
        assert!(d.block);
        assert_eq!(d.warnings.len(), 2);
    }

    #[test]
    fn keyword_inside_literal_still_blocks_non_select() {
        // Known over-block: the scan does not understand string literals.
        let d = validate("WITH x AS (SELECT 'drop me' AS v) SELECT v FROM x");
        assert!(d.block);
    }

    #[test]
    fn approval_policy_combines_flags() {
        assert!(!ApprovalPolicy::new(false).requires_check(false));
        assert!(ApprovalPolicy::new(false).requires_check(true));
        assert!(ApprovalPolicy::new(true).requires_check(false));
    }
}
