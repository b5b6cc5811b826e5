//! Metric phrase -> hierarchy root resolution.
//!
//! Maps user-facing metric names ("EBITDA", "gross margin") to the
//! chart-of-accounts roll-up nodes whose leaf closures drive fact-table
//! filtering. "gross margin" and "gross profit" intentionally share a root;
//! the percentage-vs-amount distinction is a formatting concern downstream.

use std::collections::HashMap;

use lazy_static::lazy_static;
use strsim::jaro_winkler;
use tracing::{debug, warn};

use crate::hierarchy::AccountHierarchy;

/// Minimum Jaro-Winkler similarity for a near-miss alias hit.
const FUZZY_ALIAS_THRESHOLD: f64 = 0.85;

lazy_static! {
    /// Static alias table: normalized phrase -> hierarchy root node names.
    static ref METRIC_ALIASES: Vec<(&'static str, Vec<&'static str>)> = vec![
        // Income statement
        ("ebitda", vec!["FCCS_Operating Income"]),
        ("operating income", vec!["FCCS_Operating Income"]),
        ("operating profit", vec!["FCCS_Operating Income"]),
        ("revenue", vec!["FCCS_Sales"]),
        ("sales", vec!["FCCS_Sales"]),
        ("gross profit", vec!["FCCS_Gross Profit"]),
        ("gross margin", vec!["FCCS_Gross Profit"]),
        ("cost of sales", vec!["FCCS_Cost of Sales"]),
        ("cogs", vec!["FCCS_Cost of Sales"]),
        ("operating expenses", vec!["FCCS_Operating Expenses"]),
        ("opex", vec!["FCCS_Operating Expenses"]),
        ("net income", vec!["FCCS_Net Income"]),
        ("net profit", vec!["FCCS_Net Income"]),
        ("income statement", vec!["FCCS_Income Statement"]),
        ("p&l", vec!["FCCS_Income Statement"]),
        ("profit and loss", vec!["FCCS_Income Statement"]),
        // Balance sheet
        ("assets", vec!["FCCS_Total Assets"]),
        ("current assets", vec!["FCCS_Current Assets"]),
        ("cash", vec!["FCCS_Cash And Cash Equivalents"]),
        ("receivables", vec!["FCCS_Acct Receivable"]),
        ("inventory", vec!["FCCS_Inventories"]),
        ("liabilities", vec!["FCCS_Total Liabilities"]),
        ("equity", vec!["FCCS_Total Equity"]),
        ("balance sheet", vec!["FCCS_Balance Sheet"]),
        ("retained earnings", vec!["FCCS_Retained Earnings"]),
    ];
}

/// Static/fuzzy lookup from metric phrases to hierarchy root names.
pub struct MetricRegistry {
    aliases: HashMap<String, Vec<String>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        let aliases = METRIC_ALIASES
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    v.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
                )
            })
            .collect();
        Self { aliases }
    }

    fn normalize(phrase: &str) -> String {
        phrase.trim().to_lowercase()
    }

    /// Resolve a metric phrase to hierarchy root names. First match wins:
    /// exact alias, substring alias (either direction), near-miss alias,
    /// then a scan of the hierarchy's own roll-up names. An empty result
    /// means "metric unknown" and callers fall back to an unfiltered view.
    pub fn resolve_roots(&self, phrase: &str, hierarchy: &AccountHierarchy) -> Vec<String> {
        let needle = Self::normalize(phrase);
        if needle.is_empty() {
            return Vec::new();
        }

        if let Some(roots) = self.aliases.get(&needle) {
            return roots.clone();
        }

        for (key, roots) in &self.aliases {
            if key.contains(&needle) || needle.contains(key.as_str()) {
                debug!(phrase = %needle, alias = %key, "substring alias match");
                return roots.clone();
            }
        }

        // Near-miss spellings ("ebidta") before giving up on the table.
        let mut best: Option<(f64, &Vec<String>)> = None;
        for (key, roots) in &self.aliases {
            let score = jaro_winkler(&needle, key);
            if score >= FUZZY_ALIAS_THRESHOLD
                && best.map(|(b, _)| score > b).unwrap_or(true)
            {
                best = Some((score, roots));
            }
        }
        if let Some((score, roots)) = best {
            debug!(phrase = %needle, score, "fuzzy alias match");
            return roots.clone();
        }

        let scan: Vec<String> = hierarchy
            .branch_names()
            .filter(|name| name.to_lowercase().contains(&needle))
            .map(|name| name.to_string())
            .collect();
        if !scan.is_empty() {
            return scan;
        }

        warn!(metric = %phrase, "no account mapping found for metric");
        Vec::new()
    }

    /// The metric phrases this registry knows about.
    pub fn known_metrics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.aliases.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::AccountNode;

    fn hierarchy() -> AccountHierarchy {
        let nodes = vec![
            AccountNode {
                code: "4000".into(),
                parent: Some("FCCS_Sales".into()),
                description: None,
            },
            AccountNode {
                code: "FCCS_Sales".into(),
                parent: Some("FCCS_Operating Income".into()),
                description: None,
            },
            AccountNode {
                code: "FCCS_Working Capital".into(),
                parent: Some("FCCS_Balance Sheet".into()),
                description: None,
            },
            AccountNode {
                code: "2100".into(),
                parent: Some("FCCS_Working Capital".into()),
                description: None,
            },
        ];
        AccountHierarchy::build(&nodes)
    }

    #[test]
    fn test_case_and_whitespace_round_trip() {
        let reg = MetricRegistry::new();
        let h = hierarchy();
        let a = reg.resolve_roots("EBITDA", &h);
        let b = reg.resolve_roots("ebitda", &h);
        let c = reg.resolve_roots("  EBITDA  ", &h);
        assert_eq!(a, vec!["FCCS_Operating Income".to_string()]);
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_shared_gross_root() {
        let reg = MetricRegistry::new();
        let h = hierarchy();
        assert_eq!(
            reg.resolve_roots("gross margin", &h),
            reg.resolve_roots("gross profit", &h)
        );
    }

    #[test]
    fn test_substring_match() {
        let reg = MetricRegistry::new();
        let h = hierarchy();
        // "total revenue" contains alias key "revenue"
        assert_eq!(
            reg.resolve_roots("total revenue", &h),
            vec!["FCCS_Sales".to_string()]
        );
    }

    #[test]
    fn test_fuzzy_alias_match() {
        let reg = MetricRegistry::new();
        let h = hierarchy();
        assert_eq!(
            reg.resolve_roots("ebidta", &h),
            vec!["FCCS_Operating Income".to_string()]
        );
    }

    #[test]
    fn test_hierarchy_name_fallback() {
        let reg = MetricRegistry::new();
        let h = hierarchy();
        assert_eq!(
            reg.resolve_roots("working capital", &h),
            vec!["FCCS_Working Capital".to_string()]
        );
    }

    #[test]
    fn test_unknown_metric_is_empty() {
        let reg = MetricRegistry::new();
        let h = hierarchy();
        assert!(reg.resolve_roots("zzz_unknown", &h).is_empty());
    }
}
