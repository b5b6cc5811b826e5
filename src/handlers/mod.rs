//! Category handlers: one per analytics intent, all following the same
//! shape — resolve the primary metric, pull figures from the data
//! service, layer on category-specific computation, and format a
//! narrative answer plus a chart description.

pub mod descriptive;
pub mod diagnostic;
pub mod general;
pub mod predictive;
pub mod prescriptive;

pub use descriptive::DescriptiveHandler;
pub use diagnostic::DiagnosticHandler;
pub use general::GeneralHandler;
pub use predictive::PredictiveHandler;
pub use prescriptive::PrescriptiveHandler;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

use crate::chart::ChartSpec;
use crate::classifier::QueryClassification;
use crate::period::FiscalYear;
use crate::semantic::{Collection, RelatedRecord, SemanticSearch};

/// Metrics tried in order when the classifier extracted none.
pub const DEFAULT_METRICS: [&str; 2] = ["revenue", "ebitda"];

pub const DEFAULT_FISCAL_YEAR: &str = "FY24";

/// Uniform output the engine consumes from every handler.
#[derive(Debug, Clone)]
pub struct HandlerOutput {
    pub answer: String,
    pub chart: Option<ChartSpec>,
    pub related_accounts: Vec<RelatedRecord>,
    pub data: serde_json::Value,
}

/// Candidate metrics for a classification: extracted ones, else defaults.
pub(crate) fn candidate_metrics(classification: &QueryClassification) -> Vec<String> {
    if classification.metrics.is_empty() {
        DEFAULT_METRICS.iter().map(|m| m.to_string()).collect()
    } else {
        classification.metrics.clone()
    }
}

lazy_static! {
    static ref FY_TOKEN: Regex = Regex::new(r"(?i)fy\s*(\d{2})").unwrap();
    static ref CALENDAR_YEAR: Regex = Regex::new(r"\b20(\d{2})\b").unwrap();
}

fn parse_fiscal_year(s: &str) -> Option<FiscalYear> {
    if let Some(caps) = FY_TOKEN.captures(s) {
        return Some(FiscalYear::new(format!("FY{}", &caps[1])));
    }
    if let Some(caps) = CALENDAR_YEAR.captures(s) {
        return Some(FiscalYear::new(format!("FY{}", &caps[1])));
    }
    None
}

/// Fiscal year implied by the temporal block, defaulting to the current
/// reporting year.
pub(crate) fn fiscal_year_from(classification: &QueryClassification) -> FiscalYear {
    [
        classification.temporal.start_period.as_deref(),
        classification.temporal.end_period.as_deref(),
    ]
    .into_iter()
    .flatten()
    .find_map(parse_fiscal_year)
    .unwrap_or_else(|| FiscalYear::new(DEFAULT_FISCAL_YEAR))
}

/// Best-effort related-accounts lookup. Failures are context loss, not
/// errors: the answer ships without the metadata.
pub(crate) async fn related_accounts(
    semantic: &dyn SemanticSearch,
    query_text: &str,
    k: usize,
) -> Vec<RelatedRecord> {
    match semantic.search(Collection::Accounts, query_text, k).await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "related-accounts lookup failed, continuing without");
            Vec::new()
        }
    }
}

/// Join extracted metric phrases into a semantic query string.
pub(crate) fn semantic_query(classification: &QueryClassification, fallback: &str) -> String {
    if classification.metrics.is_empty() {
        fallback.to_string()
    } else {
        classification.metrics.join(" ")
    }
}
