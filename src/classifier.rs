//! Two-phase query classification.
//!
//! Phase 1 is a deterministic pre-filter: conversational and meta queries
//! short-circuit to GENERAL without an LLM round trip, unless the query
//! also carries a financial keyword ("what is our revenue" must not be
//! treated as a meta question just because it starts with "what").
//! Phase 2 asks the model for structured JSON and validates it strictly;
//! any failure falls over to a keyword heuristic. `classify` never errors.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FinsightError, Result};
use crate::facts::ComparisonKind;
use crate::llm::LlmClient;

/// Confidence assigned by the deterministic pre-filter.
pub const CONFIDENCE_PATTERN: f64 = 0.95;
/// Heuristic fallback: a category cue keyword matched.
pub const CONFIDENCE_FALLBACK_KEYWORD: f64 = 0.7;
/// Heuristic fallback: no financial context at all.
pub const CONFIDENCE_FALLBACK_GENERAL: f64 = 0.6;
/// Heuristic fallback: financial context but no category cue.
pub const CONFIDENCE_FALLBACK_DEFAULT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryCategory {
    General,
    Descriptive,
    Diagnostic,
    Predictive,
    Prescriptive,
}

impl QueryCategory {
    pub fn label(&self) -> &'static str {
        match self {
            QueryCategory::General => "general",
            QueryCategory::Descriptive => "descriptive",
            QueryCategory::Diagnostic => "diagnostic",
            QueryCategory::Predictive => "predictive",
            QueryCategory::Prescriptive => "prescriptive",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "general" => Some(QueryCategory::General),
            "descriptive" => Some(QueryCategory::Descriptive),
            "diagnostic" => Some(QueryCategory::Diagnostic),
            "predictive" => Some(QueryCategory::Predictive),
            "prescriptive" => Some(QueryCategory::Prescriptive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Monthly,
    Quarterly,
    Annual,
}

impl Granularity {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "monthly" => Some(Granularity::Monthly),
            "quarterly" => Some(Granularity::Quarterly),
            "annual" | "yearly" => Some(Granularity::Annual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalContext {
    pub start_period: Option<String>,
    pub end_period: Option<String>,
    pub granularity: Option<Granularity>,
    pub is_forecast: bool,
}

/// Immutable classification result, produced fresh per query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryClassification {
    pub category: QueryCategory,
    pub confidence: f64,
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
    pub temporal: TemporalContext,
    pub comparison_type: Option<ComparisonKind>,
    pub reasoning: String,
}

impl QueryClassification {
    fn simple(category: QueryCategory, confidence: f64, reasoning: &str) -> Self {
        Self {
            category,
            confidence,
            metrics: Vec::new(),
            dimensions: Vec::new(),
            temporal: TemporalContext::default(),
            comparison_type: None,
            reasoning: reasoning.to_string(),
        }
    }
}

lazy_static! {
    /// Conversational / capability / meta patterns, tested in order.
    static ref GENERAL_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)^\s*(hi|hello|hey|greetings|good\s+(morning|afternoon|evening))\b").unwrap(),
        Regex::new(r"(?i)^\s*what\s+(is|are|was|were)\b").unwrap(),
        Regex::new(r"(?i)^\s*what\s+(can|do|does)\s+(you|this|it)\b").unwrap(),
        Regex::new(r"(?i)\b(what|which)\s+data\s+do\s+you\s+have\b").unwrap(),
        Regex::new(r"(?i)\bwho\s+are\s+you\b").unwrap(),
        Regex::new(r"(?i)\btell\s+me\s+about\s+(yourself|the\s+system)\b").unwrap(),
        Regex::new(r"(?i)\bhow\s+(do|does)\s+(you|this|it|the\s+system)\s+work\b").unwrap(),
        Regex::new(r"(?i)\bhow\s+(can|do)\s+i\s+use\b").unwrap(),
        Regex::new(r"(?i)\byour?\s+capabilit").unwrap(),
        Regex::new(r"(?i)\bcan\s+you\s+(help|talk)\b").unwrap(),
        Regex::new(r"(?i)^\s*(help|thanks|thank\s+you)\b").unwrap(),
    ];
}

/// Financial keywords that override a meta-pattern match: metric names,
/// period and fiscal-year tokens, company-specific terms.
const FINANCIAL_KEYWORDS: &[&str] = &[
    "ebitda",
    "revenue",
    "sales",
    "margin",
    "profit",
    "income",
    "cost",
    "expense",
    "opex",
    "cogs",
    "cash",
    "asset",
    "liabilit",
    "equity",
    "inventory",
    "receivable",
    "working capital",
    "balance sheet",
    "p&l",
    "budget",
    "forecast",
    "variance",
    "trend",
    "growth",
    "fy2",
    "q1",
    "q2",
    "q3",
    "q4",
    "jan",
    "feb",
    "mar",
    "apr",
    "jun",
    "sep",
    "oct",
    "quarter",
    "performance",
    "production",
    "yield",
    "ukraine",
];

fn has_financial_keyword(query_lower: &str) -> bool {
    FINANCIAL_KEYWORDS.iter().any(|k| query_lower.contains(k))
}

/// Category cue tables for the heuristic fallback, scanned in priority
/// order: diagnostic > predictive > prescriptive > descriptive.
const DIAGNOSTIC_CUES: [&str; 5] = ["why", "cause", "reason", "explain", "variance"];
const PREDICTIVE_CUES: [&str; 5] = ["forecast", "predict", "project", "expect", "will"];
const PRESCRIPTIVE_CUES: [&str; 5] = ["recommend", "should", "improve", "optimize", "suggest"];
const DESCRIPTIVE_CUES: [&str; 6] = ["show", "what", "how much", "trend", "history", "display"];

const SYSTEM_PROMPT: &str = r#"You are a financial analytics query classifier.

Classify each query into ONE of these categories:

1. general - Non-analytics questions (greetings, help, system questions)
2. descriptive - "What happened?" questions about historical data
3. diagnostic - "Why did it happen?" questions seeking root causes
4. predictive - "What will happen?" questions about the future
5. prescriptive - "What should we do?" questions seeking recommendations

Also extract:
- metrics: financial/operational metrics mentioned (e.g. EBITDA, revenue, gross margin)
- dimensions: grouping dimensions (e.g. region, product, quarter, year)
- temporal: time context (start_period, end_period, granularity monthly/quarterly/annual)
- comparison_type: if comparing (YoY, QoQ, vs_budget, vs_forecast)

Respond in JSON format only."#;

fn user_prompt(query: &str) -> String {
    format!(
        r#"Classify this query:

Query: {}

Respond with JSON:
{{
    "category": "general|descriptive|diagnostic|predictive|prescriptive",
    "confidence": 0.0-1.0,
    "metrics": ["list", "of", "metrics"],
    "dimensions": ["list", "of", "dimensions"],
    "temporal": {{
        "start_period": "e.g. 2024-Q1 or null",
        "end_period": "e.g. 2024-Q4 or null",
        "granularity": "monthly|quarterly|annual or null",
        "is_forecast": true/false
    }},
    "comparison_type": "YoY|QoQ|vs_budget|vs_forecast or null",
    "reasoning": "Brief explanation"
}}"#,
        query
    )
}

/// Raw model output before strict validation.
#[derive(Debug, Deserialize)]
struct RawClassification {
    category: String,
    confidence: Option<f64>,
    #[serde(default)]
    metrics: Vec<String>,
    #[serde(default)]
    dimensions: Vec<String>,
    temporal: Option<RawTemporal>,
    comparison_type: Option<String>,
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTemporal {
    start_period: Option<String>,
    end_period: Option<String>,
    granularity: Option<String>,
    #[serde(default)]
    is_forecast: bool,
}

pub struct QueryClassifier {
    llm: Option<std::sync::Arc<LlmClient>>,
}

impl QueryClassifier {
    pub fn new(llm: Option<std::sync::Arc<LlmClient>>) -> Self {
        Self { llm }
    }

    /// Phase 1: deterministic pre-filter. Pure function of the query text
    /// and the static tables; same input, same verdict.
    pub fn prefilter(&self, query: &str) -> Option<QueryClassification> {
        let lower = query.to_lowercase();
        let matches_pattern = GENERAL_PATTERNS.iter().any(|p| p.is_match(query));
        if matches_pattern && !has_financial_keyword(&lower) {
            debug!(query = %query, "pre-filter matched conversational/meta pattern");
            return Some(QueryClassification::simple(
                QueryCategory::General,
                CONFIDENCE_PATTERN,
                "Matched conversational/meta pattern without financial context",
            ));
        }
        None
    }

    /// Classify a query. Never fails: LLM problems, malformed responses,
    /// and malformed input all land in the heuristic fallback.
    pub async fn classify(&self, query: &str) -> QueryClassification {
        if let Some(classification) = self.prefilter(query) {
            return classification;
        }

        if let Some(llm) = &self.llm {
            match self.classify_with_model(llm, query).await {
                Ok(classification) => return classification,
                Err(e) => {
                    warn!(error = %e, "model classification failed, using heuristic fallback");
                }
            }
        }

        self.fallback(query)
    }

    async fn classify_with_model(
        &self,
        llm: &LlmClient,
        query: &str,
    ) -> Result<QueryClassification> {
        let response = llm.chat(SYSTEM_PROMPT, &user_prompt(query)).await?;
        parse_model_response(&response)
    }

    /// Keyword heuristic used when the model path is unavailable or its
    /// output fails validation.
    pub fn fallback(&self, query: &str) -> QueryClassification {
        let lower = query.to_lowercase();

        if let Some(classification) = self.prefilter(query) {
            // Rated lower than the direct pre-filter path: we only got
            // here because the primary path failed.
            return QueryClassification {
                confidence: CONFIDENCE_FALLBACK_GENERAL,
                ..classification
            };
        }

        if !has_financial_keyword(&lower) {
            return QueryClassification::simple(
                QueryCategory::General,
                CONFIDENCE_FALLBACK_GENERAL,
                "Fallback: no financial context detected",
            );
        }

        let cue_tables: [(&[&str], QueryCategory); 4] = [
            (&DIAGNOSTIC_CUES, QueryCategory::Diagnostic),
            (&PREDICTIVE_CUES, QueryCategory::Predictive),
            (&PRESCRIPTIVE_CUES, QueryCategory::Prescriptive),
            (&DESCRIPTIVE_CUES, QueryCategory::Descriptive),
        ];

        let (category, confidence) = cue_tables
            .iter()
            .find(|(cues, _)| cues.iter().any(|c| lower.contains(c)))
            .map(|(_, cat)| (*cat, CONFIDENCE_FALLBACK_KEYWORD))
            .unwrap_or((QueryCategory::Descriptive, CONFIDENCE_FALLBACK_DEFAULT));

        QueryClassification {
            category,
            confidence,
            metrics: extract_metric_phrases(&lower),
            dimensions: Vec::new(),
            temporal: TemporalContext {
                start_period: None,
                end_period: crate::period::Period::scan(&lower).map(|p| p.label().to_string()),
                granularity: None,
                is_forecast: category == QueryCategory::Predictive,
            },
            comparison_type: None,
            reasoning: "Fallback keyword-based classification".to_string(),
        }
    }
}

/// Pull known metric phrases out of the query text, longest first so
/// "gross margin" wins over "margin".
fn extract_metric_phrases(query_lower: &str) -> Vec<String> {
    const PHRASES: [&str; 14] = [
        "working capital",
        "gross margin",
        "gross profit",
        "operating income",
        "operating expenses",
        "net income",
        "cost of sales",
        "balance sheet",
        "ebitda",
        "revenue",
        "sales",
        "opex",
        "cogs",
        "cash",
    ];
    let mut found = Vec::new();
    for phrase in PHRASES {
        if query_lower.contains(phrase)
            && !found
                .iter()
                .any(|f: &String| f.contains(phrase) || phrase.contains(f.as_str()))
        {
            found.push(phrase.to_string());
        }
    }
    found
}

/// Strip optional markdown fences and strictly validate the model's JSON.
/// An invalid response never partially populates a classification.
fn parse_model_response(raw: &str) -> Result<QueryClassification> {
    let body = strip_code_fences(raw);
    let parsed: RawClassification = serde_json::from_str(body.trim())
        .map_err(|e| FinsightError::Classification(format!("Invalid model JSON: {}", e)))?;

    let category = QueryCategory::parse(&parsed.category).ok_or_else(|| {
        FinsightError::Classification(format!("Unknown category: {}", parsed.category))
    })?;

    let temporal = match parsed.temporal {
        Some(t) => {
            let granularity = match t.granularity.as_deref().filter(|g| !g.eq_ignore_ascii_case("null")) {
                Some(g) => Some(Granularity::parse(g).ok_or_else(|| {
                    FinsightError::Classification(format!("Unknown granularity: {}", g))
                })?),
                None => None,
            };
            TemporalContext {
                start_period: t.start_period.filter(|s| !s.eq_ignore_ascii_case("null")),
                end_period: t.end_period.filter(|s| !s.eq_ignore_ascii_case("null")),
                granularity,
                is_forecast: t.is_forecast,
            }
        }
        None => TemporalContext::default(),
    };

    let comparison_type = match parsed.comparison_type.as_deref().filter(|c| !c.eq_ignore_ascii_case("null")) {
        Some(c) => Some(ComparisonKind::parse(c).ok_or_else(|| {
            FinsightError::Classification(format!("Unknown comparison type: {}", c))
        })?),
        None => None,
    };

    Ok(QueryClassification {
        category,
        confidence: parsed.confidence.unwrap_or(0.8).clamp(0.0, 1.0),
        metrics: parsed.metrics,
        dimensions: parsed.dimensions,
        temporal,
        comparison_type,
        reasoning: parsed.reasoning.unwrap_or_default(),
    })
}

fn strip_code_fences(raw: &str) -> &str {
    if let Some(start) = raw.find("```json") {
        let after = &raw[start + 7..];
        return after.split("```").next().unwrap_or(after);
    }
    if let Some(start) = raw.find("```") {
        let after = &raw[start + 3..];
        return after.split("```").next().unwrap_or(after);
    }
    raw
}
