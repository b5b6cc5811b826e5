//! Diagnostic handler: "Why did it happen?" — variance against the
//! implied comparison point, with contributing factors and a waterfall
//! chart description.

use std::sync::Arc;

use serde::Serialize;

use crate::chart::{self, ChartSpec};
use crate::classifier::QueryClassification;
use crate::data::DataService;
use crate::error::Result;
use crate::facts::{ComparisonKind, PeriodAmount, VarianceAnalysis};
use crate::handlers::{self, HandlerOutput};
use crate::period::{FiscalYear, Period};
use crate::semantic::{RelatedRecord, SemanticSearch};

/// Default analysis period when the query names none.
pub const DEFAULT_VARIANCE_PERIOD: Period = Period::Sep;

/// How many trailing periods of history ride along for context.
const CONTEXT_PERIODS: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticPayload {
    pub metric: String,
    pub fiscal_year: FiscalYear,
    pub variance: VarianceAnalysis,
    pub historical_context: Vec<PeriodAmount>,
    #[serde(skip)]
    pub chart: Option<ChartSpec>,
    #[serde(skip)]
    pub related_accounts: Vec<RelatedRecord>,
}

pub struct DiagnosticHandler {
    data: Arc<DataService>,
    semantic: Arc<dyn SemanticSearch>,
}

impl DiagnosticHandler {
    pub fn new(data: Arc<DataService>, semantic: Arc<dyn SemanticSearch>) -> Self {
        Self { data, semantic }
    }

    fn period_from(classification: &QueryClassification) -> Period {
        classification
            .temporal
            .end_period
            .as_deref()
            .and_then(Period::scan)
            .or_else(|| {
                classification
                    .temporal
                    .start_period
                    .as_deref()
                    .and_then(Period::scan)
            })
            .unwrap_or(DEFAULT_VARIANCE_PERIOD)
    }

    pub async fn handle(&self, classification: &QueryClassification) -> Result<DiagnosticPayload> {
        let metric = handlers::candidate_metrics(classification)[0].clone();
        let fiscal_year = handlers::fiscal_year_from(classification);
        let period = Self::period_from(classification);
        let comparison = classification
            .comparison_type
            .unwrap_or(ComparisonKind::MonthOverMonth);

        let variance = self
            .data
            .variance_analysis(&metric, period, comparison, &fiscal_year)
            .await;

        let series = self.data.metric_series(&metric, &fiscal_year, None).await;
        let history = if series.is_empty {
            self.data.financial_summary(&fiscal_year, None).await
        } else {
            series.rows
        };
        let historical_context: Vec<PeriodAmount> = history
            .iter()
            .rev()
            .take(CONTEXT_PERIODS)
            .rev()
            .cloned()
            .collect();

        let chart = Some(chart::waterfall_chart(
            &format!("{} variance analysis", metric),
            &variance,
        ));

        let related_accounts = handlers::related_accounts(
            self.semantic.as_ref(),
            &handlers::semantic_query(classification, &metric),
            5,
        )
        .await;

        Ok(DiagnosticPayload {
            metric,
            fiscal_year,
            variance,
            historical_context,
            chart,
            related_accounts,
        })
    }

    pub fn format(&self, payload: &DiagnosticPayload) -> String {
        let v = &payload.variance;
        let direction = if v.variance >= 0.0 { "increased" } else { "decreased" };
        let mut parts = Vec::new();

        parts.push(format!(
            "{} {} in {} {} vs {} {} ({}):",
            title(&payload.metric),
            direction,
            v.period,
            payload.fiscal_year,
            v.previous_period,
            v.previous_fiscal_year,
            v.comparison.label()
        ));
        parts.push(format!(
            "  Current {:.0} | previous {:.0} | change {:+.0} ({:+.1}%)",
            v.current_value, v.previous_value, v.variance, v.variance_pct
        ));

        parts.push("  Contributing factors:".to_string());
        for factor in &v.factors {
            parts.push(format!("    - {}: {:+.1}% impact", factor.factor, factor.impact_pct));
        }

        let magnitude = v.variance_pct.abs();
        let severity = if magnitude > 10.0 {
            "significant"
        } else if magnitude > 5.0 {
            "moderate"
        } else {
            "minor"
        };
        parts.push(format!(
            "  Assessment: a {} {} of {:.1}%.",
            severity, direction, magnitude
        ));

        if !payload.related_accounts.is_empty() {
            parts.push("  Related accounts:".to_string());
            for acc in payload.related_accounts.iter().take(3) {
                parts.push(format!("    - {} (relevance {:.0}%)", acc.label, acc.score * 100.0));
            }
        }

        parts.join("\n")
    }

    pub async fn run(&self, classification: &QueryClassification) -> Result<HandlerOutput> {
        let payload = self.handle(classification).await?;
        Ok(HandlerOutput {
            answer: self.format(&payload),
            chart: payload.chart.clone(),
            related_accounts: payload.related_accounts.clone(),
            data: serde_json::to_value(&payload)?,
        })
    }
}

fn title(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::QueryClassifier;
    use crate::mock::MockStore;
    use crate::semantic::{HashingEmbedder, VectorSemanticIndex};

    fn handler() -> DiagnosticHandler {
        let data = Arc::new(DataService::new(Arc::new(MockStore::new().unwrap())));
        let semantic = Arc::new(VectorSemanticIndex::new(Arc::new(HashingEmbedder::default())));
        DiagnosticHandler::new(data, semantic)
    }

    #[tokio::test]
    async fn test_diagnostic_period_extraction() {
        let h = handler();
        let c = QueryClassifier::new(None).fallback("why did revenue drop in October?");
        let payload = h.handle(&c).await.unwrap();
        assert_eq!(payload.variance.period, Period::Oct);
        assert_eq!(payload.variance.previous_period, Period::Sep);
        assert_eq!(payload.variance.factors.len(), 3);
        assert!(payload.chart.is_some());
    }

    #[tokio::test]
    async fn test_diagnostic_defaults_to_september_mom() {
        let h = handler();
        let mut c = QueryClassifier::new(None).fallback("explain the ebitda variance");
        c.temporal.end_period = None;
        let payload = h.handle(&c).await.unwrap();
        assert_eq!(payload.variance.period, DEFAULT_VARIANCE_PERIOD);
        assert_eq!(payload.variance.comparison, ComparisonKind::MonthOverMonth);
        assert!(payload.historical_context.len() <= 8);
        let answer = h.format(&payload);
        assert!(answer.contains("Contributing factors"));
    }
}
