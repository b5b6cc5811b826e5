//! Predictive handler: "What will happen?" — historical series plus
//! linear projection with decaying confidence, and a forecast chart with
//! a confidence band.

use std::sync::Arc;

use serde::Serialize;

use crate::chart::{self, ChartSpec};
use crate::classifier::QueryClassification;
use crate::data::DataService;
use crate::error::Result;
use crate::facts::{PeriodAmount, ProjectedPoint};
use crate::handlers::{self, HandlerOutput};
use crate::period::FiscalYear;
use crate::semantic::{RelatedRecord, SemanticSearch};

pub const DEFAULT_HORIZON: usize = 3;

pub const METHODOLOGY: &str = "linear_trend_projection";

#[derive(Debug, Clone, Serialize)]
pub struct PredictivePayload {
    pub metric: String,
    pub fiscal_year: FiscalYear,
    pub historical: Vec<PeriodAmount>,
    pub projections: Vec<ProjectedPoint>,
    pub methodology: &'static str,
    #[serde(skip)]
    pub chart: Option<ChartSpec>,
    #[serde(skip)]
    pub related_accounts: Vec<RelatedRecord>,
}

pub struct PredictiveHandler {
    data: Arc<DataService>,
    semantic: Arc<dyn SemanticSearch>,
}

impl PredictiveHandler {
    pub fn new(data: Arc<DataService>, semantic: Arc<dyn SemanticSearch>) -> Self {
        Self { data, semantic }
    }

    pub async fn handle(&self, classification: &QueryClassification) -> Result<PredictivePayload> {
        let metric = handlers::candidate_metrics(classification)[0].clone();
        let fiscal_year = handlers::fiscal_year_from(classification);

        let (historical, projections) = self
            .data
            .project_metric(&metric, &fiscal_year, DEFAULT_HORIZON)
            .await;

        let chart = (!historical.is_empty()).then(|| {
            chart::forecast_chart(
                &format!("{} forecast", metric),
                &metric,
                &historical,
                &projections,
            )
        });

        let related_accounts = handlers::related_accounts(
            self.semantic.as_ref(),
            &handlers::semantic_query(classification, &metric),
            5,
        )
        .await;

        Ok(PredictivePayload {
            metric,
            fiscal_year,
            historical,
            projections,
            methodology: METHODOLOGY,
            chart,
            related_accounts,
        })
    }

    pub fn format(&self, payload: &PredictivePayload) -> String {
        let mut parts = Vec::new();
        parts.push(format!("Forecast for {}:", payload.metric));

        if let (Some(first), Some(last)) = (payload.historical.first(), payload.historical.last()) {
            let growth = if first.amount == 0.0 {
                0.0
            } else {
                (last.amount / first.amount - 1.0) * 100.0
            };
            parts.push(format!(
                "  History ({}): {} {:.0} to {} {:.0} ({:+.1}%)",
                payload.fiscal_year, first.period, first.amount, last.period, last.amount, growth
            ));
        }

        if payload.projections.is_empty() {
            parts.push("  Insufficient history for a reliable projection (need at least 3 periods).".to_string());
        } else {
            parts.push("  Projections:".to_string());
            for p in &payload.projections {
                parts.push(format!(
                    "    - {} {}: {:.0} (confidence {:.0}%)",
                    p.period,
                    p.fiscal_year,
                    p.projected_amount,
                    p.confidence * 100.0
                ));
            }
            let avg = payload.projections.iter().map(|p| p.projected_amount).sum::<f64>()
                / payload.projections.len() as f64;
            parts.push(format!("  Average projected amount: {:.0}", avg));
        }

        parts.push(format!(
            "  Methodology: {} over the trailing periods; confidence decays with horizon.",
            payload.methodology
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::QueryClassifier;
    use crate::mock::MockStore;
    use crate::semantic::{HashingEmbedder, VectorSemanticIndex};

    fn handler() -> PredictiveHandler {
        let data = Arc::new(DataService::new(Arc::new(MockStore::new().unwrap())));
        let semantic = Arc::new(VectorSemanticIndex::new(Arc::new(HashingEmbedder::default())));
        PredictiveHandler::new(data, semantic)
    }

    #[tokio::test]
    async fn test_predictive_projects_three_periods() {
        let h = handler();
        let c = QueryClassifier::new(None).fallback("forecast ebitda for next quarter");
        let payload = h.handle(&c).await.unwrap();
        assert_eq!(payload.historical.len(), 12);
        assert_eq!(payload.projections.len(), DEFAULT_HORIZON);
        // Projections roll past December into the next fiscal year.
        assert_eq!(payload.projections[0].fiscal_year.as_str(), "FY25");
        assert!(payload.projections[0].confidence > payload.projections[2].confidence);
        let answer = h.format(&payload);
        assert!(answer.contains("Projections"));
    }

    #[tokio::test]
    async fn test_predictive_unknown_metric_uses_totals() {
        let h = handler();
        let mut c = QueryClassifier::new(None).fallback("forecast the zzz for next year");
        c.metrics = vec!["zzz_unknown".to_string()];
        let payload = h.handle(&c).await.unwrap();
        // Unfiltered totals still project.
        assert!(!payload.historical.is_empty());
        assert!(!payload.projections.is_empty());
    }
}
