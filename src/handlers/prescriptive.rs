//! Prescriptive handler: "What should we do?" — trend and variance feed a
//! rule table that emits priority-ranked recommendations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chart::{self, ChartSpec};
use crate::classifier::QueryClassification;
use crate::data::DataService;
use crate::error::Result;
use crate::facts::{self, ComparisonKind, PeriodAmount, Trend, VarianceAnalysis};
use crate::handlers::{self, HandlerOutput};
use crate::period::{FiscalYear, Period};
use crate::semantic::{RelatedRecord, SemanticSearch};

/// Growth above this marks an expansion worth planning for.
const STRONG_GROWTH_PCT: f64 = 10.0;
/// Growth/variance beyond +/- this triggers corrective recommendations.
const ATTENTION_THRESHOLD_PCT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: String,
    pub priority: Priority,
    pub recommendation: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrescriptivePayload {
    pub metric: String,
    pub fiscal_year: FiscalYear,
    pub rows: Vec<PeriodAmount>,
    pub trend: Trend,
    pub variance: VarianceAnalysis,
    pub recommendations: Vec<Recommendation>,
    #[serde(skip)]
    pub chart: Option<ChartSpec>,
    #[serde(skip)]
    pub related_accounts: Vec<RelatedRecord>,
}

pub struct PrescriptiveHandler {
    data: Arc<DataService>,
    semantic: Arc<dyn SemanticSearch>,
}

impl PrescriptiveHandler {
    pub fn new(data: Arc<DataService>, semantic: Arc<dyn SemanticSearch>) -> Self {
        Self { data, semantic }
    }

    /// Rule table mapping trend/variance readings to recommendations.
    fn recommend(metric: &str, trend: &Trend, variance: &VarianceAnalysis) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();
        let growth = trend.growth_pct;

        match trend.direction {
            facts::TrendDirection::InsufficientData => {}
            _ if growth > STRONG_GROWTH_PCT => recommendations.push(Recommendation {
                category: "Growth Management".to_string(),
                priority: Priority::Medium,
                recommendation: format!(
                    "Strong {} growth trajectory. Consider capacity planning and resource allocation.",
                    metric
                ),
                rationale: format!("Year-to-date growth of {:.1}% indicates expansion.", growth),
            }),
            _ if growth < -ATTENTION_THRESHOLD_PCT => recommendations.push(Recommendation {
                category: "Performance Improvement".to_string(),
                priority: Priority::High,
                recommendation: format!(
                    "Declining {} trend detected. Conduct root cause analysis and implement corrective measures.",
                    metric
                ),
                rationale: format!("Year-to-date decline of {:.1}% requires attention.", growth),
            }),
            _ => recommendations.push(Recommendation {
                category: "Optimization".to_string(),
                priority: Priority::Low,
                recommendation: format!(
                    "Stable {} performance. Focus on efficiency improvements and cost optimization.",
                    metric
                ),
                rationale: format!("Year-to-date change of {:.1}% shows stability.", growth),
            }),
        }

        if variance.variance_pct > ATTENTION_THRESHOLD_PCT {
            recommendations.push(Recommendation {
                category: "Positive Variance".to_string(),
                priority: Priority::Medium,
                recommendation: format!(
                    "Analyze drivers of the positive {} variance and replicate successful strategies.",
                    metric
                ),
                rationale: format!(
                    "Recent {:.1}% increase in {}.",
                    variance.variance_pct, variance.period
                ),
            });
        } else if variance.variance_pct < -ATTENTION_THRESHOLD_PCT {
            recommendations.push(Recommendation {
                category: "Negative Variance".to_string(),
                priority: Priority::High,
                recommendation: format!(
                    "Investigate causes of the {} decline and implement immediate corrective actions.",
                    metric
                ),
                rationale: format!(
                    "Recent {:.1}% decrease in {}.",
                    variance.variance_pct, variance.period
                ),
            });
        }

        recommendations.sort_by_key(|r| r.priority);
        recommendations
    }

    pub async fn handle(&self, classification: &QueryClassification) -> Result<PrescriptivePayload> {
        let metric = handlers::candidate_metrics(classification)[0].clone();
        let fiscal_year = handlers::fiscal_year_from(classification);

        let series = self.data.metric_series(&metric, &fiscal_year, None).await;
        let rows = if series.is_empty {
            self.data.financial_summary(&fiscal_year, None).await
        } else {
            series.rows
        };
        let trend = facts::trend(&rows);

        // Latest closed month drives the variance check.
        let latest_period = rows.last().map(|r| r.period).unwrap_or(Period::Dec);
        let variance = self
            .data
            .variance_analysis(&metric, latest_period, ComparisonKind::MonthOverMonth, &fiscal_year)
            .await;

        let recommendations = Self::recommend(&metric, &trend, &variance);

        let chart = (!rows.is_empty()).then(|| {
            chart::performance_chart(
                &format!("{} performance vs average", metric),
                &metric,
                &rows,
            )
        });

        let related_accounts = handlers::related_accounts(
            self.semantic.as_ref(),
            &handlers::semantic_query(classification, &metric),
            5,
        )
        .await;

        Ok(PrescriptivePayload {
            metric,
            fiscal_year,
            rows,
            trend,
            variance,
            recommendations,
            chart,
            related_accounts,
        })
    }

    pub fn format(&self, payload: &PrescriptivePayload) -> String {
        let mut parts = Vec::new();
        parts.push(format!("Recommendations for {}:", payload.metric));

        parts.push(format!(
            "  Situation: trend {:?} ({:+.1}%), latest {} variance {:+.1}% {}",
            payload.trend.direction,
            payload.trend.growth_pct,
            payload.variance.period,
            payload.variance.variance_pct,
            payload.variance.comparison.label()
        ));

        if payload.recommendations.is_empty() {
            parts.push("  No actionable signal in the current data.".to_string());
        }
        for rec in &payload.recommendations {
            parts.push(format!("  [{}] {}", rec.priority.label(), rec.category));
            parts.push(format!("    {}", rec.recommendation));
            parts.push(format!("    Rationale: {}", rec.rationale));
        }

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
