//! Descriptive handler: "What happened?" — historical series, summary
//! statistics, and trend, with a line-chart description.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::chart::{self, ChartSpec};
use crate::classifier::QueryClassification;
use crate::data::DataService;
use crate::error::Result;
use crate::facts::{self, Summary, Trend};
use crate::handlers::{self, HandlerOutput};
use crate::period::FiscalYear;
use crate::semantic::{RelatedRecord, SemanticSearch};

#[derive(Debug, Clone, Serialize)]
pub struct DescriptivePayload {
    pub metric: String,
    pub fiscal_year: FiscalYear,
    pub rows: Vec<crate::facts::PeriodAmount>,
    pub summary: Summary,
    pub trend: Trend,
    /// False when the metric resolved to nothing and the unfiltered
    /// aggregate view was used instead.
    pub metric_filtered: bool,
    pub account_count: usize,
    #[serde(skip)]
    pub chart: Option<ChartSpec>,
    #[serde(skip)]
    pub related_accounts: Vec<RelatedRecord>,
}

pub struct DescriptiveHandler {
    data: Arc<DataService>,
    semantic: Arc<dyn SemanticSearch>,
}

impl DescriptiveHandler {
    pub fn new(data: Arc<DataService>, semantic: Arc<dyn SemanticSearch>) -> Self {
        Self { data, semantic }
    }

    pub async fn handle(&self, classification: &QueryClassification) -> Result<DescriptivePayload> {
        let fiscal_year = handlers::fiscal_year_from(classification);
        let candidates = handlers::candidate_metrics(classification);

        // First candidate with data wins; an unfiltered summary is the
        // final fallback so the user always gets some answer.
        let mut chosen = candidates[0].clone();
        let mut series = None;
        for metric in &candidates {
            let s = self.data.metric_series(metric, &fiscal_year, None).await;
            if !s.is_empty {
                chosen = metric.clone();
                series = Some(s);
                break;
            }
        }

        let (rows, metric_filtered, account_count) = match series {
            Some(s) => (s.rows, true, s.account_count),
            None => {
                info!(metric = %chosen, "metric unresolved, using general financial summary");
                (self.data.financial_summary(&fiscal_year, None).await, false, 0)
            }
        };

        let summary = facts::summarize(&rows);
        let trend = facts::trend(&rows);
        let chart = (!rows.is_empty()).then(|| {
            chart::trend_chart(
                &format!("{} trend ({})", title_case(&chosen), fiscal_year),
                &chosen,
                &rows,
            )
        });

        let related_accounts = handlers::related_accounts(
            self.semantic.as_ref(),
            &handlers::semantic_query(classification, &chosen),
            5,
        )
        .await;

        Ok(DescriptivePayload {
            metric: chosen,
            fiscal_year,
            rows,
            summary,
            trend,
            metric_filtered,
            account_count,
            chart,
            related_accounts,
        })
    }

    pub fn format(&self, payload: &DescriptivePayload) -> String {
        let mut parts = Vec::new();

        if payload.rows.is_empty() {
            return format!(
                "No data found for {} in {}. Try another metric or fiscal year.",
                payload.metric, payload.fiscal_year
            );
        }

        let scope = if payload.metric_filtered {
            format!(
                "{} ({} ledger accounts)",
                title_case(&payload.metric),
                payload.account_count
            )
        } else {
            "all accounts (metric not recognized)".to_string()
        };
        parts.push(format!(
            "{} for {}, {} periods:",
            scope,
            payload.fiscal_year,
            payload.rows.len()
        ));

        parts.push(format!(
            "  Total {:.0} | average {:.0} | min {:.0} | max {:.0}",
            payload.summary.total, payload.summary.average, payload.summary.min, payload.summary.max
        ));

        match payload.trend.direction {
            facts::TrendDirection::InsufficientData => {
                parts.push("  Not enough periods to read a trend.".to_string());
            }
            direction => {
                parts.push(format!(
                    "  Trend: {:?} ({:+.1}% from {} to {})",
                    direction,
                    payload.trend.growth_pct,
                    payload.rows[0].period,
                    payload.rows[payload.rows.len() - 1].period
                ));
            }
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

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
