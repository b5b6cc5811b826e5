//! Fact-table aggregation: per-period series, summary statistics, trend
//! classification, variance analysis, and linear projection.
//!
//! Everything here is pure in-memory computation over typed rows; filtering
//! and table loading live in the data service. Thresholds are named
//! constants so boundary behavior is testable exactly.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::period::{FiscalYear, Period};

/// Growth beyond +/- this percentage classifies a trend as moving.
pub const TREND_THRESHOLD_PCT: f64 = 5.0;

/// Projection uses at most this many trailing observed periods.
pub const PROJECTION_WINDOW: usize = 8;
/// Fewer observed periods than this yields an empty projection.
pub const PROJECTION_MIN_HISTORY: usize = 3;
pub const PROJECTION_BASE_CONFIDENCE: f64 = 0.85;
pub const PROJECTION_CONFIDENCE_STEP: f64 = 0.10;
pub const PROJECTION_CONFIDENCE_FLOOR: f64 = 0.05;

/// One transactional ledger row.
#[derive(Debug, Clone)]
pub struct FactRow {
    pub period: Period,
    pub fiscal_year: String,
    pub entity: String,
    pub account_code: String,
    pub amount: f64,
}

/// Which dataset a scenario row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scenario {
    Actual,
    Budget,
    Forecast,
}

/// A per-period aggregated amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodAmount {
    pub period: Period,
    pub amount: f64,
}

/// Aggregated series for one metric and fiscal year, in canonical
/// Jan..Dec order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSeries {
    pub metric: String,
    pub fiscal_year: FiscalYear,
    pub rows: Vec<PeriodAmount>,
    pub account_count: usize,
    pub is_empty: bool,
}

impl MetricSeries {
    pub fn empty(metric: &str, fiscal_year: &FiscalYear) -> Self {
        Self {
            metric: metric.to_string(),
            fiscal_year: fiscal_year.clone(),
            rows: Vec::new(),
            account_count: 0,
            is_empty: true,
        }
    }

    pub fn amounts(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.amount).collect()
    }
}

/// Group filtered fact rows by period, summing amounts, sorted canonically.
pub fn group_by_period(rows: &[FactRow]) -> Vec<PeriodAmount> {
    rows.iter()
        .map(|r| (r.period, r.amount))
        .into_grouping_map()
        .sum()
        .into_iter()
        .sorted_by_key(|(period, _)| *period)
        .map(|(period, amount)| PeriodAmount { period, amount })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Aggregate statistics over a series. Defined as all-zero for empty input
/// so downstream formatting never sees NaN.
pub fn summarize(rows: &[PeriodAmount]) -> Summary {
    if rows.is_empty() {
        return Summary {
            total: 0.0,
            average: 0.0,
            min: 0.0,
            max: 0.0,
            count: 0,
        };
    }
    let amounts: Vec<f64> = rows.iter().map(|r| r.amount).collect();
    let total: f64 = amounts.iter().sum();
    Summary {
        total,
        average: total / amounts.len() as f64,
        min: amounts.iter().cloned().fold(f64::INFINITY, f64::min),
        max: amounts.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        count: amounts.len(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub direction: TrendDirection,
    pub growth_pct: f64,
    pub start_value: f64,
    pub end_value: f64,
}

/// Classify first-to-last growth. Exactly +/-5.0% is stable; a zero start
/// value yields zero growth rather than a division error.
pub fn trend(rows: &[PeriodAmount]) -> Trend {
    if rows.len() < 2 {
        return Trend {
            direction: TrendDirection::InsufficientData,
            growth_pct: 0.0,
            start_value: rows.first().map(|r| r.amount).unwrap_or(0.0),
            end_value: rows.last().map(|r| r.amount).unwrap_or(0.0),
        };
    }
    let first = rows[0].amount;
    let last = rows[rows.len() - 1].amount;
    let growth_pct = if first == 0.0 {
        0.0
    } else {
        (last / first - 1.0) * 100.0
    };
    let direction = if growth_pct > TREND_THRESHOLD_PCT {
        TrendDirection::Increasing
    } else if growth_pct < -TREND_THRESHOLD_PCT {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };
    Trend {
        direction,
        growth_pct,
        start_value: first,
        end_value: last,
    }
}

/// Comparison kinds for variance analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonKind {
    #[serde(rename = "MoM")]
    MonthOverMonth,
    #[serde(rename = "QoQ")]
    QuarterOverQuarter,
    #[serde(rename = "YoY")]
    YearOverYear,
    #[serde(rename = "vs_budget")]
    VsBudget,
    #[serde(rename = "vs_forecast")]
    VsForecast,
}

impl ComparisonKind {
    pub fn label(&self) -> &'static str {
        match self {
            ComparisonKind::MonthOverMonth => "MoM",
            ComparisonKind::QuarterOverQuarter => "QoQ",
            ComparisonKind::YearOverYear => "YoY",
            ComparisonKind::VsBudget => "vs_budget",
            ComparisonKind::VsForecast => "vs_forecast",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mom" | "month over month" => Some(ComparisonKind::MonthOverMonth),
            "qoq" | "quarter over quarter" => Some(ComparisonKind::QuarterOverQuarter),
            "yoy" | "year over year" => Some(ComparisonKind::YearOverYear),
            "vs_budget" | "budget" => Some(ComparisonKind::VsBudget),
            "vs_forecast" | "forecast" => Some(ComparisonKind::VsForecast),
            _ => None,
        }
    }
}

/// The reference point a variance compares against: a period, the fiscal
/// year holding it, and which dataset to read it from.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonPoint {
    pub period: Period,
    pub fiscal_year: FiscalYear,
    pub scenario: Scenario,
}

/// Select the previous point for a comparison. MoM at the fiscal-year
/// boundary wraps: January compares against December of the prior fiscal
/// year. QoQ wraps the same way for Jan..Mar.
pub fn previous_point(
    period: Period,
    fiscal_year: &FiscalYear,
    kind: ComparisonKind,
) -> ComparisonPoint {
    match kind {
        ComparisonKind::MonthOverMonth => {
            let (prev, wrapped) = period.prev();
            let fy = if wrapped {
                fiscal_year.prev()
            } else {
                fiscal_year.clone()
            };
            ComparisonPoint {
                period: prev,
                fiscal_year: fy,
                scenario: Scenario::Actual,
            }
        }
        ComparisonKind::QuarterOverQuarter => {
            let (prev, wrapped) = period.minus_months(3);
            let fy = if wrapped {
                fiscal_year.prev()
            } else {
                fiscal_year.clone()
            };
            ComparisonPoint {
                period: prev,
                fiscal_year: fy,
                scenario: Scenario::Actual,
            }
        }
        ComparisonKind::YearOverYear => ComparisonPoint {
            period,
            fiscal_year: fiscal_year.prev(),
            scenario: Scenario::Actual,
        },
        ComparisonKind::VsBudget => ComparisonPoint {
            period,
            fiscal_year: fiscal_year.clone(),
            scenario: Scenario::Budget,
        },
        ComparisonKind::VsForecast => ComparisonPoint {
            period,
            fiscal_year: fiscal_year.clone(),
            scenario: Scenario::Forecast,
        },
    }
}

/// A named contributor to a variance. Illustrative metadata, not a
/// statistically derived attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceFactor {
    pub factor: String,
    pub impact_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceAnalysis {
    pub metric: String,
    pub period: Period,
    pub comparison: ComparisonKind,
    pub previous_period: Period,
    pub previous_fiscal_year: FiscalYear,
    pub current_value: f64,
    pub previous_value: f64,
    pub variance: f64,
    pub variance_pct: f64,
    pub factors: Vec<VarianceFactor>,
}

/// Strategy for breaking a variance into named contributing factors.
/// The default is formulaic; a real driver-analysis model can be swapped
/// in without touching the aggregator.
pub trait FactorExplainer: Send + Sync {
    fn explain(&self, metric: &str, variance: f64, variance_pct: f64) -> Vec<VarianceFactor>;
}

/// Default explainer: splits the variance percentage across three fixed
/// contributors so the impacts sum to the total.
pub struct WeightedFactorModel;

const FACTOR_WEIGHTS: [(&str, f64); 3] = [
    ("Volume changes", 0.40),
    ("Price fluctuations", 0.35),
    ("Cost structure", 0.25),
];

impl FactorExplainer for WeightedFactorModel {
    fn explain(&self, _metric: &str, _variance: f64, variance_pct: f64) -> Vec<VarianceFactor> {
        FACTOR_WEIGHTS
            .iter()
            .map(|(name, weight)| VarianceFactor {
                factor: name.to_string(),
                impact_pct: variance_pct * weight,
            })
            .collect()
    }
}

/// Combine two aggregated totals into a variance record. `variance_pct`
/// is zero-guarded against an empty or zero previous period.
pub fn compute_variance(
    metric: &str,
    period: Period,
    kind: ComparisonKind,
    previous: &ComparisonPoint,
    current_value: f64,
    previous_value: f64,
    explainer: &dyn FactorExplainer,
) -> VarianceAnalysis {
    let variance = current_value - previous_value;
    let variance_pct = if previous_value == 0.0 {
        0.0
    } else {
        variance / previous_value * 100.0
    };
    VarianceAnalysis {
        metric: metric.to_string(),
        period,
        comparison: kind,
        previous_period: previous.period,
        previous_fiscal_year: previous.fiscal_year.clone(),
        current_value,
        previous_value,
        variance,
        variance_pct,
        factors: explainer.explain(metric, variance, variance_pct),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub period: Period,
    pub fiscal_year: FiscalYear,
    pub projected_amount: f64,
    pub confidence: f64,
}

/// Linear extrapolation over the trailing observation window: the average
/// per-step delta is added cumulatively to the last observed value.
/// Confidence decays per horizon step and never reaches zero. Fewer than
/// `PROJECTION_MIN_HISTORY` observations yields an empty projection.
pub fn project(
    rows: &[PeriodAmount],
    fiscal_year: &FiscalYear,
    horizon: usize,
) -> Vec<ProjectedPoint> {
    if rows.len() < PROJECTION_MIN_HISTORY || horizon == 0 {
        return Vec::new();
    }
    let window = &rows[rows.len().saturating_sub(PROJECTION_WINDOW)..];
    let first = window[0].amount;
    let last = window[window.len() - 1].amount;
    let step = (last - first) / (window.len() - 1) as f64;

    let mut out = Vec::with_capacity(horizon);
    let mut period = rows[rows.len() - 1].period;
    let mut fy = fiscal_year.clone();
    for i in 0..horizon {
        let (next, wrapped) = period.next();
        period = next;
        if wrapped {
            fy = fy.next();
        }
        let confidence = (PROJECTION_BASE_CONFIDENCE - PROJECTION_CONFIDENCE_STEP * i as f64)
            .max(PROJECTION_CONFIDENCE_FLOOR);
        out.push(ProjectedPoint {
            period,
            fiscal_year: fy.clone(),
            projected_amount: last + step * (i + 1) as f64,
            confidence,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pa(period: Period, amount: f64) -> PeriodAmount {
        PeriodAmount { period, amount }
    }

    #[test]
    fn test_group_by_period_canonical_order() {
        let rows = vec![
            FactRow {
                period: Period::Oct,
                fiscal_year: "FY24".into(),
                entity: "E1".into(),
                account_code: "4000".into(),
                amount: 5.0,
            },
            FactRow {
                period: Period::Jan,
                fiscal_year: "FY24".into(),
                entity: "E1".into(),
                account_code: "4000".into(),
                amount: 1.0,
            },
            FactRow {
                period: Period::Jan,
                fiscal_year: "FY24".into(),
                entity: "E1".into(),
                account_code: "4010".into(),
                amount: 2.0,
            },
        ];
        let grouped = group_by_period(&rows);
        assert_eq!(grouped, vec![pa(Period::Jan, 3.0), pa(Period::Oct, 5.0)]);
    }

    #[test]
    fn test_summarize_empty_is_zero() {
        let s = summarize(&[]);
        assert_eq!(s.total, 0.0);
        assert_eq!(s.average, 0.0);
        assert_eq!(s.min, 0.0);
        assert_eq!(s.max, 0.0);
        assert_eq!(s.count, 0);
    }

    #[test]
    fn test_summarize_basic() {
        let s = summarize(&[pa(Period::Jan, 100.0), pa(Period::Feb, 110.0), pa(Period::Mar, 130.0)]);
        assert_eq!(s.total, 340.0);
        assert!((s.average - 340.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.min, 100.0);
        assert_eq!(s.max, 130.0);
        assert_eq!(s.count, 3);
    }

    #[test]
    fn test_trend_insufficient_data() {
        assert_eq!(trend(&[]).direction, TrendDirection::InsufficientData);
        assert_eq!(
            trend(&[pa(Period::Jan, 10.0)]).direction,
            TrendDirection::InsufficientData
        );
    }

    #[test]
    fn test_trend_directions() {
        let up = trend(&[pa(Period::Jan, 100.0), pa(Period::Mar, 130.0)]);
        assert_eq!(up.direction, TrendDirection::Increasing);
        assert!((up.growth_pct - 30.0).abs() < 1e-9);

        let down = trend(&[pa(Period::Jan, 100.0), pa(Period::Mar, 90.0)]);
        assert_eq!(down.direction, TrendDirection::Decreasing);

        let flat = trend(&[pa(Period::Jan, 100.0), pa(Period::Mar, 102.0)]);
        assert_eq!(flat.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_trend_boundary_exactly_five_pct_is_stable() {
        let t = trend(&[pa(Period::Jan, 100.0), pa(Period::Feb, 105.0)]);
        assert!((t.growth_pct - 5.0).abs() < 1e-9);
        assert_eq!(t.direction, TrendDirection::Stable);

        let t = trend(&[pa(Period::Jan, 100.0), pa(Period::Feb, 95.0)]);
        assert!((t.growth_pct + 5.0).abs() < 1e-9);
        assert_eq!(t.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_trend_zero_start_guard() {
        let t = trend(&[pa(Period::Jan, 0.0), pa(Period::Feb, 50.0)]);
        assert_eq!(t.growth_pct, 0.0);
        assert_eq!(t.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_previous_point_mom_wraps_fiscal_year() {
        let fy = FiscalYear::new("FY24");
        let p = previous_point(Period::Jan, &fy, ComparisonKind::MonthOverMonth);
        assert_eq!(p.period, Period::Dec);
        assert_eq!(p.fiscal_year, FiscalYear::new("FY23"));

        let p = previous_point(Period::Mar, &fy, ComparisonKind::MonthOverMonth);
        assert_eq!(p.period, Period::Feb);
        assert_eq!(p.fiscal_year, fy);
    }

    #[test]
    fn test_previous_point_yoy_and_budget() {
        let fy = FiscalYear::new("FY24");
        let p = previous_point(Period::Sep, &fy, ComparisonKind::YearOverYear);
        assert_eq!(p.period, Period::Sep);
        assert_eq!(p.fiscal_year, FiscalYear::new("FY23"));
        assert_eq!(p.scenario, Scenario::Actual);

        let p = previous_point(Period::Sep, &fy, ComparisonKind::VsBudget);
        assert_eq!(p.period, Period::Sep);
        assert_eq!(p.fiscal_year, fy);
        assert_eq!(p.scenario, Scenario::Budget);
    }

    #[test]
    fn test_compute_variance_march_vs_february() {
        let fy = FiscalYear::new("FY24");
        let prev = previous_point(Period::Mar, &fy, ComparisonKind::MonthOverMonth);
        let v = compute_variance(
            "ebitda",
            Period::Mar,
            ComparisonKind::MonthOverMonth,
            &prev,
            130.0,
            110.0,
            &WeightedFactorModel,
        );
        assert_eq!(v.variance, 20.0);
        assert!((v.variance_pct - 18.181818).abs() < 1e-4);
        assert_eq!(v.factors.len(), 3);
        let impact_sum: f64 = v.factors.iter().map(|f| f.impact_pct).sum();
        assert!((impact_sum - v.variance_pct).abs() < 1e-9);
    }

    #[test]
    fn test_compute_variance_zero_previous_guard() {
        let fy = FiscalYear::new("FY24");
        let prev = previous_point(Period::Feb, &fy, ComparisonKind::MonthOverMonth);
        let v = compute_variance(
            "revenue",
            Period::Feb,
            ComparisonKind::MonthOverMonth,
            &prev,
            100.0,
            0.0,
            &WeightedFactorModel,
        );
        assert_eq!(v.variance, 100.0);
        assert_eq!(v.variance_pct, 0.0);
    }

    #[test]
    fn test_project_minimum_history() {
        let fy = FiscalYear::new("FY24");
        assert!(project(&[pa(Period::Jan, 1.0), pa(Period::Feb, 2.0)], &fy, 3).is_empty());
    }

    #[test]
    fn test_project_linear_extrapolation() {
        let fy = FiscalYear::new("FY24");
        let rows = vec![
            pa(Period::Oct, 100.0),
            pa(Period::Nov, 110.0),
            pa(Period::Dec, 120.0),
        ];
        let proj = project(&rows, &fy, 3);
        assert_eq!(proj.len(), 3);
        // Average step is 10; projections continue into the next fiscal year.
        assert_eq!(proj[0].period, Period::Jan);
        assert_eq!(proj[0].fiscal_year, FiscalYear::new("FY25"));
        assert!((proj[0].projected_amount - 130.0).abs() < 1e-9);
        assert!((proj[2].projected_amount - 150.0).abs() < 1e-9);
        assert!((proj[0].confidence - 0.85).abs() < 1e-9);
        assert!((proj[1].confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_project_confidence_floor() {
        let fy = FiscalYear::new("FY24");
        let rows: Vec<PeriodAmount> = (0..8)
            .map(|i| pa(crate::period::ALL_PERIODS[i], 100.0 + i as f64))
            .collect();
        let proj = project(&rows, &fy, 12);
        assert!(proj.iter().all(|p| p.confidence > 0.0));
        assert!((proj.last().map(|p| p.confidence).unwrap_or(1.0)
            - PROJECTION_CONFIDENCE_FLOOR)
            .abs()
            < 1e-9);
    }
}
