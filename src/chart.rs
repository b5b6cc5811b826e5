//! Chart descriptions: pure functions from result data to a serializable
//! spec a rendering layer can draw from. No rendering happens here.

use serde::{Deserialize, Serialize};

use crate::facts::{PeriodAmount, ProjectedPoint, VarianceAnalysis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Bar,
    Waterfall,
    Forecast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub name: String,
    pub dashed: bool,
    pub points: Vec<ChartPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<ChartSeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_line: Option<f64>,
}

fn point(label: impl Into<String>, value: f64) -> ChartPoint {
    ChartPoint {
        label: label.into(),
        value,
        upper: None,
        lower: None,
    }
}

/// Line chart of one metric series over its periods.
pub fn trend_chart(title: &str, metric: &str, rows: &[PeriodAmount]) -> ChartSpec {
    ChartSpec {
        chart_type: ChartType::Line,
        title: title.to_string(),
        x_label: "Period".to_string(),
        y_label: "Amount".to_string(),
        series: vec![ChartSeries {
            name: metric.to_string(),
            dashed: false,
            points: rows
                .iter()
                .map(|r| point(r.period.label(), r.amount))
                .collect(),
        }],
        reference_line: None,
    }
}

/// Waterfall: previous value, one bar per contributing factor, current value.
pub fn waterfall_chart(title: &str, variance: &VarianceAnalysis) -> ChartSpec {
    let mut points = Vec::with_capacity(variance.factors.len() + 2);
    points.push(point(
        format!("{} ({})", variance.previous_period, variance.previous_fiscal_year),
        variance.previous_value,
    ));
    for factor in &variance.factors {
        // Factor impacts are percentages of the previous value.
        points.push(point(
            factor.factor.clone(),
            variance.previous_value * factor.impact_pct / 100.0,
        ));
    }
    points.push(point(variance.period.label(), variance.current_value));

    ChartSpec {
        chart_type: ChartType::Waterfall,
        title: title.to_string(),
        x_label: "Contribution".to_string(),
        y_label: "Amount".to_string(),
        series: vec![ChartSeries {
            name: variance.metric.clone(),
            dashed: false,
            points,
        }],
        reference_line: None,
    }
}

/// Historical line plus dashed projection with a confidence band. Band
/// width grows as confidence shrinks.
pub fn forecast_chart(
    title: &str,
    metric: &str,
    history: &[PeriodAmount],
    projections: &[ProjectedPoint],
) -> ChartSpec {
    let historical = ChartSeries {
        name: format!("{} (actual)", metric),
        dashed: false,
        points: history
            .iter()
            .map(|r| point(r.period.label(), r.amount))
            .collect(),
    };
    let projected = ChartSeries {
        name: format!("{} (projected)", metric),
        dashed: true,
        points: projections
            .iter()
            .map(|p| ChartPoint {
                label: format!("{} {}", p.period, p.fiscal_year),
                value: p.projected_amount,
                upper: Some(p.projected_amount * (1.0 + (1.0 - p.confidence) * 0.5)),
                lower: Some(p.projected_amount * (1.0 - (1.0 - p.confidence) * 0.5)),
            })
            .collect(),
    };

    ChartSpec {
        chart_type: ChartType::Forecast,
        title: title.to_string(),
        x_label: "Period".to_string(),
        y_label: "Amount".to_string(),
        series: vec![historical, projected],
        reference_line: None,
    }
}

/// Bar chart of monthly amounts with the period average as a reference line.
pub fn performance_chart(title: &str, metric: &str, rows: &[PeriodAmount]) -> ChartSpec {
    let average = if rows.is_empty() {
        0.0
    } else {
        rows.iter().map(|r| r.amount).sum::<f64>() / rows.len() as f64
    };
    ChartSpec {
        chart_type: ChartType::Bar,
        title: title.to_string(),
        x_label: "Period".to_string(),
        y_label: "Amount".to_string(),
        series: vec![ChartSeries {
            name: metric.to_string(),
            dashed: false,
            points: rows
                .iter()
                .map(|r| point(r.period.label(), r.amount))
                .collect(),
        }],
        reference_line: Some(average),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{
        compute_variance, previous_point, ComparisonKind, WeightedFactorModel,
    };
    use crate::period::{FiscalYear, Period};

    fn rows() -> Vec<PeriodAmount> {
        vec![
            PeriodAmount { period: Period::Jan, amount: 100.0 },
            PeriodAmount { period: Period::Feb, amount: 110.0 },
            PeriodAmount { period: Period::Mar, amount: 130.0 },
        ]
    }

    #[test]
    fn test_trend_chart_shape() {
        let spec = trend_chart("EBITDA Trend", "ebitda", &rows());
        assert_eq!(spec.chart_type, ChartType::Line);
        assert_eq!(spec.series.len(), 1);
        assert_eq!(spec.series[0].points.len(), 3);
        assert_eq!(spec.series[0].points[0].label, "Jan");
    }

    #[test]
    fn test_waterfall_has_endpoints_and_factors() {
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
        let spec = waterfall_chart("Variance", &v);
        // previous + 3 factors + current
        assert_eq!(spec.series[0].points.len(), 5);
        // Factor bars sum to the total variance.
        let factor_sum: f64 = spec.series[0].points[1..4].iter().map(|p| p.value).sum();
        assert!((factor_sum - v.variance).abs() < 1e-9);
    }

    #[test]
    fn test_forecast_chart_band_widens() {
        let fy = FiscalYear::new("FY24");
        let projections = crate::facts::project(&rows(), &fy, 3);
        let spec = forecast_chart("Forecast", "ebitda", &rows(), &projections);
        assert_eq!(spec.series.len(), 2);
        assert!(spec.series[1].dashed);
        let p = &spec.series[1].points;
        let width = |cp: &ChartPoint| cp.upper.unwrap_or(0.0) - cp.lower.unwrap_or(0.0);
        assert!(width(&p[2]) > width(&p[0]));
    }

    #[test]
    fn test_performance_chart_reference_line() {
        let spec = performance_chart("Performance", "revenue", &rows());
        let avg = spec.reference_line.expect("average line");
        assert!((avg - 340.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_specs_serialize() {
        let spec = trend_chart("t", "m", &rows());
        let json = serde_json::to_string(&spec).expect("serializable");
        assert!(json.contains("\"chart_type\":\"line\""));
    }
}
