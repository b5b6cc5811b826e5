use std::path::Path;
use std::sync::Arc;

use finsight::classifier::QueryCategory;
use finsight::config::Settings;
use finsight::data::DataService;
use finsight::engine::QueryEngine;
use finsight::facts::{ComparisonKind, TrendDirection};
use finsight::mock::MockStore;
use finsight::period::{FiscalYear, Period};
use finsight::store::LocalCsvStore;

/// Write a small fixed dataset so scenario assertions can use exact
/// figures: EBITDA resolves to leaf 4000 (plus empty siblings), with
/// Jan=100, Feb=110, Mar=130 in FY24 and Dec=95 in FY23.
fn write_fixture(dir: &Path) -> std::io::Result<()> {
    std::fs::write(
        dir.join("accounts.csv"),
        "Account,Parent,Description\n\
         FCCS_Sales,FCCS_Gross Profit,Sales roll-up\n\
         FCCS_Cost of Sales,FCCS_Gross Profit,Cost of sales roll-up\n\
         FCCS_Gross Profit,FCCS_Operating Income,Gross profit roll-up\n\
         FCCS_Operating Expenses,FCCS_Operating Income,Opex roll-up\n\
         4000,FCCS_Sales,Product revenue\n\
         5000,FCCS_Cost of Sales,Input costs\n\
         6000,FCCS_Operating Expenses,Administration\n",
    )?;
    std::fs::write(
        dir.join("actuals.csv"),
        "Period,Years,Entity,Account,Amount\n\
         Jan,FY24,CFG Ukraine,4000,100\n\
         Feb,FY24,CFG Ukraine,4000,110\n\
         Mar,FY24,CFG Ukraine,4000,130\n\
         Dec,FY23,CFG Ukraine,4000,95\n",
    )?;
    std::fs::write(
        dir.join("budget_forecast.csv"),
        "Period,Years,Entity,Account,Amount,Scenario\n\
         Mar,FY24,CFG Ukraine,4000,120,Budget\n\
         Mar,FY24,CFG Ukraine,4000,125,Forecast\n",
    )?;
    std::fs::write(
        dir.join("entities.csv"),
        "Entity,Parent,Description\nCFG Ukraine,SALIC Portfolio,Agricultural entity\n",
    )?;
    std::fs::write(
        dir.join("departments.csv"),
        "Department,Parent,Description\nD100,Operations,Crop production\n",
    )?;
    Ok(())
}

fn fixture_service(dir: &Path) -> DataService {
    DataService::new(Arc::new(LocalCsvStore::new(dir)))
}

fn fixture_engine(dir: &Path) -> QueryEngine {
    QueryEngine::new(&Settings::default(), Arc::new(LocalCsvStore::new(dir)))
}

#[tokio::test]
async fn test_scenario_a_greeting_is_general() {
    let engine = QueryEngine::new(
        &Settings::default(),
        Arc::new(MockStore::new().expect("mock store")),
    );

    let response = engine.ask("Hello").await.expect("ask");
    assert_eq!(response.classification.category, QueryCategory::General);
    assert!(response.classification.confidence >= 0.9);
    assert!(response.classification.metrics.is_empty());
    assert!(response.chart.is_none());
    assert!(!response.answer.is_empty());
}

#[tokio::test]
async fn test_scenario_b_metric_series_and_trend() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path()).expect("fixture");
    let svc = fixture_service(dir.path());

    let fy = FiscalYear::new("FY24");
    let series = svc.metric_series("EBITDA", &fy, None).await;
    assert!(!series.is_empty);
    assert_eq!(series.rows.len(), 3);
    assert_eq!(series.rows[0].period, Period::Jan);
    assert_eq!(series.rows[0].amount, 100.0);
    assert_eq!(series.rows[1].period, Period::Feb);
    assert_eq!(series.rows[1].amount, 110.0);
    assert_eq!(series.rows[2].period, Period::Mar);
    assert_eq!(series.rows[2].amount, 130.0);

    let trend = finsight::facts::trend(&series.rows);
    assert_eq!(trend.direction, TrendDirection::Increasing);
    assert!((trend.growth_pct - 30.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_scenario_c_variance_march_vs_february() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path()).expect("fixture");
    let svc = fixture_service(dir.path());

    let fy = FiscalYear::new("FY24");
    let v = svc
        .variance_analysis("EBITDA", Period::Mar, ComparisonKind::MonthOverMonth, &fy)
        .await;
    assert_eq!(v.current_value, 130.0);
    assert_eq!(v.previous_value, 110.0);
    assert_eq!(v.variance, 20.0);
    assert!((v.variance_pct - 18.1818).abs() < 1e-3);
    assert_eq!(v.previous_period, Period::Feb);
}

#[tokio::test]
async fn test_scenario_d_unknown_metric_degrades() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path()).expect("fixture");
    let svc = fixture_service(dir.path());

    let fy = FiscalYear::new("FY24");
    let series = svc.metric_series("zzz_unknown", &fy, None).await;
    assert!(series.is_empty);
    assert!(series.rows.is_empty());

    // The full pipeline must still answer, via the unfiltered fallback.
    let engine = fixture_engine(dir.path());
    let response = engine.ask("show me the zzz_unknown trend").await.expect("ask");
    assert!(!response.answer.is_empty());
}

#[tokio::test]
async fn test_january_mom_wraps_to_prior_fiscal_year() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path()).expect("fixture");
    let svc = fixture_service(dir.path());

    let fy = FiscalYear::new("FY24");
    let v = svc
        .variance_analysis("EBITDA", Period::Jan, ComparisonKind::MonthOverMonth, &fy)
        .await;
    assert_eq!(v.previous_period, Period::Dec);
    assert_eq!(v.previous_fiscal_year, FiscalYear::new("FY23"));
    assert_eq!(v.previous_value, 95.0);
    assert_eq!(v.variance, 5.0);
}

#[tokio::test]
async fn test_variance_vs_budget_reads_scenario_table() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path()).expect("fixture");
    let svc = fixture_service(dir.path());

    let fy = FiscalYear::new("FY24");
    let v = svc
        .variance_analysis("EBITDA", Period::Mar, ComparisonKind::VsBudget, &fy)
        .await;
    assert_eq!(v.previous_value, 120.0);
    assert_eq!(v.variance, 10.0);

    let v = svc
        .variance_analysis("EBITDA", Period::Mar, ComparisonKind::VsForecast, &fy)
        .await;
    assert_eq!(v.previous_value, 125.0);
}

#[tokio::test]
async fn test_diagnostic_pipeline_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path()).expect("fixture");
    let engine = fixture_engine(dir.path());

    let response = engine
        .ask("Why did EBITDA change in March?")
        .await
        .expect("ask");
    assert_eq!(response.classification.category, QueryCategory::Diagnostic);
    assert!(response.answer.contains("18.2"));
    assert!(response.chart.is_some());
}

#[tokio::test]
async fn test_predictive_pipeline_projects_forward() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path()).expect("fixture");
    let engine = fixture_engine(dir.path());

    let response = engine
        .ask("Forecast EBITDA for the next quarter")
        .await
        .expect("ask");
    assert_eq!(response.classification.category, QueryCategory::Predictive);
    // Average step over Jan..Mar is 15, so Apr projects to 145.
    assert!(response.answer.contains("145"));
    assert!(response.chart.is_some());
}

#[tokio::test]
async fn test_prescriptive_pipeline_ranks_recommendations() {
    let engine = QueryEngine::new(
        &Settings::default(),
        Arc::new(MockStore::new().expect("mock store")),
    );

    let response = engine
        .ask("How can we improve revenue performance?")
        .await
        .expect("ask");
    assert_eq!(response.classification.category, QueryCategory::Prescriptive);
    assert!(response.answer.contains("Recommendations"));
}

#[tokio::test]
async fn test_descriptive_pipeline_with_semantic_context() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path()).expect("fixture");
    let engine = fixture_engine(dir.path());
    engine.initialize().await;

    let response = engine
        .ask("Show me the EBITDA trend for FY24")
        .await
        .expect("ask");
    assert_eq!(response.classification.category, QueryCategory::Descriptive);
    assert!(response.answer.contains("Trend"));
    assert!(response.chart.is_some());
    // Semantic index was built from accounts.csv, so context rides along.
    assert!(!response.related_accounts.is_empty());
    assert!(response.related_accounts.len() <= 5);

    // The ask warmed the snapshot caches and the hierarchy.
    let status = engine.data().cache_status();
    assert!(status.hierarchy_built);
    assert!(!status.cached_tables.is_empty());
    assert_eq!(status.cached_tables.len(), status.last_checks.len());
}

#[tokio::test]
async fn test_classification_is_stable_across_calls() {
    let engine = QueryEngine::new(
        &Settings::default(),
        Arc::new(MockStore::new().expect("mock store")),
    );
    let first = engine.classify_only("Show me the EBITDA trend").await;
    let second = engine.classify_only("Show me the EBITDA trend").await;
    assert_eq!(first.category, second.category);
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(first.metrics, second.metrics);
}

#[tokio::test]
async fn test_example_queries_cover_all_categories() {
    let examples = QueryEngine::example_queries();
    for category in ["general", "descriptive", "diagnostic", "predictive", "prescriptive"] {
        assert!(examples.contains_key(category), "missing {}", category);
        assert!(!examples[category].is_empty());
    }
}

#[tokio::test]
async fn test_missing_data_directory_still_answers() {
    // Storage failures must degrade, not crash: every table load fails
    // here, so analytic queries fall back to empty data.
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = fixture_engine(dir.path());
    engine.initialize().await;

    let response = engine.ask("Show me the revenue trend").await.expect("ask");
    assert_eq!(response.classification.category, QueryCategory::Descriptive);
    assert!(response.answer.contains("No data"));
}
