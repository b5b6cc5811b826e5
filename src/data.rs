//! Data service: cached table snapshots, hierarchy-aware metric lookup,
//! and the aggregation entry points the category handlers call.
//!
//! Caching discipline follows the change-token scheme: within the check
//! interval a cached snapshot is served as-is; past it the token is
//! compared and the table reloaded only when it differs. A failed refresh
//! falls back to the stale snapshot with a warning. The hierarchy index is
//! rebuilt whole whenever the accounts table's token changes and published
//! by atomic swap.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::facts::{
    self, ComparisonKind, FactRow, FactorExplainer, MetricSeries, PeriodAmount, ProjectedPoint,
    Scenario, VarianceAnalysis, WeightedFactorModel,
};
use crate::hierarchy::{AccountHierarchy, HierarchyCache};
use crate::period::{FiscalYear, Period};
use crate::registry::MetricRegistry;
use crate::store::{self, tables, DimensionRecord, TableStore};

/// How long a cached snapshot is trusted before its change token is
/// rechecked.
pub const CACHE_CHECK_INTERVAL: Duration = Duration::from_secs(300);

struct Snapshot {
    df: DataFrame,
    token: Option<String>,
    last_check: Instant,
    last_check_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub cached_tables: Vec<String>,
    pub last_checks: std::collections::BTreeMap<String, DateTime<Utc>>,
    pub hierarchy_built: bool,
    pub check_interval_secs: u64,
}

pub struct DataService {
    store: Arc<dyn TableStore>,
    registry: MetricRegistry,
    hierarchy_cache: HierarchyCache,
    snapshots: RwLock<HashMap<String, Snapshot>>,
    explainer: Box<dyn FactorExplainer>,
}

impl DataService {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self {
            store,
            registry: MetricRegistry::new(),
            hierarchy_cache: HierarchyCache::new(),
            snapshots: RwLock::new(HashMap::new()),
            explainer: Box::new(WeightedFactorModel),
        }
    }

    pub fn with_explainer(mut self, explainer: Box<dyn FactorExplainer>) -> Self {
        self.explainer = explainer;
        self
    }

    // ---- snapshot cache ----

    fn cached(&self, name: &str) -> Option<(DataFrame, Option<String>, Instant)> {
        let guard = self.snapshots.read().unwrap_or_else(|p| p.into_inner());
        guard
            .get(name)
            .map(|s| (s.df.clone(), s.token.clone(), s.last_check))
    }

    fn store_snapshot(&self, name: &str, df: DataFrame, token: Option<String>) {
        let mut guard = self.snapshots.write().unwrap_or_else(|p| p.into_inner());
        guard.insert(
            name.to_string(),
            Snapshot {
                df,
                token,
                last_check: Instant::now(),
                last_check_at: Utc::now(),
            },
        );
    }

    fn touch_snapshot(&self, name: &str) {
        let mut guard = self.snapshots.write().unwrap_or_else(|p| p.into_inner());
        if let Some(s) = guard.get_mut(name) {
            s.last_check = Instant::now();
            s.last_check_at = Utc::now();
        }
    }

    /// Load a table through the smart cache.
    pub async fn table(&self, name: &str) -> Result<DataFrame> {
        if let Some((df, cached_token, last_check)) = self.cached(name) {
            if last_check.elapsed() < CACHE_CHECK_INTERVAL {
                debug!(table = name, "serving cached snapshot within check interval");
                return Ok(df);
            }
            let current = self.store.change_token(name).await.unwrap_or(None);
            if current.is_some() && current == cached_token {
                debug!(table = name, "change token unchanged, reusing snapshot");
                self.touch_snapshot(name);
                return Ok(df);
            }
            info!(table = name, "table changed, refreshing snapshot");
            match self.store.load_table(name).await {
                Ok(fresh) => {
                    self.store_snapshot(name, fresh.clone(), current);
                    return Ok(fresh);
                }
                Err(e) => {
                    warn!(table = name, error = %e, "refresh failed, serving stale snapshot");
                    self.touch_snapshot(name);
                    return Ok(df);
                }
            }
        }

        let token = self.store.change_token(name).await.unwrap_or(None);
        let df = self.store.load_table(name).await?;
        info!(table = name, rows = df.height(), "table loaded");
        self.store_snapshot(name, df.clone(), token);
        Ok(df)
    }

    pub fn clear_cache(&self) {
        let mut guard = self.snapshots.write().unwrap_or_else(|p| p.into_inner());
        guard.clear();
        self.hierarchy_cache.invalidate();
        info!("all caches cleared");
    }

    pub fn cache_status(&self) -> CacheStatus {
        let guard = self.snapshots.read().unwrap_or_else(|p| p.into_inner());
        let mut cached_tables: Vec<String> = guard.keys().cloned().collect();
        cached_tables.sort();
        let last_checks = guard
            .iter()
            .map(|(name, s)| (name.clone(), s.last_check_at))
            .collect();
        CacheStatus {
            cached_tables,
            last_checks,
            hierarchy_built: self.hierarchy_cache.is_built(),
            check_interval_secs: CACHE_CHECK_INTERVAL.as_secs(),
        }
    }

    // ---- hierarchy ----

    /// Current hierarchy index, rebuilt when the accounts table changes.
    /// A failed accounts load degrades to an empty (uncached) index.
    pub async fn hierarchy(&self) -> Arc<AccountHierarchy> {
        let token = self.store.change_token(tables::ACCOUNTS).await.unwrap_or(None);
        if let Some(h) = self.hierarchy_cache.get(token.as_deref()) {
            return h;
        }

        let nodes = match self.table(tables::ACCOUNTS).await {
            Ok(df) => match store::account_nodes(&df) {
                Ok(nodes) => nodes,
                Err(e) => {
                    warn!(error = %e, "account table malformed, hierarchy degraded to empty");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "accounts unavailable, hierarchy degraded to empty");
                return Arc::new(AccountHierarchy::build(&[]));
            }
        };

        // Build fully off-lock, then publish.
        let built = AccountHierarchy::build(&nodes);
        self.hierarchy_cache.store(token, built)
    }

    /// All leaf account codes belonging to a metric phrase. Empty means
    /// "metric unknown" and callers fall back to an unfiltered view.
    pub async fn account_codes_for_metric(&self, metric: &str) -> Vec<String> {
        let hierarchy = self.hierarchy().await;
        let roots = self.registry.resolve_roots(metric, &hierarchy);
        let mut codes = std::collections::BTreeSet::new();
        for root in &roots {
            let leaves = hierarchy.descendants_of(root);
            if !leaves.is_empty() {
                info!(root = %root, leaves = leaves.len(), "resolved metric root");
            }
            codes.extend(leaves);
        }
        codes.into_iter().collect()
    }

    /// The roll-up label recorded for an account code.
    pub async fn account_name(&self, code: &str) -> Option<String> {
        let hierarchy = self.hierarchy().await;
        hierarchy.parent_of(code).map(|s| s.to_string())
    }

    // ---- fact access ----

    async fn actual_rows(&self) -> Vec<FactRow> {
        match self.table(tables::ACTUALS).await {
            Ok(df) => store::fact_rows(&df).unwrap_or_else(|e| {
                warn!(error = %e, "actuals malformed, treating as empty");
                Vec::new()
            }),
            Err(e) => {
                warn!(error = %e, "actuals unavailable, treating as empty");
                Vec::new()
            }
        }
    }

    async fn scenario_rows(&self) -> Vec<(Scenario, FactRow)> {
        match self.table(tables::BUDGET_FORECAST).await {
            Ok(df) => store::scenario_rows(&df).unwrap_or_else(|e| {
                warn!(error = %e, "budget/forecast malformed, treating as empty");
                Vec::new()
            }),
            Err(e) => {
                warn!(error = %e, "budget/forecast unavailable, treating as empty");
                Vec::new()
            }
        }
    }

    fn filter_rows<'a>(
        rows: &'a [FactRow],
        fiscal_year: &str,
        entity: Option<&str>,
        codes: &[String],
    ) -> Vec<&'a FactRow> {
        let entity_lower = entity.map(|e| e.to_lowercase());
        rows.iter()
            .filter(|r| r.fiscal_year == fiscal_year)
            .filter(|r| match &entity_lower {
                Some(needle) => r.entity.to_lowercase().contains(needle),
                None => true,
            })
            .filter(|r| codes.is_empty() || codes.binary_search(&r.account_code).is_ok())
            .collect()
    }

    /// Per-period series for a metric. Unknown metric or empty filter
    /// result comes back with `is_empty = true`, never an error.
    pub async fn metric_series(
        &self,
        metric: &str,
        fiscal_year: &FiscalYear,
        entity: Option<&str>,
    ) -> MetricSeries {
        let codes = self.account_codes_for_metric(metric).await;
        if codes.is_empty() {
            return MetricSeries::empty(metric, fiscal_year);
        }

        let rows = self.actual_rows().await;
        let filtered: Vec<FactRow> = Self::filter_rows(&rows, fiscal_year.as_str(), entity, &codes)
            .into_iter()
            .cloned()
            .collect();
        if filtered.is_empty() {
            return MetricSeries::empty(metric, fiscal_year);
        }

        let grouped = facts::group_by_period(&filtered);
        MetricSeries {
            metric: metric.to_string(),
            fiscal_year: fiscal_year.clone(),
            rows: grouped,
            account_count: codes.len(),
            is_empty: false,
        }
    }

    /// Unfiltered per-period totals, the fallback when no metric resolves.
    pub async fn financial_summary(
        &self,
        fiscal_year: &FiscalYear,
        entity: Option<&str>,
    ) -> Vec<PeriodAmount> {
        let rows = self.actual_rows().await;
        let filtered: Vec<FactRow> = Self::filter_rows(&rows, fiscal_year.as_str(), entity, &[])
            .into_iter()
            .cloned()
            .collect();
        facts::group_by_period(&filtered)
    }

    fn sum_for_period(rows: &[&FactRow], period: Period) -> f64 {
        rows.iter()
            .filter(|r| r.period == period)
            .map(|r| r.amount)
            .sum()
    }

    /// Variance of a metric at `period` against the comparison point
    /// implied by `kind`. A metric that resolves to nothing analyzes the
    /// unfiltered totals (the "total" view).
    pub async fn variance_analysis(
        &self,
        metric: &str,
        period: Period,
        kind: ComparisonKind,
        fiscal_year: &FiscalYear,
    ) -> VarianceAnalysis {
        let mut codes = self.account_codes_for_metric(metric).await;
        codes.sort();

        let rows = self.actual_rows().await;
        let current_rows = Self::filter_rows(&rows, fiscal_year.as_str(), None, &codes);
        let current_value = Self::sum_for_period(&current_rows, period);

        let previous = facts::previous_point(period, fiscal_year, kind);
        let previous_value = match previous.scenario {
            Scenario::Actual => {
                let prev_rows =
                    Self::filter_rows(&rows, previous.fiscal_year.as_str(), None, &codes);
                Self::sum_for_period(&prev_rows, previous.period)
            }
            scenario => {
                let scen_rows = self.scenario_rows().await;
                scen_rows
                    .iter()
                    .filter(|(s, _)| *s == scenario)
                    .filter(|(_, r)| r.fiscal_year == previous.fiscal_year.as_str())
                    .filter(|(_, r)| r.period == previous.period)
                    .filter(|(_, r)| {
                        codes.is_empty() || codes.binary_search(&r.account_code).is_ok()
                    })
                    .map(|(_, r)| r.amount)
                    .sum()
            }
        };

        facts::compute_variance(
            metric,
            period,
            kind,
            &previous,
            current_value,
            previous_value,
            self.explainer.as_ref(),
        )
    }

    /// Historical series plus linear projection for a metric. Falls back
    /// to unfiltered totals when the metric resolves to nothing.
    pub async fn project_metric(
        &self,
        metric: &str,
        fiscal_year: &FiscalYear,
        horizon: usize,
    ) -> (Vec<PeriodAmount>, Vec<ProjectedPoint>) {
        let series = self.metric_series(metric, fiscal_year, None).await;
        let history = if series.is_empty {
            self.financial_summary(fiscal_year, None).await
        } else {
            series.rows
        };
        let projections = facts::project(&history, fiscal_year, horizon);
        (history, projections)
    }

    // ---- introspection ----

    pub fn available_metrics(&self) -> Vec<String> {
        self.registry.known_metrics()
    }

    pub async fn available_years(&self) -> Vec<String> {
        let mut years: Vec<String> = self
            .actual_rows()
            .await
            .iter()
            .map(|r| r.fiscal_year.clone())
            .collect();
        years.sort();
        years.dedup();
        years
    }

    pub async fn available_periods(&self, fiscal_year: &FiscalYear) -> Vec<Period> {
        let mut periods: Vec<Period> = self
            .actual_rows()
            .await
            .iter()
            .filter(|r| r.fiscal_year == fiscal_year.as_str())
            .map(|r| r.period)
            .collect();
        periods.sort();
        periods.dedup();
        periods
    }

    /// Reference dimension rows for semantic indexing, degraded to empty
    /// when the table is unavailable.
    pub async fn dimension(&self, table: &str) -> Vec<DimensionRecord> {
        match self.table(table).await {
            Ok(df) => store::dimension_records(&df).unwrap_or_else(|e| {
                warn!(table, error = %e, "dimension table malformed");
                Vec::new()
            }),
            Err(e) => {
                warn!(table, error = %e, "dimension table unavailable");
                Vec::new()
            }
        }
    }
}
