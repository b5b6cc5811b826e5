//! Table storage seam.
//!
//! The core consumes full snapshots of named tabular datasets plus a
//! change token for cache revalidation. `LocalCsvStore` reads CSV files
//! from a data directory; any connector (lake storage, object store) can
//! stand in behind the same trait.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use polars::prelude::*;
use tracing::warn;

use crate::error::{FinsightError, Result};
use crate::facts::{FactRow, Scenario};
use crate::hierarchy::AccountNode;
use crate::period::Period;

/// Well-known table names.
pub mod tables {
    pub const ACCOUNTS: &str = "accounts";
    pub const ACTUALS: &str = "actuals";
    pub const BUDGET_FORECAST: &str = "budget_forecast";
    pub const ENTITIES: &str = "entities";
    pub const DEPARTMENTS: &str = "departments";
}

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Load the current full snapshot of a named table.
    async fn load_table(&self, name: &str) -> Result<DataFrame>;

    /// Cheap change token for the table (None when the backend cannot
    /// provide one, which forces a reload on every cache check).
    async fn change_token(&self, name: &str) -> Result<Option<String>>;
}

/// CSV-file-backed store: `<data_dir>/<name>.csv`, change tokens derived
/// from file metadata.
pub struct LocalCsvStore {
    data_dir: PathBuf,
}

impl LocalCsvStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.csv", name))
    }

    fn token_for(path: &Path) -> Result<Option<String>> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(Some(format!("{}-{}", meta.len(), mtime)))
    }
}

#[async_trait]
impl TableStore for LocalCsvStore {
    async fn load_table(&self, name: &str) -> Result<DataFrame> {
        let path = self.path_for(name);
        LazyCsvReader::new(&path)
            .with_try_parse_dates(true)
            .with_infer_schema_length(Some(1000))
            .finish()
            .map_err(|e| FinsightError::Store(format!("Failed to read {}: {}", path.display(), e)))?
            .collect()
            .map_err(|e| FinsightError::Store(format!("Failed to collect {}: {}", name, e)))
    }

    async fn change_token(&self, name: &str) -> Result<Option<String>> {
        Self::token_for(&self.path_for(name))
    }
}

// ---- Typed extraction at the DataFrame boundary ----

fn str_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a StringChunked> {
    df.column(name)
        .map_err(|e| FinsightError::Data(format!("Missing column {}: {}", name, e)))?
        .str()
        .map_err(|e| FinsightError::Data(format!("Column {} is not a string column: {}", name, e)))
}

fn f64_column(df: &DataFrame, name: &str) -> Result<Float64Chunked> {
    let series = df
        .column(name)
        .map_err(|e| FinsightError::Data(format!("Missing column {}: {}", name, e)))?;
    let cast = series
        .cast(&DataType::Float64)
        .map_err(|e| FinsightError::Data(format!("Column {} is not numeric: {}", name, e)))?;
    cast.f64()
        .map(|ca| ca.clone())
        .map_err(|e| FinsightError::Data(format!("Column {} cast failed: {}", name, e)))
}

/// Chart-of-accounts rows from the accounts table (`Account`, `Parent`,
/// optional `Description`).
pub fn account_nodes(df: &DataFrame) -> Result<Vec<AccountNode>> {
    let accounts = str_column(df, "Account")?;
    let parents = str_column(df, "Parent")?;
    let descriptions = df.column("Description").ok().and_then(|s| s.str().ok().cloned());

    let mut nodes = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let Some(code) = accounts.get(i) else {
            continue;
        };
        nodes.push(AccountNode {
            code: code.to_string(),
            parent: parents.get(i).map(|p| p.to_string()),
            description: descriptions
                .as_ref()
                .and_then(|d| d.get(i))
                .map(|d| d.to_string()),
        });
    }
    Ok(nodes)
}

/// Ledger rows from a fact table (`Period`, `Years`, `Entity`, `Account`,
/// `Amount`). Rows with an unparseable period label are skipped with a
/// warning rather than failing the load.
pub fn fact_rows(df: &DataFrame) -> Result<Vec<FactRow>> {
    let periods = str_column(df, "Period")?;
    let years = str_column(df, "Years")?;
    let entities = str_column(df, "Entity")?;
    let accounts = str_column(df, "Account")?;
    let amounts = f64_column(df, "Amount")?;

    let mut rows = Vec::with_capacity(df.height());
    let mut skipped = 0usize;
    for i in 0..df.height() {
        let period = periods.get(i).and_then(Period::parse);
        let Some(period) = period else {
            skipped += 1;
            continue;
        };
        rows.push(FactRow {
            period,
            fiscal_year: years.get(i).unwrap_or_default().to_string(),
            entity: entities.get(i).unwrap_or_default().to_string(),
            account_code: accounts.get(i).unwrap_or_default().to_string(),
            amount: amounts.get(i).unwrap_or(0.0),
        });
    }
    if skipped > 0 {
        warn!(skipped, "fact rows with unparseable period labels skipped");
    }
    Ok(rows)
}

/// Scenario-tagged rows from the budget/forecast table (fact columns plus
/// `Scenario`). Rows with unknown scenario labels or unparseable periods
/// are skipped with a warning.
pub fn scenario_rows(df: &DataFrame) -> Result<Vec<(Scenario, FactRow)>> {
    let scenarios = str_column(df, "Scenario")?;
    let periods = str_column(df, "Period")?;
    let years = str_column(df, "Years")?;
    let entities = str_column(df, "Entity")?;
    let accounts = str_column(df, "Account")?;
    let amounts = f64_column(df, "Amount")?;

    let mut out = Vec::with_capacity(df.height());
    let mut skipped = 0usize;
    for i in 0..df.height() {
        let scenario = match scenarios.get(i).map(|s| s.trim().to_lowercase()).as_deref() {
            Some("budget") => Scenario::Budget,
            Some("forecast") => Scenario::Forecast,
            Some("actual") => Scenario::Actual,
            _ => {
                skipped += 1;
                continue;
            }
        };
        let Some(period) = periods.get(i).and_then(Period::parse) else {
            skipped += 1;
            continue;
        };
        out.push((
            scenario,
            FactRow {
                period,
                fiscal_year: years.get(i).unwrap_or_default().to_string(),
                entity: entities.get(i).unwrap_or_default().to_string(),
                account_code: accounts.get(i).unwrap_or_default().to_string(),
                amount: amounts.get(i).unwrap_or(0.0),
            },
        ));
    }
    if skipped > 0 {
        warn!(skipped, "scenario rows skipped during extraction");
    }
    Ok(out)
}

/// A labeled row from a reference dimension table, for semantic indexing.
#[derive(Debug, Clone)]
pub struct DimensionRecord {
    pub label: String,
    pub parent: Option<String>,
    pub description: Option<String>,
}

/// Extract dimension records using the first matching label column.
pub fn dimension_records(df: &DataFrame) -> Result<Vec<DimensionRecord>> {
    const LABEL_CANDIDATES: [&str; 4] = ["Account", "Entity", "Department", "Name"];
    let label_col = LABEL_CANDIDATES
        .iter()
        .find(|c| df.column(c).is_ok())
        .ok_or_else(|| {
            FinsightError::Data(format!(
                "No label column among {:?} in dimension table",
                LABEL_CANDIDATES
            ))
        })?;

    let labels = str_column(df, label_col)?;
    let parents = df.column("Parent").ok().and_then(|s| s.str().ok().cloned());
    let descriptions = df.column("Description").ok().and_then(|s| s.str().ok().cloned());

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let Some(label) = labels.get(i) else {
            continue;
        };
        records.push(DimensionRecord {
            label: label.to_string(),
            parent: parents.as_ref().and_then(|p| p.get(i)).map(|p| p.to_string()),
            description: descriptions
                .as_ref()
                .and_then(|d| d.get(i))
                .map(|d| d.to_string()),
        });
    }
    Ok(records)
}
