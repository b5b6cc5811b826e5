//! Synthetic data source for demos and tests.
//!
//! Generates a small FCCS-style chart of accounts and two fiscal years of
//! monthly actuals plus a budget/forecast scenario table. Seeded RNG keeps
//! every run identical, so tests can assert concrete shapes.

use async_trait::async_trait;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{FinsightError, Result};
use crate::period::ALL_PERIODS;
use crate::store::{tables, TableStore};

const MOCK_SEED: u64 = 42;

/// Leaf P&L accounts and their roll-up parents.
const PNL_LEAVES: [(&str, &str, f64); 6] = [
    ("4000", "FCCS_Sales", 90_000.0),
    ("4010", "FCCS_Sales", 35_000.0),
    ("5000", "FCCS_Cost of Sales", -42_000.0),
    ("5010", "FCCS_Cost of Sales", -18_000.0),
    ("6000", "FCCS_Operating Expenses", -15_000.0),
    ("6010", "FCCS_Operating Expenses", -6_500.0),
];

/// Roll-up structure above the leaves.
const BRANCHES: [(&str, &str); 12] = [
    ("FCCS_Sales", "FCCS_Gross Profit"),
    ("FCCS_Cost of Sales", "FCCS_Gross Profit"),
    ("FCCS_Gross Profit", "FCCS_Operating Income"),
    ("FCCS_Operating Expenses", "FCCS_Operating Income"),
    ("FCCS_Operating Income", "FCCS_Net Income"),
    ("FCCS_Net Income", "FCCS_Income Statement"),
    ("FCCS_Cash And Cash Equivalents", "FCCS_Current Assets"),
    ("FCCS_Acct Receivable", "FCCS_Current Assets"),
    ("FCCS_Inventories", "FCCS_Current Assets"),
    ("FCCS_Current Assets", "FCCS_Total Assets"),
    ("FCCS_Total Assets", "FCCS_Balance Sheet"),
    ("FCCS_Retained Earnings", "FCCS_Total Equity"),
];

const BS_LEAVES: [(&str, &str, f64); 4] = [
    ("1000", "FCCS_Cash And Cash Equivalents", 120_000.0),
    ("1100", "FCCS_Acct Receivable", 64_000.0),
    ("1200", "FCCS_Inventories", 38_000.0),
    ("3000", "FCCS_Retained Earnings", 210_000.0),
];

const ENTITIES: [&str; 3] = ["CFG Ukraine", "CFG Trading", "CFG Farming"];

const FISCAL_YEARS: [&str; 2] = ["FY23", "FY24"];

/// In-memory synthetic store. A replaceable stand-in for the real
/// storage connector.
pub struct MockStore {
    accounts: DataFrame,
    actuals: DataFrame,
    budget_forecast: DataFrame,
    entities: DataFrame,
    departments: DataFrame,
}

impl MockStore {
    pub fn new() -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(MOCK_SEED);
        Ok(Self {
            accounts: build_accounts()?,
            actuals: build_actuals(&mut rng)?,
            budget_forecast: build_budget_forecast(&mut rng)?,
            entities: build_entities()?,
            departments: build_departments()?,
        })
    }
}

#[async_trait]
impl TableStore for MockStore {
    async fn load_table(&self, name: &str) -> Result<DataFrame> {
        let df = match name {
            tables::ACCOUNTS => &self.accounts,
            tables::ACTUALS => &self.actuals,
            tables::BUDGET_FORECAST => &self.budget_forecast,
            tables::ENTITIES => &self.entities,
            tables::DEPARTMENTS => &self.departments,
            other => {
                return Err(FinsightError::Store(format!("Unknown mock table: {}", other)));
            }
        };
        Ok(df.clone())
    }

    async fn change_token(&self, _name: &str) -> Result<Option<String>> {
        // Static data never changes within a process.
        Ok(Some("mock-v1".to_string()))
    }
}

fn polars_err(e: PolarsError) -> FinsightError {
    FinsightError::Polars(e.to_string())
}

fn build_accounts() -> Result<DataFrame> {
    let mut account = Vec::new();
    let mut parent = Vec::new();
    let mut description = Vec::new();

    for (code, p, _) in PNL_LEAVES.iter().chain(BS_LEAVES.iter()) {
        account.push(code.to_string());
        parent.push(p.to_string());
        description.push(format!("Leaf account {}", code));
    }
    for (child, p) in BRANCHES {
        account.push(child.to_string());
        parent.push(p.to_string());
        description.push(format!("Roll-up {}", child));
    }

    df![
        "Account" => account,
        "Parent" => parent,
        "Description" => description,
    ]
    .map_err(polars_err)
}

/// Monthly actuals: each leaf drifts upward month over month with noise,
/// so FY24 trends read as increasing.
fn build_actuals(rng: &mut StdRng) -> Result<DataFrame> {
    let mut period = Vec::new();
    let mut years = Vec::new();
    let mut entity = Vec::new();
    let mut account = Vec::new();
    let mut amount = Vec::new();

    for fy in FISCAL_YEARS {
        let year_scale = if fy == "FY23" { 0.88 } else { 1.0 };
        for (code, _, base) in PNL_LEAVES.iter().chain(BS_LEAVES.iter()) {
            for (m, p) in ALL_PERIODS.iter().enumerate() {
                let drift = 1.0 + 0.015 * m as f64;
                let noise = rng.gen_range(0.97..1.03);
                period.push(p.label().to_string());
                years.push(fy.to_string());
                entity.push(ENTITIES[m % ENTITIES.len()].to_string());
                account.push(code.to_string());
                amount.push(base * year_scale * drift * noise);
            }
        }
    }

    df![
        "Period" => period,
        "Years" => years,
        "Entity" => entity,
        "Account" => account,
        "Amount" => amount,
    ]
    .map_err(polars_err)
}

fn build_budget_forecast(rng: &mut StdRng) -> Result<DataFrame> {
    let mut period = Vec::new();
    let mut years = Vec::new();
    let mut entity = Vec::new();
    let mut account = Vec::new();
    let mut amount = Vec::new();
    let mut scenario = Vec::new();

    for scen in ["Budget", "Forecast"] {
        let scale = if scen == "Budget" { 0.95 } else { 1.02 };
        for (code, _, base) in PNL_LEAVES {
            for (m, p) in ALL_PERIODS.iter().enumerate() {
                let drift = 1.0 + 0.012 * m as f64;
                let noise = rng.gen_range(0.98..1.02);
                period.push(p.label().to_string());
                years.push("FY24".to_string());
                entity.push(ENTITIES[m % ENTITIES.len()].to_string());
                account.push(code.to_string());
                amount.push(base * scale * drift * noise);
                scenario.push(scen.to_string());
            }
        }
    }

    df![
        "Period" => period,
        "Years" => years,
        "Entity" => entity,
        "Account" => account,
        "Amount" => amount,
        "Scenario" => scenario,
    ]
    .map_err(polars_err)
}

fn build_entities() -> Result<DataFrame> {
    df![
        "Entity" => ENTITIES.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
        "Parent" => vec!["SALIC Portfolio".to_string(); ENTITIES.len()],
        "Description" => vec![
            "Agricultural production entity".to_string(),
            "Commodity trading arm".to_string(),
            "Farming operations".to_string(),
        ],
    ]
    .map_err(polars_err)
}

fn build_departments() -> Result<DataFrame> {
    df![
        "Department" => ["D100", "D200", "D300"].map(String::from).to_vec(),
        "Parent" => ["Operations", "Operations", "Corporate"].map(String::from).to_vec(),
        "Description" => [
            "Crop production",
            "Logistics and storage",
            "Finance and administration",
        ]
        .map(String::from)
        .to_vec(),
    ]
    .map_err(polars_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{account_nodes, fact_rows, scenario_rows};

    #[tokio::test]
    async fn test_mock_tables_extract() {
        let store = MockStore::new().unwrap();

        let accounts = store.load_table(tables::ACCOUNTS).await.unwrap();
        let nodes = account_nodes(&accounts).unwrap();
        assert!(nodes.iter().any(|n| n.code == "4000"));
        assert!(nodes.iter().any(|n| n.code == "FCCS_Gross Profit"));

        let actuals = store.load_table(tables::ACTUALS).await.unwrap();
        let rows = fact_rows(&actuals).unwrap();
        // 10 leaves x 12 months x 2 years
        assert_eq!(rows.len(), 240);

        let bf = store.load_table(tables::BUDGET_FORECAST).await.unwrap();
        let scen = scenario_rows(&bf).unwrap();
        assert_eq!(scen.len(), 144);
    }

    #[tokio::test]
    async fn test_mock_is_deterministic() {
        let a = MockStore::new().unwrap();
        let b = MockStore::new().unwrap();
        let df_a = a.load_table(tables::ACTUALS).await.unwrap();
        let df_b = b.load_table(tables::ACTUALS).await.unwrap();
        assert_eq!(df_a, df_b);
    }
}
