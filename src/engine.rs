//! Query engine: classify, dispatch to the matching category handler,
//! and assemble the response surface the service layer renders from.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::chart::ChartSpec;
use crate::classifier::{QueryCategory, QueryClassification, QueryClassifier};
use crate::config::Settings;
use crate::data::DataService;
use crate::error::Result;
use crate::handlers::{
    DescriptiveHandler, DiagnosticHandler, GeneralHandler, PredictiveHandler, PrescriptiveHandler,
};
use crate::llm::LlmClient;
use crate::semantic::{Collection, Embedder, HashingEmbedder, OpenAiEmbedder, RelatedRecord, VectorSemanticIndex};
use crate::store::{tables, TableStore};

const MAX_RELATED_ACCOUNTS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationSummary {
    pub category: QueryCategory,
    pub confidence: f64,
    pub metrics: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub id: Uuid,
    pub query: String,
    pub classification: ClassificationSummary,
    pub answer: String,
    pub chart: Option<ChartSpec>,
    pub related_accounts: Vec<RelatedRecord>,
    /// The handler's full result payload, stable enough for a rendering
    /// layer to build text and charts from.
    pub data: serde_json::Value,
    pub sources: Vec<String>,
    pub latency_ms: f64,
    pub answered_at: DateTime<Utc>,
}

impl std::fmt::Display for QueryResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "[{} | confidence {:.0}%] {}",
            self.classification.category.label(),
            self.classification.confidence * 100.0,
            self.query
        )?;
        writeln!(f, "{}", self.answer)?;
        if self.chart.is_some() {
            writeln!(f, "(chart description attached)")?;
        }
        write!(f, "answered in {:.0} ms", self.latency_ms)
    }
}

pub struct QueryEngine {
    classifier: QueryClassifier,
    general: GeneralHandler,
    descriptive: DescriptiveHandler,
    diagnostic: DiagnosticHandler,
    predictive: PredictiveHandler,
    prescriptive: PrescriptiveHandler,
    data: Arc<DataService>,
    semantic: Arc<VectorSemanticIndex>,
}

impl QueryEngine {
    pub fn new(settings: &Settings, store: Arc<dyn TableStore>) -> Self {
        let llm = settings.openai_api_key.as_ref().map(|key| {
            Arc::new(LlmClient::new(
                key.clone(),
                settings.openai_model.clone(),
                settings.openai_base_url.clone(),
            ))
        });

        let embedder: Arc<dyn Embedder> = match &llm {
            Some(client) => Arc::new(OpenAiEmbedder::new(
                Arc::clone(client),
                settings.embedding_model.clone(),
            )),
            None => Arc::new(HashingEmbedder::default()),
        };
        let semantic = Arc::new(VectorSemanticIndex::new(embedder));

        let data = Arc::new(DataService::new(store));

        Self {
            classifier: QueryClassifier::new(llm.clone()),
            general: GeneralHandler::new(llm),
            descriptive: DescriptiveHandler::new(Arc::clone(&data), semantic.clone()),
            diagnostic: DiagnosticHandler::new(Arc::clone(&data), semantic.clone()),
            predictive: PredictiveHandler::new(Arc::clone(&data), semantic.clone()),
            prescriptive: PrescriptiveHandler::new(Arc::clone(&data), semantic.clone()),
            data,
            semantic,
        }
    }

    /// Build the semantic index from the reference dimension tables.
    /// Best-effort: an empty or failed table just leaves that collection
    /// unsearchable and every lookup degrades to no context.
    pub async fn initialize(&self) {
        for (table, collection) in [
            (tables::ACCOUNTS, Collection::Accounts),
            (tables::ENTITIES, Collection::Entities),
            (tables::DEPARTMENTS, Collection::Departments),
        ] {
            let records = self.data.dimension(table).await;
            if records.is_empty() {
                continue;
            }
            if let Ok(count) = self.semantic.index_collection(collection, &records).await {
                info!(table, count, "semantic collection indexed");
            }
        }
    }

    pub fn data(&self) -> &Arc<DataService> {
        &self.data
    }

    /// Classification without retrieval (the `/classify` surface).
    pub async fn classify_only(&self, query: &str) -> QueryClassification {
        self.classifier.classify(query).await
    }

    /// Full pipeline: classify, dispatch, format.
    pub async fn ask(&self, query: &str) -> Result<QueryResponse> {
        let started = Instant::now();
        let classification = self.classifier.classify(query).await;
        info!(
            category = classification.category.label(),
            confidence = classification.confidence,
            "query classified"
        );

        let output = match classification.category {
            QueryCategory::General => self.general.run(query, &classification).await?,
            QueryCategory::Descriptive => self.descriptive.run(&classification).await?,
            QueryCategory::Diagnostic => self.diagnostic.run(&classification).await?,
            QueryCategory::Predictive => self.predictive.run(&classification).await?,
            QueryCategory::Prescriptive => self.prescriptive.run(&classification).await?,
        };

        let sources = if classification.category == QueryCategory::General {
            Vec::new()
        } else {
            vec![
                "financial fact store".to_string(),
                "chart-of-accounts hierarchy".to_string(),
                "semantic index".to_string(),
            ]
        };

        let mut related_accounts = output.related_accounts;
        related_accounts.truncate(MAX_RELATED_ACCOUNTS);

        Ok(QueryResponse {
            id: Uuid::new_v4(),
            query: query.to_string(),
            classification: ClassificationSummary {
                category: classification.category,
                confidence: classification.confidence,
                metrics: classification.metrics.clone(),
                reasoning: classification.reasoning.clone(),
            },
            answer: output.answer,
            chart: output.chart,
            related_accounts,
            data: output.data,
            sources,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            answered_at: Utc::now(),
        })
    }

    /// Example queries per category, for the service layer's docs surface.
    pub fn example_queries() -> BTreeMap<&'static str, Vec<&'static str>> {
        BTreeMap::from([
            (
                "general",
                vec![
                    "Hello, what can you do?",
                    "How do I use this system?",
                    "What data do you have access to?",
                ],
            ),
            (
                "descriptive",
                vec![
                    "Show me the EBITDA trend for FY24",
                    "What was the revenue in 2024?",
                    "Display monthly gross profit",
                ],
            ),
            (
                "diagnostic",
                vec![
                    "Why did revenue change in Q3?",
                    "Explain the variance in September",
                    "What caused the gross margin decrease?",
                ],
            ),
            (
                "predictive",
                vec![
                    "Forecast EBITDA for next quarter",
                    "Predict the next 3 months performance",
                    "What's the projected growth rate?",
                ],
            ),
            (
                "prescriptive",
                vec![
                    "What should we do to improve performance?",
                    "How can we optimize our cost structure?",
                    "Give me recommendations for next quarter",
                ],
            ),
        ])
    }
}
