//! Semantic search over reference dimension tables.
//!
//! Best-effort by contract: every failure degrades to an empty result
//! list, never an error surfaced to the query pipeline. The in-memory
//! index embeds each dimension row once and answers queries by cosine
//! similarity.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FinsightError, Result};
use crate::llm::LlmClient;
use crate::store::DimensionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Accounts,
    Entities,
    Departments,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedRecord {
    pub label: String,
    pub parent: Option<String>,
    pub description: Option<String>,
    pub score: f32,
}

#[async_trait]
pub trait SemanticSearch: Send + Sync {
    async fn search(
        &self,
        collection: Collection,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<RelatedRecord>>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic offline embedder: hashed bag-of-tokens, L2-normalized.
/// Crude, but keeps the whole pipeline functional with no API access and
/// gives tests stable results.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// Embedder backed by the LLM provider's embeddings endpoint.
pub struct OpenAiEmbedder {
    client: Arc<LlmClient>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(client: Arc<LlmClient>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client.embed(&self.model, text).await
    }
}

struct IndexedDoc {
    label: String,
    parent: Option<String>,
    description: Option<String>,
    embedding: Vec<f32>,
}

/// In-memory per-collection vector index with cosine ranking.
pub struct VectorSemanticIndex {
    embedder: Arc<dyn Embedder>,
    collections: RwLock<HashMap<Collection, Vec<IndexedDoc>>>,
}

impl VectorSemanticIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn doc_text(record: &DimensionRecord) -> String {
        let mut text = record.label.clone();
        if let Some(parent) = &record.parent {
            text.push(' ');
            text.push_str(parent);
        }
        if let Some(desc) = &record.description {
            text.push(' ');
            text.push_str(desc);
        }
        text
    }

    /// Embed and index one collection's rows, replacing any prior index
    /// for that collection. Individual embedding failures skip the row.
    pub async fn index_collection(
        &self,
        collection: Collection,
        records: &[DimensionRecord],
    ) -> Result<usize> {
        let mut docs = Vec::with_capacity(records.len());
        for record in records {
            match self.embedder.embed(&Self::doc_text(record)).await {
                Ok(embedding) => docs.push(IndexedDoc {
                    label: record.label.clone(),
                    parent: record.parent.clone(),
                    description: record.description.clone(),
                    embedding,
                }),
                Err(e) => {
                    warn!(label = %record.label, error = %e, "embedding failed, row skipped");
                }
            }
        }
        let indexed = docs.len();
        debug!(?collection, indexed, "collection indexed");
        let mut guard = self.collections.write().unwrap_or_else(|p| p.into_inner());
        guard.insert(collection, docs);
        Ok(indexed)
    }

    pub fn indexed_count(&self, collection: Collection) -> usize {
        let guard = self.collections.read().unwrap_or_else(|p| p.into_inner());
        guard.get(&collection).map(|d| d.len()).unwrap_or(0)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl SemanticSearch for VectorSemanticIndex {
    async fn search(
        &self,
        collection: Collection,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<RelatedRecord>> {
        let query = self.embedder.embed(query_text).await?;

        let guard = self.collections.read().unwrap_or_else(|p| p.into_inner());
        let Some(docs) = guard.get(&collection) else {
            return Err(FinsightError::Semantic(format!(
                "Collection {:?} not indexed",
                collection
            )));
        };

        let mut results: Vec<RelatedRecord> = docs
            .iter()
            .map(|doc| RelatedRecord {
                label: doc.label.clone(),
                parent: doc.parent.clone(),
                description: doc.description.clone(),
                score: cosine_similarity(&query, &doc.embedding).clamp(0.0, 1.0),
            })
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);
        Ok(results)
    }
}
