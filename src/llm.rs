use crate::error::{FinsightError, Result};
use tracing::debug;

/// Sentinel key that puts the client into offline mode: calls return a
/// canned response instead of hitting the API. Used by tests and the
/// `--mock` CLI path.
pub const DUMMY_API_KEY: &str = "dummy-api-key";

/// Thin OpenAI-compatible client for chat completions and embeddings.
/// Prompt construction and response validation belong to the callers;
/// this owns only the transport.
pub struct LlmClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.api_key == DUMMY_API_KEY || self.api_key.trim().is_empty()
    }

    /// One chat-completion round trip. Low temperature: callers expect
    /// structured JSON back.
    pub async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        if self.is_offline() {
            debug!("LLM client in offline mode, returning canned response");
            return Ok(
                r#"{"category": "descriptive", "confidence": 0.9, "metrics": ["ebitda"], "dimensions": [], "temporal": {"start_period": null, "end_period": null, "granularity": "monthly", "is_forecast": false}, "comparison_type": null, "reasoning": "Canned offline classification"}"#
                    .to_string(),
            );
        }

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": 0.0,
            "max_tokens": 500
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| FinsightError::Llm(format!("LLM API call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FinsightError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| FinsightError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }

    /// Embed a single text. Offline mode is an error here so callers fall
    /// back to the deterministic embedder.
    pub async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        if self.is_offline() {
            return Err(FinsightError::Llm(
                "Embeddings unavailable in offline mode".to_string(),
            ));
        }

        let body = serde_json::json!({
            "model": model,
            "input": text,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| FinsightError::Llm(format!("Embedding API call failed: {}", e)))?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FinsightError::Llm(format!("Failed to parse embedding response: {}", e)))?;

        let embedding = response_json["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| FinsightError::Llm("No embedding in response".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(embedding)
    }
}
