//! General handler: conversational, capability, and meta questions.
//! Answers from canned intent-keyed responses, optionally rephrased by
//! the LLM when one is available. Never produces a chart.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::classifier::QueryClassification;
use crate::error::Result;
use crate::handlers::HandlerOutput;
use crate::llm::LlmClient;

const SYSTEM_PROMPT: &str = r#"You are the assistant for a financial analytics system.
It classifies questions into descriptive ("what happened"), diagnostic ("why did it happen"),
predictive ("what will happen"), and prescriptive ("what should we do") analytics over
monthly financial data (P&L, balance sheet, budget vs actual).

Answer general questions about the system and how to use it. Be concise and friendly.
Never invent financial figures; for data questions, suggest a specific query instead."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneralIntent {
    Greeting,
    Capabilities,
    About,
    Help,
    Default,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneralPayload {
    pub answer: String,
    pub intent: GeneralIntent,
}

pub struct GeneralHandler {
    llm: Option<Arc<LlmClient>>,
}

impl GeneralHandler {
    pub fn new(llm: Option<Arc<LlmClient>>) -> Self {
        Self { llm }
    }

    fn detect_intent(query: &str) -> GeneralIntent {
        let lower = query.to_lowercase();
        let any = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));

        if any(&["hello", "hi ", "hey", "good morning", "good afternoon", "good evening"])
            || lower.trim() == "hi"
        {
            return GeneralIntent::Greeting;
        }
        if any(&["what can you", "what do you do", "capabilities", "features", "how can you help"]) {
            return GeneralIntent::Capabilities;
        }
        if any(&["who are you", "about yourself", "how do you work", "what system", "what data"]) {
            return GeneralIntent::About;
        }
        if any(&["help", "how to use", "how do i", "get started", "examples"]) {
            return GeneralIntent::Help;
        }
        GeneralIntent::Default
    }

    fn canned_answer(intent: GeneralIntent) -> &'static str {
        match intent {
            GeneralIntent::Greeting => {
                "Hello! I answer questions about the company's financial data.\n\
                 Try: \"Show me the EBITDA trend for FY24\", \"Why did gross margin \
                 decrease in Q3?\", or \"Forecast revenue for next quarter\"."
            }
            GeneralIntent::Capabilities => {
                "I cover four kinds of analytics:\n\
                 - Descriptive: what happened (trends, summaries, historical data)\n\
                 - Diagnostic: why it happened (variance analysis, contributing factors)\n\
                 - Predictive: what will happen (projections with confidence)\n\
                 - Prescriptive: what to do (priority-ranked recommendations)\n\
                 Ask about any P&L or balance-sheet metric, by month, quarter, or year."
            }
            GeneralIntent::About => {
                "I'm a financial analytics assistant. Queries are classified by intent, \
                 metrics are resolved through the chart-of-accounts hierarchy down to \
                 ledger-level accounts, and figures are aggregated from the monthly fact \
                 table, with semantic search over reference data for extra context."
            }
            GeneralIntent::Help => {
                "Ask specific questions and name a metric and a time frame:\n\
                 - \"What was EBITDA in Q3 2024?\"\n\
                 - \"Explain the revenue variance in September\"\n\
                 - \"Forecast gross margin for next quarter\"\n\
                 - \"How can we improve working capital?\""
            }
            GeneralIntent::Default => {
                "I can help with the company's financial data: what happened, why it \
                 happened, what will happen, and what to do about it. Try asking about \
                 a specific metric, like \"Show me the revenue trend for FY24\"."
            }
        }
    }

    pub async fn handle(&self, query: &str, _classification: &QueryClassification) -> Result<GeneralPayload> {
        let intent = Self::detect_intent(query);

        if let Some(llm) = &self.llm {
            match llm.chat(SYSTEM_PROMPT, query).await {
                Ok(answer) if !answer.trim().is_empty() => {
                    return Ok(GeneralPayload { answer, intent });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "general LLM answer failed, using canned response");
                }
            }
        }

        Ok(GeneralPayload {
            answer: Self::canned_answer(intent).to_string(),
            intent,
        })
    }

    pub fn format(&self, payload: &GeneralPayload) -> String {
        payload.answer.clone()
    }

    pub async fn run(&self, query: &str, classification: &QueryClassification) -> Result<HandlerOutput> {
        let payload = self.handle(query, classification).await?;
        Ok(HandlerOutput {
            answer: self.format(&payload),
            chart: None,
            related_accounts: Vec::new(),
            data: serde_json::to_value(&payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_detection() {
        assert_eq!(GeneralHandler::detect_intent("Hello!"), GeneralIntent::Greeting);
        assert_eq!(
            GeneralHandler::detect_intent("What can you do?"),
            GeneralIntent::Capabilities
        );
        assert_eq!(
            GeneralHandler::detect_intent("who are you exactly"),
            GeneralIntent::About
        );
        assert_eq!(
            GeneralHandler::detect_intent("help me get started"),
            GeneralIntent::Help
        );
        assert_eq!(
            GeneralHandler::detect_intent("hmm"),
            GeneralIntent::Default
        );
    }

    #[tokio::test]
    async fn test_canned_answer_without_llm() {
        let handler = GeneralHandler::new(None);
        let classification = crate::classifier::QueryClassifier::new(None).fallback("Hello");
        let out = handler.run("Hello", &classification).await.unwrap();
        assert!(out.answer.contains("EBITDA"));
        assert!(out.chart.is_none());
    }
}
