//! Inference capability used by the enricher.
//!
//! The enricher only sees the `Inference` trait. Two backends exist:
//! - `LlmInference`: prompts an `LlmProvider` for a summary and label scores
//! - `KeywordInference` (in `rules`): offline keyword scoring, no network

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::Category;

/// Max tokens for a summary (roughly sixty words).
const SUMMARY_MAX_TOKENS: u32 = 160;

/// Max tokens for the classification call.
const CLASSIFY_MAX_TOKENS: u32 = 128;

/// Temperature for both calls (deterministic-ish).
const INFERENCE_TEMPERATURE: f32 = 0.1;

/// Summarize and classify text.
#[async_trait]
pub trait Inference: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Produce a short summary of `text`.
    async fn summarize(&self, text: &str) -> Result<String, LlmError>;

    /// Pick the single best label for `text` from `labels`.
    async fn classify(&self, text: &str, labels: &[Category]) -> Result<Category, LlmError>;
}

/// LLM-backed inference.
pub struct LlmInference {
    llm: Arc<dyn LlmProvider>,
}

impl LlmInference {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Inference for LlmInference {
    fn name(&self) -> &str {
        self.llm.model_name()
    }

    async fn summarize(&self, text: &str) -> Result<String, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_summary_system_prompt()),
            ChatMessage::user(text),
        ])
        .with_temperature(INFERENCE_TEMPERATURE)
        .with_max_tokens(SUMMARY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        debug!(
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Summary generated"
        );

        let summary = response.content.trim();
        if summary.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.llm.model_name().to_string(),
                reason: "empty summary".into(),
            });
        }
        Ok(summary.to_string())
    }

    async fn classify(&self, text: &str, labels: &[Category]) -> Result<Category, LlmError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classify_system_prompt(labels)),
            ChatMessage::user(text),
        ])
        .with_temperature(INFERENCE_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        parse_classification(&response.content, labels).map_err(|reason| {
            LlmError::InvalidResponse {
                provider: self.llm.model_name().to_string(),
                reason,
            }
        })
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_summary_system_prompt() -> String {
    "You summarize emails for a daily digest.\n\n\
     Rules:\n\
     - One or two plain sentences, at most 60 words\n\
     - State what the sender wants or what happened\n\
     - No greetings, no markdown, no quotes around the answer"
        .to_string()
}

fn build_classify_system_prompt(labels: &[Category]) -> String {
    let names: Vec<&str> = labels.iter().map(|c| c.as_str()).collect();
    format!(
        "You classify emails into exactly one category.\n\n\
         Categories: {}\n\n\
         Score how well the email fits each category (0.0-1.0).\n\
         Respond with ONLY a JSON object:\n\
         {{\"category\": \"<best category>\", \"scores\": {{\"<category>\": 0.0}}}}",
        names.join(", ")
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// LLM classification response structure.
#[derive(Debug, serde::Deserialize)]
struct ClassifyResponse {
    #[serde(default)]
    category: String,
    #[serde(default)]
    scores: std::collections::HashMap<String, f32>,
}

/// Pick the highest-scoring allowed label.
///
/// Scores win over the `category` field; ties keep label order. Labels
/// outside `labels` are ignored.
fn parse_classification(raw: &str, labels: &[Category]) -> Result<Category, String> {
    let json_str = extract_json_object(raw);
    let response: ClassifyResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let mut best: Option<(Category, f32)> = None;
    for label in labels {
        let score = response
            .scores
            .iter()
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(label.as_str()))
            .map(|(_, score)| *score);
        if let Some(score) = score
            && best.is_none_or(|(_, top)| score > top)
        {
            best = Some((*label, score));
        }
    }
    if let Some((label, _)) = best {
        return Ok(label);
    }

    match response.category.parse::<Category>() {
        Ok(label) if labels.contains(&label) => Ok(label),
        _ => Err(format!(
            "no allowed category in response: '{}'",
            response.category
        )),
    }
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::CompletionResponse;

    // ── Parsing tests ───────────────────────────────────────────────

    #[test]
    fn parse_picks_highest_score() {
        let raw = r#"{"category": "Work", "scores": {"Work": 0.4, "Finance": 0.9, "Promo": 0.1}}"#;
        assert_eq!(
            parse_classification(raw, &Category::ALL).unwrap(),
            Category::Finance
        );
    }

    #[test]
    fn parse_falls_back_to_category_field() {
        let raw = r#"{"category": "newsletter"}"#;
        assert_eq!(
            parse_classification(raw, &Category::ALL).unwrap(),
            Category::Newsletter
        );
    }

    #[test]
    fn parse_ignores_labels_outside_the_set() {
        let raw = r#"{"scores": {"Spam": 0.99, "Promo": 0.3}}"#;
        assert_eq!(
            parse_classification(raw, &Category::ALL).unwrap(),
            Category::Promo
        );
    }

    #[test]
    fn parse_respects_restricted_label_list() {
        let raw = r#"{"category": "Urgent"}"#;
        assert!(parse_classification(raw, &[Category::Work, Category::Personal]).is_err());
    }

    #[test]
    fn parse_unknown_category_fails() {
        let raw = r#"{"category": "Spam"}"#;
        assert!(parse_classification(raw, &Category::ALL).is_err());
    }

    #[test]
    fn parse_wrapped_in_markdown() {
        let raw = "Here you go:\n```json\n{\"category\": \"Urgent\"}\n```";
        assert_eq!(
            parse_classification(raw, &Category::ALL).unwrap(),
            Category::Urgent
        );
    }

    #[test]
    fn parse_garbage_fails() {
        assert!(parse_classification("I think it's work", &Category::ALL).is_err());
    }

    #[test]
    fn classify_prompt_lists_labels() {
        let prompt = build_classify_system_prompt(&Category::ALL);
        for c in Category::ALL {
            assert!(prompt.contains(c.as_str()));
        }
    }

    // ── LlmInference with mock provider ─────────────────────────────

    struct MockLlm {
        response: String,
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: self.response.clone(),
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    #[tokio::test]
    async fn llm_summarize_trims_output() {
        let inference = LlmInference::new(Arc::new(MockLlm {
            response: "  Alice asks to move the meeting to Tuesday.\n".into(),
        }));
        let summary = inference.summarize("long email").await.unwrap();
        assert_eq!(summary, "Alice asks to move the meeting to Tuesday.");
    }

    #[tokio::test]
    async fn llm_summarize_empty_is_error() {
        let inference = LlmInference::new(Arc::new(MockLlm {
            response: "   ".into(),
        }));
        assert!(inference.summarize("text").await.is_err());
    }

    #[tokio::test]
    async fn llm_classify_parses_label() {
        let inference = LlmInference::new(Arc::new(MockLlm {
            response: r#"{"category": "Finance", "scores": {"Finance": 0.8}}"#.into(),
        }));
        let label = inference
            .classify("Subject: Invoice due", &Category::ALL)
            .await
            .unwrap();
        assert_eq!(label, Category::Finance);
    }
}
