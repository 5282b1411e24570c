//! Enricher — turns raw messages into summarized, labelled messages.
//!
//! Enrichment never fails from the caller's point of view. Empty text,
//! inference errors and timeouts all degrade to a sentinel summary or the
//! fallback category for that one message.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::LlmError;
use crate::pipeline::inference::Inference;
use crate::pipeline::types::{Category, EnrichedMessage, RawMessage};

/// Summary used when there is nothing to summarize.
pub const NO_CONTENT: &str = "No content.";

/// Input is cut to this many characters before summarizing.
pub const MAX_INPUT_CHARS: usize = 3000;

/// Summary word bound.
pub const MAX_SUMMARY_WORDS: usize = 60;

/// Summary character bound.
pub const MAX_SUMMARY_CHARS: usize = 300;

/// Enricher settings.
#[derive(Debug, Clone)]
pub struct EnricherConfig {
    /// Deadline for each inference call.
    pub inference_timeout: Duration,
    /// Messages enriched concurrently.
    pub workers: usize,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            inference_timeout: Duration::from_secs(30),
            workers: 4,
        }
    }
}

/// Summarizes and classifies messages through an injected `Inference`.
pub struct Enricher {
    inference: Arc<dyn Inference>,
    config: EnricherConfig,
}

impl Enricher {
    pub fn new(inference: Arc<dyn Inference>, config: EnricherConfig) -> Self {
        Self { inference, config }
    }

    /// Enrich a single message.
    pub async fn enrich(&self, raw: RawMessage) -> EnrichedMessage {
        let summary = match raw.summary_source() {
            None => NO_CONTENT.to_string(),
            Some(text) => {
                let input = truncate_chars(text, MAX_INPUT_CHARS);
                match self.call(self.inference.summarize(input)).await {
                    Ok(summary) => clamp_summary(&summary),
                    Err(e) => {
                        warn!(id = %raw.id, error = %e, "Summarization failed, using sentinel");
                        NO_CONTENT.to_string()
                    }
                }
            }
        };

        let composite = format!("Subject: {}\n\n{}", raw.subject, summary);
        let (category, defaulted) = match self
            .call(self.inference.classify(&composite, &Category::ALL))
            .await
        {
            Ok(category) => (category, false),
            Err(e) => {
                warn!(
                    id = %raw.id,
                    error = %e,
                    fallback = %Category::FALLBACK,
                    "Classification failed, using fallback category"
                );
                (Category::FALLBACK, true)
            }
        };

        debug!(
            id = %raw.id,
            category = %category,
            defaulted,
            "Message enriched"
        );
        EnrichedMessage::new(raw, summary, category, defaulted)
    }

    /// Enrich a batch, keeping arrival order.
    ///
    /// At most `workers` messages are in flight; the returned Vec is only
    /// available once every message has been enriched.
    pub async fn enrich_batch(&self, batch: Vec<RawMessage>) -> Vec<EnrichedMessage> {
        let count = batch.len();
        let workers = self.config.workers.max(1);
        info!(count, workers, backend = self.inference.name(), "Enriching batch");

        let enriched: Vec<EnrichedMessage> = stream::iter(batch)
            .map(|raw| self.enrich(raw))
            .buffered(workers)
            .collect()
            .await;

        let defaulted = enriched.iter().filter(|m| m.defaulted).count();
        info!(count, defaulted, "Batch enrichment complete");
        enriched
    }

    /// Run one inference call under the configured deadline.
    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, LlmError>>,
    ) -> Result<T, LlmError> {
        let timeout = self.config.inference_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| LlmError::Timeout(timeout))?
    }
}

/// Cut `text` to at most `max` characters on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Normalize a model summary into a single bounded line.
pub fn clamp_summary(summary: &str) -> String {
    let words: Vec<&str> = summary.split_whitespace().collect();
    if words.is_empty() {
        return NO_CONTENT.to_string();
    }

    let mut line = words[..words.len().min(MAX_SUMMARY_WORDS)].join(" ");
    let mut cut = words.len() > MAX_SUMMARY_WORDS;
    if line.chars().count() > MAX_SUMMARY_CHARS {
        line = truncate_chars(&line, MAX_SUMMARY_CHARS - 1).trim_end().to_string();
        cut = true;
    }
    if cut && !line.ends_with('…') {
        line.push('…');
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::pipeline::rules::KeywordInference;
    use crate::pipeline::types::Priority;

    /// Inference that always fails.
    struct FailingInference;

    #[async_trait]
    impl Inference for FailingInference {
        fn name(&self) -> &str {
            "failing"
        }
        async fn summarize(&self, _text: &str) -> Result<String, LlmError> {
            Err(LlmError::RequestFailed {
                provider: "failing".into(),
                reason: "down".into(),
            })
        }
        async fn classify(&self, _text: &str, _labels: &[Category]) -> Result<Category, LlmError> {
            Err(LlmError::RequestFailed {
                provider: "failing".into(),
                reason: "down".into(),
            })
        }
    }

    /// Inference that never answers.
    struct HangingInference;

    #[async_trait]
    impl Inference for HangingInference {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn summarize(&self, _text: &str) -> Result<String, LlmError> {
            futures::future::pending().await
        }
        async fn classify(&self, _text: &str, _labels: &[Category]) -> Result<Category, LlmError> {
            futures::future::pending().await
        }
    }

    /// Records what it was asked to summarize and tracks concurrency.
    struct RecordingInference {
        inputs: std::sync::Mutex<Vec<String>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl RecordingInference {
        fn new() -> Self {
            Self {
                inputs: std::sync::Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Inference for RecordingInference {
        fn name(&self) -> &str {
            "recording"
        }
        async fn summarize(&self, text: &str) -> Result<String, LlmError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.inputs.lock().unwrap().push(text.to_string());
            Ok(format!("summary of {}", text.chars().take(20).collect::<String>()))
        }
        async fn classify(&self, _text: &str, _labels: &[Category]) -> Result<Category, LlmError> {
            Ok(Category::Work)
        }
    }

    fn enricher(inference: Arc<dyn Inference>) -> Enricher {
        Enricher::new(
            inference,
            EnricherConfig {
                inference_timeout: Duration::from_millis(200),
                workers: 2,
            },
        )
    }

    #[tokio::test]
    async fn empty_message_gets_sentinel_and_valid_category() {
        let e = enricher(Arc::new(KeywordInference::default_rules()));
        let out = e.enrich(RawMessage::new("1", "a@x.com", "")).await;
        assert_eq!(out.summary, NO_CONTENT);
        assert!(Category::ALL.contains(&out.category));
        assert_eq!(out.priority, out.category.priority());
    }

    #[tokio::test]
    async fn empty_message_with_failing_backend_still_labelled() {
        let e = enricher(Arc::new(FailingInference));
        let out = e.enrich(RawMessage::new("1", "a@x.com", "")).await;
        assert_eq!(out.summary, NO_CONTENT);
        assert_eq!(out.category, Category::Personal);
        assert_eq!(out.priority, Priority::Medium);
        assert!(out.defaulted);
    }

    #[tokio::test]
    async fn inference_failure_degrades() {
        let e = enricher(Arc::new(FailingInference));
        let out = e
            .enrich(RawMessage::new("1", "a@x.com", "Invoice due").with_body("Please pay"))
            .await;
        assert_eq!(out.summary, NO_CONTENT);
        assert_eq!(out.category, Category::FALLBACK);
        assert!(out.defaulted);
    }

    #[tokio::test]
    async fn inference_timeout_degrades() {
        let e = enricher(Arc::new(HangingInference));
        let out = e
            .enrich(RawMessage::new("1", "a@x.com", "Hello").with_body("Body"))
            .await;
        assert_eq!(out.summary, NO_CONTENT);
        assert_eq!(out.category, Category::FALLBACK);
        assert!(out.defaulted);
    }

    #[tokio::test]
    async fn keyword_classification_is_not_defaulted() {
        let e = enricher(Arc::new(KeywordInference::default_rules()));
        let out = e.enrich(RawMessage::new("1", "billing@x.com", "Invoice due")).await;
        assert_eq!(out.category, Category::Finance);
        assert_eq!(out.priority, Priority::High);
        assert!(!out.defaulted);
        assert_eq!(out.summary, "Invoice due");
    }

    #[tokio::test]
    async fn input_is_truncated_before_summarizing() {
        let inference = Arc::new(RecordingInference::new());
        let e = enricher(inference.clone());
        let body = "é".repeat(MAX_INPUT_CHARS + 500);
        e.enrich(RawMessage::new("1", "a@x.com", "s").with_body(body)).await;
        let inputs = inference.inputs.lock().unwrap();
        assert_eq!(inputs[0].chars().count(), MAX_INPUT_CHARS);
    }

    #[tokio::test]
    async fn batch_keeps_order_and_bounds_concurrency() {
        let inference = Arc::new(RecordingInference::new());
        let e = enricher(inference.clone());
        let batch: Vec<RawMessage> = (0..6)
            .map(|i| RawMessage::new(format!("m{i}"), "a@x.com", format!("subject {i}")))
            .collect();

        let out = e.enrich_batch(batch).await;
        let ids: Vec<&str> = out.iter().map(|m| m.id()).collect();
        assert_eq!(ids, ["m0", "m1", "m2", "m3", "m4", "m5"]);
        assert!(inference.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn empty_batch_is_empty() {
        let e = enricher(Arc::new(KeywordInference::default_rules()));
        assert!(e.enrich_batch(Vec::new()).await.is_empty());
    }

    #[test]
    fn clamp_summary_single_line() {
        assert_eq!(clamp_summary("Line one.\nLine  two."), "Line one. Line two.");
    }

    #[test]
    fn clamp_summary_blank_is_sentinel() {
        assert_eq!(clamp_summary(" \n "), NO_CONTENT);
    }

    #[test]
    fn clamp_summary_bounds_words_and_chars() {
        let many_words = "word ".repeat(100);
        let out = clamp_summary(&many_words);
        assert_eq!(out.split_whitespace().count(), MAX_SUMMARY_WORDS);
        assert!(out.ends_with('…'));

        let long_words = "abcdefghij ".repeat(50);
        let out = clamp_summary(&long_words);
        assert!(out.chars().count() <= MAX_SUMMARY_CHARS);
        assert!(out.ends_with('…'));
    }

    #[test]
    fn truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
