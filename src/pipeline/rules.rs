//! Offline keyword rules for summarization and classification.
//!
//! `KeywordInference` needs no network or model. It is the backend when no
//! LLM key is configured:
//! - Summary: the leading words of the text, whitespace collapsed
//! - Category: each label scores one point per matching rule; the highest
//!   score wins, ties keep label order, no match at all means `Personal`

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::error::LlmError;
use crate::pipeline::inference::Inference;
use crate::pipeline::types::Category;

/// Words kept in an extractive summary.
const SUMMARY_WORDS: usize = 40;

/// A single keyword rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    /// Category this rule votes for.
    pub category: Category,
    /// Compiled regex for matching.
    pub regex: Regex,
}

/// Keyword-based inference backend.
pub struct KeywordInference {
    rules: Vec<KeywordRule>,
}

impl KeywordInference {
    /// Create a backend with the default keyword rules.
    pub fn default_rules() -> Self {
        let table: &[(Category, &str)] = &[
            (
                Category::Urgent,
                r"(?i)\b(urgent|asap|immediately|action required|final notice)\b",
            ),
            (
                Category::Urgent,
                r"(?i)(security alert|suspicious (sign-in|activity)|verify your account|password reset)",
            ),
            (
                Category::Work,
                r"(?i)\b(meeting|standup|stand-up|sprint|agenda|deadline|project|deliverable)s?\b",
            ),
            (
                Category::Work,
                r"(?i)\b(pull request|code review|jira|roadmap|proposal|client|quarterly report)\b",
            ),
            (
                Category::Finance,
                r"(?i)\b(invoice|receipt|payment|billing|refund|transaction|statement)s?\b",
            ),
            (
                Category::Finance,
                r"(?i)(\bdue\b|\bbank\b|credit card|\btax(es)?\b|paypal|direct debit)",
            ),
            (
                Category::Newsletter,
                r"(?i)\b(newsletter|digest|weekly|monthly roundup|this week in)\b",
            ),
            (
                Category::Newsletter,
                r"(?i)(unsubscribe|manage your subscription|issue #\d+|read more)",
            ),
            (
                Category::Promo,
                r"(?i)(\bsale\b|\d+% off|discount|coupon|promo code|\bdeals?\b|special offer)",
            ),
            (
                Category::Promo,
                r"(?i)(free shipping|limited time|buy now|exclusive|last chance)",
            ),
            (
                Category::Personal,
                r"(?i)\b(family|friend|birthday|dinner|weekend|party|vacation|holiday)s?\b",
            ),
            (
                Category::Personal,
                r"(?i)\b(mom|dad|catch up|photos|congrats|congratulations)\b",
            ),
        ];

        let rules = table
            .iter()
            .filter_map(|(category, pattern)| match Regex::new(pattern) {
                Ok(regex) => Some(KeywordRule {
                    category: *category,
                    regex,
                }),
                Err(e) => {
                    tracing::error!(pattern, error = %e, "Invalid keyword rule, skipping");
                    None
                }
            })
            .collect();

        Self { rules }
    }

    /// Score every label in `labels` against `text`.
    pub fn scores(&self, text: &str, labels: &[Category]) -> Vec<(Category, usize)> {
        labels
            .iter()
            .map(|label| {
                let hits = self
                    .rules
                    .iter()
                    .filter(|r| r.category == *label && r.regex.is_match(text))
                    .count();
                (*label, hits)
            })
            .collect()
    }
}

impl Default for KeywordInference {
    fn default() -> Self {
        Self::default_rules()
    }
}

#[async_trait]
impl Inference for KeywordInference {
    fn name(&self) -> &str {
        "keywords"
    }

    async fn summarize(&self, text: &str) -> Result<String, LlmError> {
        Ok(leading_words(text, SUMMARY_WORDS))
    }

    async fn classify(&self, text: &str, labels: &[Category]) -> Result<Category, LlmError> {
        let scores = self.scores(text, labels);

        let mut best: Option<(Category, usize)> = None;
        for (label, score) in &scores {
            if *score > 0 && best.is_none_or(|(_, top)| *score > top) {
                best = Some((*label, *score));
            }
        }

        let label = match best {
            Some((label, _)) => label,
            None if labels.contains(&Category::FALLBACK) => Category::FALLBACK,
            None => labels
                .first()
                .copied()
                .ok_or_else(|| LlmError::InvalidResponse {
                    provider: "keywords".into(),
                    reason: "no labels to choose from".into(),
                })?,
        };
        debug!(category = %label, ?scores, "Keyword classification");
        Ok(label)
    }
}

/// The first `max_words` words of `text` on one line, with an ellipsis
/// when cut.
pub fn leading_words(text: &str, max_words: usize) -> String {
    let mut words = text.split_whitespace();
    let kept: Vec<&str> = words.by_ref().take(max_words).collect();
    let mut out = kept.join(" ");
    if words.next().is_some() {
        out.push('…');
    }
    out
}
