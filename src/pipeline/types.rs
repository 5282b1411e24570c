//! Shared types for the enrichment-and-digest pipeline.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, SourceError};

// ── Labels ──────────────────────────────────────────────────────────

/// Closed set of categories a message can be labelled with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Urgent,
    Work,
    Finance,
    Newsletter,
    Promo,
    Personal,
}

impl Category {
    /// Every label, in the order they are offered to the classifier.
    pub const ALL: [Category; 6] = [
        Category::Urgent,
        Category::Work,
        Category::Finance,
        Category::Newsletter,
        Category::Promo,
        Category::Personal,
    ];

    /// Label used when classification cannot run.
    pub const FALLBACK: Category = Category::Personal;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "Urgent",
            Self::Work => "Work",
            Self::Finance => "Finance",
            Self::Newsletter => "Newsletter",
            Self::Promo => "Promo",
            Self::Personal => "Personal",
        }
    }

    /// Priority is fully determined by the category.
    pub fn priority(&self) -> Priority {
        match self {
            Self::Urgent | Self::Finance => Priority::High,
            _ => Priority::Medium,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a label string outside the fixed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} label: '{value}'")]
pub struct ParseLabelError {
    kind: &'static str,
    value: String,
}

impl FromStr for Category {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParseLabelError {
                kind: "category",
                value: s.to_string(),
            })
    }
}

/// Message priority.
///
/// The enricher only ever assigns `High` or `Medium`; `Low` exists for
/// history rows and filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    /// Sort rank for digests: lower ranks first.
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParseLabelError {
                kind: "priority",
                value: s.to_string(),
            })
    }
}

// ── Messages ────────────────────────────────────────────────────────

/// A message as fetched from the source, before enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Opaque identifier (Message-ID or generated).
    pub id: String,
    /// Sender as displayed, e.g. `Alice <alice@example.com>`.
    pub from: String,
    pub subject: String,
    /// Short preview of the body. May be empty.
    pub snippet: String,
    /// Plain-text body. May be empty.
    pub body_text: String,
}

impl RawMessage {
    pub fn new(id: impl Into<String>, from: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body_text = body.into();
        self
    }

    /// Text to summarize: body, then snippet, then subject.
    ///
    /// Returns `None` when all three are blank.
    pub fn summary_source(&self) -> Option<&str> {
        [&self.body_text, &self.snippet, &self.subject]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }
}

/// A message after summarization and classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedMessage {
    /// The original fetched message.
    pub original: RawMessage,
    /// Single-line summary, never empty.
    pub summary: String,
    pub category: Category,
    /// Always `category.priority()`.
    pub priority: Priority,
    /// True when `category` is the fallback label rather than a
    /// classifier result.
    pub defaulted: bool,
}

impl EnrichedMessage {
    pub fn new(
        original: RawMessage,
        summary: impl Into<String>,
        category: Category,
        defaulted: bool,
    ) -> Self {
        Self {
            original,
            summary: summary.into(),
            category,
            priority: category.priority(),
            defaulted,
        }
    }

    pub fn id(&self) -> &str {
        &self.original.id
    }

    pub fn from(&self) -> &str {
        &self.original.from
    }

    pub fn subject(&self) -> &str {
        &self.original.subject
    }
}

// ── External collaborators ──────────────────────────────────────────

/// Where raw messages come from — pure I/O, no business logic.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Source name for logging (e.g. "imap").
    fn name(&self) -> &str;

    /// Fetch up to `max_count` messages received within `window`.
    ///
    /// Zero results is `Ok(vec![])`; errors are reserved for transport
    /// failures.
    async fn fetch_recent(
        &self,
        max_count: usize,
        window: Duration,
    ) -> Result<Vec<RawMessage>, SourceError>;
}

/// Delivers a rendered digest.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notifier name for logging (e.g. "smtp").
    fn name(&self) -> &str;

    /// `false` when delivery is switched off and `deliver` is a no-op.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn deliver(
        &self,
        subject: &str,
        html_body: &str,
        text_fallback: &str,
    ) -> Result<(), DeliveryError>;
}
