//! Digest builder — aggregates one batch of enriched messages.
//!
//! A `Digest` is recomputed every run and never persisted; only its
//! renderings (`render::render_text`, `render::render_html`) leave the
//! process.

pub mod render;

use std::time::Duration;

use crate::pipeline::types::{Category, EnrichedMessage};

pub use render::{render_html, render_text};

/// Ranked items shown in the plain-text digest.
pub const TEXT_CAP: usize = 5;

/// Ranked items shown in the HTML digest.
pub const HTML_CAP: usize = 8;

/// Aggregated view of one batch.
#[derive(Debug, Clone)]
pub struct Digest {
    /// Per-category counts in order of first occurrence.
    category_counts: Vec<(Category, usize)>,
    /// Messages in arrival order.
    items: Vec<EnrichedMessage>,
    /// Fetch window the batch covers.
    window: Duration,
}

impl Digest {
    /// Build a digest from messages in arrival order.
    pub fn build(items: Vec<EnrichedMessage>, window: Duration) -> Self {
        let mut category_counts: Vec<(Category, usize)> = Vec::new();
        for item in &items {
            match category_counts.iter_mut().find(|(c, _)| *c == item.category) {
                Some((_, count)) => *count += 1,
                None => category_counts.push((item.category, 1)),
            }
        }

        Self {
            category_counts,
            items,
            window,
        }
    }

    pub fn category_counts(&self) -> &[(Category, usize)] {
        &self.category_counts
    }

    pub fn total_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Messages ordered by priority rank, ties in arrival order, at most
    /// `cap` of them.
    pub fn ranked(&self, cap: usize) -> Vec<&EnrichedMessage> {
        let mut ranked: Vec<&EnrichedMessage> = self.items.iter().collect();
        // `sort_by_key` is stable.
        ranked.sort_by_key(|m| m.priority.rank());
        ranked.truncate(cap);
        ranked
    }

    /// Human label for the window, e.g. "last 24h" or "last 7 days".
    pub fn window_label(&self) -> String {
        window_label(self.window)
    }
}

/// Human label for a fetch window.
pub fn window_label(window: Duration) -> String {
    let hours = window.as_secs() / 3600;
    if hours >= 48 && hours % 24 == 0 {
        format!("last {} days", hours / 24)
    } else if hours >= 1 {
        format!("last {hours}h")
    } else {
        format!("last {}m", (window.as_secs() / 60).max(1))
    }
}
