//! Digest pipeline.
//!
//! Every run flows through:
//! 1. `MessageSource::fetch_recent()` — transport I/O only
//! 2. `Enricher::enrich_batch()` — summary + label per message, never fatal
//! 3. `Digest::build()` — counts and ranking, rendered to text and HTML
//! 4. `HistoryStore` append — before delivery, so a send failure loses nothing
//! 5. `Notifier::deliver()`

pub mod enricher;
pub mod inference;
pub mod rules;
pub mod runner;
pub mod types;

pub use enricher::{Enricher, EnricherConfig};
pub use inference::{Inference, LlmInference};
pub use rules::KeywordInference;
pub use runner::{DeliveryStatus, DigestPipeline, RunReport};
