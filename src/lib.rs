//! Smart Inbox — recent email in, ranked daily digest out.

pub mod channels;
pub mod config;
pub mod dashboard;
pub mod digest;
pub mod error;
pub mod history;
pub mod llm;
pub mod pipeline;
