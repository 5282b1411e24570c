//! Optional LLM backend for summaries and labels.
//!
//! A backend is chosen from whichever API key is present (Anthropic first).
//! With no key the pipeline stays on the offline keyword classifier, so
//! `LlmConfig::from_lookup` returning `None` is the normal offline case.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::fmt;
use std::sync::Arc;

use rig::client::CompletionClient;
use rig::providers::{anthropic, openai};
use secrecy::{ExposeSecret, SecretString};

use crate::config::Lookup;
use crate::error::LlmError;

/// Overrides the backend's default model.
pub const MODEL_VAR: &str = "SMART_INBOX_MODEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    /// Backends in the order their keys are checked.
    pub const PREFERENCE: [LlmBackend; 2] = [Self::Anthropic, Self::OpenAi];

    pub fn key_var(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// Small, cheap models: a digest needs one short call per message.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::OpenAi => "gpt-4o-mini",
        }
    }
}

impl fmt::Display for LlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        })
    }
}

/// Backend, key and model for one run.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
}

impl LlmConfig {
    /// First backend in `LlmBackend::PREFERENCE` whose key is set, or `None`.
    pub fn from_lookup(lookup: &impl Lookup) -> Option<Self> {
        let (backend, key) = LlmBackend::PREFERENCE
            .into_iter()
            .find_map(|b| lookup(b.key_var()).map(|key| (b, key)))?;

        Some(Self {
            backend,
            api_key: SecretString::from(key),
            model: lookup(MODEL_VAR).unwrap_or_else(|| backend.default_model().to_string()),
        })
    }
}

/// Build the provider for `config`. Keys are not checked until the first
/// request.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let key = config.api_key.expose_secret();

    let provider: Arc<dyn LlmProvider> = match config.backend {
        LlmBackend::Anthropic => {
            let client: rig::client::Client<anthropic::client::AnthropicExt> =
                anthropic::Client::new(key).map_err(|e| client_error(config.backend, e))?;
            Arc::new(RigAdapter::new(client.completion_model(&config.model), &config.model))
        }
        LlmBackend::OpenAi => {
            let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
                openai::Client::new(key).map_err(|e| client_error(config.backend, e))?;
            Arc::new(RigAdapter::new(client.completion_model(&config.model), &config.model))
        }
    };

    tracing::info!(backend = %config.backend, model = %config.model, "LLM backend ready");
    Ok(provider)
}

fn client_error(backend: LlmBackend, e: impl fmt::Display) -> LlmError {
    LlmError::RequestFailed {
        provider: backend.to_string(),
        reason: format!("cannot create client: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Lookup {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn no_key_means_offline() {
        assert!(LlmConfig::from_lookup(&lookup(&[])).is_none());
        assert!(LlmConfig::from_lookup(&lookup(&[(MODEL_VAR, "gpt-4o")])).is_none());
    }

    #[test]
    fn openai_key_alone_selects_openai() {
        let cfg = LlmConfig::from_lookup(&lookup(&[("OPENAI_API_KEY", "sk-x")])).unwrap();
        assert_eq!(cfg.backend, LlmBackend::OpenAi);
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert_eq!(cfg.api_key.expose_secret(), "sk-x");
    }

    #[test]
    fn anthropic_wins_when_both_keys_set() {
        let cfg = LlmConfig::from_lookup(&lookup(&[
            ("OPENAI_API_KEY", "sk-x"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
            (MODEL_VAR, "claude-sonnet-4-20250514"),
        ]))
        .unwrap();
        assert_eq!(cfg.backend, LlmBackend::Anthropic);
        assert_eq!(cfg.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn provider_reports_configured_model() {
        // rig clients accept any key string at construction.
        for backend in LlmBackend::PREFERENCE {
            let config = LlmConfig {
                backend,
                api_key: SecretString::from("test-key"),
                model: backend.default_model().to_string(),
            };
            let provider = create_provider(&config).unwrap();
            assert_eq!(provider.model_name(), backend.default_model());
        }
    }
}
