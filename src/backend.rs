//! The extraction backend: one prompt in, one JSON string out.
//!
//! The pipeline only ever talks to [`ExtractionBackend`]. [`LlmBackend`]
//! adapts any `edgequake-llm` provider to it; tests plug in scripted
//! implementations instead.

use crate::config::ExtractionConfig;
use crate::error::{BackendError, ThesisError};
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Model used when a provider is named but no model is given.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// Sends a prompt and returns the raw response text.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn call(&self, prompt: &str, max_tokens: usize) -> Result<String, BackendError>;
}

/// [`ExtractionBackend`] over an `edgequake-llm` chat provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    temperature: f32,
    timeout: Option<Duration>,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: config.temperature,
            timeout: (config.api_timeout_secs > 0)
                .then(|| Duration::from_secs(config.api_timeout_secs)),
        }
    }

    /// System prompt plus the prompt as a plain-text user turn.
    fn messages(&self, prompt: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user(prompt),
        ]
    }

    fn options(&self, max_tokens: usize) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExtractionBackend for LlmBackend {
    async fn call(&self, prompt: &str, max_tokens: usize) -> Result<String, BackendError> {
        let messages = self.messages(prompt);
        let options = self.options(max_tokens);

        let request = self.provider.chat(&messages, Some(&options));
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| BackendError::Timeout {
                    secs: limit.as_secs(),
                })?,
            None => request.await,
        };
        let response = result.map_err(|e| BackendError::Api(e.to_string()))?;

        debug!(
            "LLM call: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        if response.content.trim().is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        Ok(response.content)
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, ThesisError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        ThesisError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
/// explicit provider, named provider + model, `EDGEQUAKE_LLM_PROVIDER` +
/// `EDGEQUAKE_MODEL`, `OPENAI_API_KEY`, then full auto-detection.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ThesisError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    // An OpenAI key wins over other keys when several are present.
    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ThesisError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// The backend for a run: `config.backend` if set, else an [`LlmBackend`]
/// over the resolved provider.
pub fn resolve_backend(config: &ExtractionConfig) -> Result<Arc<dyn ExtractionBackend>, ThesisError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmBackend::new(provider, config)))
}
