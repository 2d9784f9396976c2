//! Configuration types for thesis extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across chunk tasks and to log them.

use crate::backend::ExtractionBackend;
use crate::error::ThesisError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default per-chunk character limit used by the chunker.
pub const MAX_CHUNK_SIZE: usize = 40_000;

/// Inputs at or below this many characters are extracted with one call.
pub const SINGLE_CALL_THRESHOLD: usize = 45_000;

/// Configuration for a thesis extraction run.
///
/// # Example
/// ```rust
/// use edgequake_thesis2tex::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .concurrency(4)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_chunk_size, 40_000);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Maximum characters of section content packed into one chunk. Default: 40 000.
    pub max_chunk_size: usize,

    /// Inputs with at most this many characters skip structure analysis and
    /// are sent as a single whole-document call. Default: 45 000.
    pub single_call_threshold: usize,

    /// Maximum number of chunk calls in flight at once. Default: 8.
    ///
    /// A 300-page thesis can produce dozens of chunks; firing them all at
    /// once trips provider rate limits long before it saves wall-clock time.
    pub concurrency: usize,

    /// Retry policy for chunk extraction calls.
    pub retry: RetryPolicy,

    /// Retries for the structure-analysis call before the regex fallback
    /// takes over. Default: 0.
    pub structure_retries: u32,

    /// Maximum tokens the LLM may generate per chunk. Default: 16 000.
    pub max_tokens: usize,

    /// Maximum tokens for the structure-analysis response. Default: 8 000.
    pub structure_max_tokens: usize,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Per-call timeout in seconds applied by the provider adapter. Default: 180.
    pub api_timeout_secs: u64,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed extraction backend. Takes precedence over everything.
    pub backend: Option<Arc<dyn ExtractionBackend>>,

    /// Custom system prompt for the provider adapter. If None, uses built-in default.
    pub system_prompt: Option<String>,

    /// Run the formula converter over section content. Default: true.
    pub convert_formulas: bool,

    /// Reformat the merged reference list to GB/T 7714 with one extra
    /// backend call. Default: true.
    pub format_references: bool,

    /// Per-chunk progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: MAX_CHUNK_SIZE,
            single_call_threshold: SINGLE_CALL_THRESHOLD,
            concurrency: 8,
            retry: RetryPolicy::default(),
            structure_retries: 0,
            max_tokens: 16_000,
            structure_max_tokens: 8_000,
            temperature: 0.1,
            api_timeout_secs: 180,
            model: None,
            provider_name: None,
            provider: None,
            backend: None,
            system_prompt: None,
            convert_formulas: true,
            format_references: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("max_chunk_size", &self.max_chunk_size)
            .field("single_call_threshold", &self.single_call_threshold)
            .field("concurrency", &self.concurrency)
            .field("retry", &self.retry)
            .field("structure_retries", &self.structure_retries)
            .field("max_tokens", &self.max_tokens)
            .field("structure_max_tokens", &self.structure_max_tokens)
            .field("temperature", &self.temperature)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("backend", &self.backend.as_ref().map(|_| "<dyn ExtractionBackend>"))
            .field("convert_formulas", &self.convert_formulas)
            .field("format_references", &self.format_references)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Retry policy used for the structure-analysis call.
    pub fn structure_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.structure_retries,
            ..self.retry
        }
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    pub fn max_chunk_size(mut self, n: usize) -> Self {
        self.config.max_chunk_size = n;
        self
    }

    pub fn single_call_threshold(mut self, n: usize) -> Self {
        self.config.single_call_threshold = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn structure_retries(mut self, n: u32) -> Self {
        self.config.structure_retries = n;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn structure_max_tokens(mut self, n: usize) -> Self {
        self.config.structure_max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ExtractionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn convert_formulas(mut self, v: bool) -> Self {
        self.config.convert_formulas = v;
        self
    }

    pub fn format_references(mut self, v: bool) -> Self {
        self.config.format_references = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ThesisError> {
        let c = &self.config;
        if c.max_chunk_size < 1000 {
            return Err(ThesisError::InvalidConfig(format!(
                "max_chunk_size must be ≥ 1000, got {}",
                c.max_chunk_size
            )));
        }
        if c.single_call_threshold == 0 {
            return Err(ThesisError::InvalidConfig(
                "single_call_threshold must be ≥ 1".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(ThesisError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if c.retry.base_delay_ms > c.retry.max_delay_ms {
            return Err(ThesisError::InvalidConfig(format!(
                "retry base delay ({}ms) exceeds max delay ({}ms)",
                c.retry.base_delay_ms, c.retry.max_delay_ms
            )));
        }
        Ok(self.config)
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────

/// Exponential backoff with a ceiling.
///
/// `max_retries` counts retries, so a call is attempted at most
/// `max_retries + 1` times. The wait before retry `k` (1-indexed) is
/// `min(base_delay_ms * 2^(k-1), max_delay_ms)`: with the defaults that is
/// 2 s → 4 s → 8 s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 2000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff for the 0-indexed retry number `retry_index`.
    pub fn backoff_ms(&self, retry_index: u32) -> u64 {
        let factor = 2u64.checked_pow(retry_index).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Wait before `attempt` (0 = first try, which never waits).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.backoff_ms(attempt - 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence_caps_at_max() {
        let p = RetryPolicy::default();
        let delays: Vec<u64> = (0..6).map(|k| p.backoff_ms(k)).collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 10_000, 10_000, 10_000]);
    }

    #[test]
    fn first_attempt_never_waits() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_before(0), Duration::ZERO);
        assert_eq!(p.delay_before(1), Duration::from_millis(2000));
        assert_eq!(p.delay_before(3), Duration::from_millis(8000));
    }

    #[test]
    fn backoff_does_not_overflow() {
        let p = RetryPolicy {
            max_retries: 100,
            base_delay_ms: 2000,
            max_delay_ms: 10_000,
        };
        assert_eq!(p.backoff_ms(90), 10_000);
    }

    #[test]
    fn builder_rejects_tiny_chunks() {
        let err = ExtractionConfig::builder().max_chunk_size(10).build();
        assert!(matches!(err, Err(ThesisError::InvalidConfig(_))));
    }

    #[test]
    fn builder_rejects_inverted_delays() {
        let err = ExtractionConfig::builder()
            .retry(RetryPolicy {
                max_retries: 1,
                base_delay_ms: 500,
                max_delay_ms: 100,
            })
            .build();
        assert!(matches!(err, Err(ThesisError::InvalidConfig(_))));
    }

    #[test]
    fn structure_policy_inherits_delays() {
        let config = ExtractionConfig::builder()
            .structure_retries(2)
            .build()
            .unwrap();
        let p = config.structure_retry_policy();
        assert_eq!(p.max_retries, 2);
        assert_eq!(p.base_delay_ms, 2000);
    }
}
