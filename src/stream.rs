//! Streaming extraction API: emit chunk results as they complete.
//!
//! Long theses take minutes. [`extract_stream`] runs routing, structure
//! analysis and chunking up front, then yields each
//! [`ChunkProcessingResult`] as soon as its backend call settles. Results
//! arrive in completion order; sort by `chunk_index` if order matters, or
//! hand the collected results to [`crate::merge_results`].
//! Reference formatting is left to the caller
//! ([`crate::ReferenceFormatter`]), since it needs the merged list.

use crate::backend::resolve_backend;
use crate::config::ExtractionConfig;
use crate::convert::plan_chunks;
use crate::error::ThesisError;
use crate::latex::Labeler;
use crate::pipeline::processor::{ChunkProcessingResult, ChunkProcessor, MarkerHints};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of chunk results.
pub type ChunkStream = Pin<Box<dyn Stream<Item = ChunkProcessingResult> + Send>>;

/// Extract a thesis, streaming chunk results as they are ready.
///
/// The stream runs at most `config.concurrency` backend calls at once.
/// Per-chunk progress callbacks fire as usual; `on_extraction_complete`
/// does not, since the stream has no natural end event.
///
/// # Example
/// ```rust,no_run
/// use edgequake_thesis2tex::{extract_stream, merge_results, ExtractionConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let text = std::fs::read_to_string("thesis.txt")?;
/// let config = ExtractionConfig::default();
/// let mut stream = extract_stream(&text, &config).await?;
/// let mut results = Vec::new();
/// while let Some(result) = stream.next().await {
///     eprintln!("chunk {} done (success: {})", result.chunk_index + 1, result.success);
///     results.push(result);
/// }
/// let thesis = merge_results(&results)?;
/// println!("{} sections", thesis.sections.len());
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// [`ThesisError::EmptyInput`] and [`ThesisError::ProviderNotConfigured`];
/// chunk failures are reported inside the stream.
pub async fn extract_stream(
    text: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ChunkStream, ThesisError> {
    let text = text.as_ref();
    if text.trim().is_empty() {
        return Err(ThesisError::EmptyInput);
    }
    let input_chars = text.chars().count();
    info!("Starting streaming extraction: {} chars", input_chars);

    // ── Plan ─────────────────────────────────────────────────────────────
    let backend = resolve_backend(config)?;
    let plan = plan_chunks(text, input_chars, config, &backend).await;

    // ── Build the stream ─────────────────────────────────────────────────
    let processor = ChunkProcessor::new(backend, config, Arc::new(Labeler::new()));
    let concurrency = processor.concurrency();
    let document_hints = MarkerHints::scan(text);
    if let Some(ref cb) = config.progress_callback {
        cb.on_extraction_start(plan.chunks.len());
    }

    let s = stream::iter(plan.chunks.into_iter().map(move |chunk| {
        let processor = processor.clone();
        let hints = document_hints.narrow_to(&chunk);
        async move { processor.process_chunk(&chunk, &hints).await }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ExtractionBackend;
    use crate::error::BackendError;
    use crate::pipeline::merge::merge_results;
    use async_trait::async_trait;

    struct Fixed;

    #[async_trait]
    impl ExtractionBackend for Fixed {
        async fn call(&self, _prompt: &str, _max_tokens: usize) -> Result<String, BackendError> {
            Ok(r#"{"sections":[{"title":"绪论","content":"内容","level":1}]}"#.to_string())
        }
    }

    #[tokio::test]
    async fn stream_yields_every_chunk() {
        let config = ExtractionConfig::builder()
            .backend(Arc::new(Fixed))
            .build()
            .unwrap();
        let mut stream = extract_stream("第一章 绪论\n内容", &config).await.unwrap();
        let mut results = Vec::new();
        while let Some(r) = stream.next().await {
            results.push(r);
        }
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(merge_results(&results).unwrap().sections.len(), 1);
    }

    #[tokio::test]
    async fn empty_input_fails_before_streaming() {
        let config = ExtractionConfig::builder()
            .backend(Arc::new(Fixed))
            .build()
            .unwrap();
        assert!(matches!(
            extract_stream("", &config).await,
            Err(ThesisError::EmptyInput)
        ));
    }
}
