//! Eager (whole-document) extraction entry points.
//!
//! [`extract`] waits for every chunk, merges them and returns one
//! [`ExtractionOutput`]. Use [`crate::stream::extract_stream`] instead to
//! receive chunk results as they complete.

use crate::backend::{resolve_backend, ExtractionBackend};
use crate::config::ExtractionConfig;
use crate::error::ThesisError;
use crate::latex::Labeler;
use crate::output::{ExtractionMode, ExtractionOutput, ExtractionStats};
use crate::pipeline::chunker::{ContentChunk, ContentChunker};
use crate::pipeline::merge::merge_results;
use crate::pipeline::processor::ChunkProcessor;
use crate::pipeline::structure::{regex_fallback, DocumentStructure, StructureAnalyzer};
use crate::references::ReferenceFormatter;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Extract a thesis from plain text.
///
/// # Returns
/// `Ok(ExtractionOutput)` whenever at least one chunk succeeded; failed
/// chunks are listed in `output.thesis.warnings`.
///
/// # Errors
/// * [`ThesisError::EmptyInput`] for empty or whitespace-only text
/// * [`ThesisError::ProviderNotConfigured`] when no backend can be built
/// * [`ThesisError::AllChunksFailed`] when nothing could be extracted
pub async fn extract(
    text: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ThesisError> {
    let total_start = Instant::now();
    let text = text.as_ref();

    // ── Step 1: Validate input ───────────────────────────────────────────
    if text.trim().is_empty() {
        return Err(ThesisError::EmptyInput);
    }
    let input_chars = text.chars().count();
    info!("Starting extraction: {} chars", input_chars);

    // ── Step 2: Backend and per-document labeler ─────────────────────────
    let backend = resolve_backend(config)?;
    let labeler = Arc::new(Labeler::new());

    // ── Step 3: Route and plan chunks ────────────────────────────────────
    let plan = plan_chunks(text, input_chars, config, &backend).await;

    // ── Step 4: Extract every chunk ──────────────────────────────────────
    let extraction_start = Instant::now();
    let processor = ChunkProcessor::new(Arc::clone(&backend), config, labeler);
    let results = processor.process_all(&plan.chunks, text).await;
    let extraction_duration_ms = extraction_start.elapsed().as_millis() as u64;

    // ── Step 5: Merge ────────────────────────────────────────────────────
    let mut thesis = merge_results(&results)?;

    // ── Step 6: Back-fill metadata from the structure pass ───────────────
    if let Some(ref structure) = plan.structure {
        thesis.metadata.backfill_from(&structure.metadata);
    }

    // ── Step 7: GB/T 7714 references ─────────────────────────────────────
    if config.format_references {
        if let Some(raw) = thesis.references.take() {
            let formatted = ReferenceFormatter::new(backend, config.max_tokens)
                .format(&raw)
                .await;
            thesis.references = Some(formatted).filter(|r| !r.trim().is_empty());
        }
    }

    // ── Step 8: Stats ────────────────────────────────────────────────────
    let succeeded = results.iter().filter(|r| r.success).count();
    let stats = ExtractionStats {
        mode: plan.mode,
        structure_source: plan.structure.as_ref().map(|s| s.source),
        input_chars,
        total_chunks: results.len(),
        succeeded_chunks: succeeded,
        failed_chunks: results.len() - succeeded,
        total_retries: results.iter().map(|r| r.retry_count).sum(),
        sections: thesis.sections.len(),
        structure_duration_ms: plan.structure_duration_ms,
        extraction_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Extraction complete: {}/{} chunks, {} sections, {}ms total",
        stats.succeeded_chunks, stats.total_chunks, stats.sections, stats.total_duration_ms
    );

    Ok(ExtractionOutput {
        thesis,
        structure: plan.structure,
        stats,
    })
}

/// Extract and write the [`crate::output::ThesisData`] as pretty JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn extract_to_file(
    text: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionStats, ThesisError> {
    let output = extract(text, config).await?;
    let path = output_path.as_ref();

    let json = serde_json::to_string_pretty(&output.thesis)
        .map_err(|e| ThesisError::Serialization(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ThesisError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json)
        .await
        .map_err(|e| ThesisError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| ThesisError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(output.stats)
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    text: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ThesisError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ThesisError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(text, config))
}

/// Regex structure and chunk plan for `text`, without any backend call.
pub fn inspect(text: &str) -> (DocumentStructure, Vec<ContentChunk>) {
    let structure = regex_fallback(text);
    let chunks = ContentChunker::default().split(text, &structure);
    (structure, chunks)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Output of the routing step, shared with the streaming API.
pub(crate) struct ChunkPlan {
    pub mode: ExtractionMode,
    pub structure: Option<DocumentStructure>,
    pub chunks: Vec<ContentChunk>,
    pub structure_duration_ms: u64,
}

/// Short documents go out in one call; longer ones are analysed and chunked.
pub(crate) async fn plan_chunks(
    text: &str,
    input_chars: usize,
    config: &ExtractionConfig,
    backend: &Arc<dyn ExtractionBackend>,
) -> ChunkPlan {
    if input_chars <= config.single_call_threshold {
        info!(
            "Single-call mode ({} chars <= {})",
            input_chars, config.single_call_threshold
        );
        return ChunkPlan {
            mode: ExtractionMode::SingleCall,
            structure: None,
            chunks: vec![ContentChunk::whole_document(text)],
            structure_duration_ms: 0,
        };
    }

    info!(
        "Two-phase mode ({} chars > {})",
        input_chars, config.single_call_threshold
    );
    let structure_start = Instant::now();
    let structure = StructureAnalyzer::new(Arc::clone(backend), config)
        .analyze(text)
        .await;
    let structure_duration_ms = structure_start.elapsed().as_millis() as u64;

    if let Some(ref cb) = config.progress_callback {
        cb.on_structure_ready(structure.sections.len(), structure.source);
    }

    let chunks = ContentChunker::new(config.max_chunk_size).split(text, &structure);
    debug!(
        "Planned {} chunks from {} sections ({:?})",
        chunks.len(),
        structure.sections.len(),
        structure.source
    );

    ChunkPlan {
        mode: ExtractionMode::TwoPhase,
        structure: Some(structure),
        chunks,
        structure_duration_ms,
    }
}
