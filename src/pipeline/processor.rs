//! Per-chunk extraction: prompt, call, validate, normalise, retry.
//!
//! ## Concurrency
//!
//! [`ChunkProcessor::process_all`] drives every chunk through
//! `buffer_unordered(concurrency)`, so at most `concurrency` backend calls
//! are in flight. Results come back in completion order and are sorted by
//! `chunk_index` before returning. A chunk that exhausts its retries
//! becomes a failed [`ChunkProcessingResult`]; its siblings are unaffected.

use crate::backend::ExtractionBackend;
use crate::config::{ExtractionConfig, RetryPolicy};
use crate::error::ChunkError;
use crate::latex::{normalize_content, Labeler};
use crate::output::ThesisData;
use crate::pipeline::chunker::ContentChunk;
use crate::pipeline::response::parse_chunk_response;
use crate::pipeline::retry::run_with_retry;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::prompts::chunk_prompt;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

// ── Results ──────────────────────────────────────────────────────────────

/// Outcome of one chunk. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkProcessingResult {
    pub success: bool,
    pub chunk_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ThesisData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
}

impl ChunkProcessingResult {
    pub fn succeeded(chunk_index: usize, data: ThesisData, retry_count: u32) -> Self {
        Self {
            success: true,
            chunk_index,
            data: Some(data),
            error: None,
            retry_count,
        }
    }

    pub fn failed(chunk_index: usize, error: impl Into<String>, retry_count: u32) -> Self {
        Self {
            success: false,
            chunk_index,
            data: None,
            error: Some(error.into()),
            retry_count,
        }
    }
}

// ── Marker detection ─────────────────────────────────────────────────────

static RE_FIGURE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[FIGURE:([A-Za-z0-9_\-]+)").unwrap());
static RE_PIPE_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*\|.*\|[ \t]*\n[ \t]*\|[-:\t |]+\|").unwrap());

/// Which upstream markers a text carries; decides the prompt's
/// figure / table / formula instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerHints {
    /// Figure ids in first-seen order.
    pub figure_ids: Vec<String>,
    pub tables: bool,
    pub formulas: bool,
}

impl MarkerHints {
    pub fn scan(text: &str) -> Self {
        let mut figure_ids: Vec<String> = Vec::new();
        for caps in RE_FIGURE_ID.captures_iter(text) {
            let id = &caps[1];
            if !figure_ids.iter().any(|seen| seen == id) {
                figure_ids.push(id.to_string());
            }
        }
        Self {
            figure_ids,
            tables: text.contains("[TABLE") || RE_PIPE_TABLE.is_match(text),
            formulas: text.contains("[FORMULA")
                || text
                    .chars()
                    .any(|c| !c.is_ascii() && crate::latex::formula::classify(c).is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.figure_ids.is_empty() && !self.tables && !self.formulas
    }

    /// The subset of these document-level hints present in `chunk`.
    pub fn narrow_to(&self, chunk: &ContentChunk) -> Self {
        if self.is_empty() {
            return Self::default();
        }
        let joined = chunk.texts().collect::<Vec<_>>().join("\n");
        let local = Self::scan(&joined);
        Self {
            figure_ids: local
                .figure_ids
                .into_iter()
                .filter(|id| self.figure_ids.contains(id))
                .collect(),
            tables: self.tables && local.tables,
            formulas: self.formulas && local.formulas,
        }
    }
}

// ── Processor ────────────────────────────────────────────────────────────

/// Extracts chunks through an [`ExtractionBackend`].
///
/// Cheap to clone; clones share the backend, the labeler and the callback.
#[derive(Clone)]
pub struct ChunkProcessor {
    backend: Arc<dyn ExtractionBackend>,
    labeler: Arc<Labeler>,
    progress: ProgressCallback,
    policy: RetryPolicy,
    max_tokens: usize,
    concurrency: usize,
    convert_formulas: bool,
}

impl ChunkProcessor {
    /// `labeler` numbers the tables and figures of one document; share it
    /// across every chunk of that document and nothing else.
    pub fn new(
        backend: Arc<dyn ExtractionBackend>,
        config: &ExtractionConfig,
        labeler: Arc<Labeler>,
    ) -> Self {
        Self {
            backend,
            labeler,
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
            policy: config.retry,
            max_tokens: config.max_tokens,
            concurrency: config.concurrency.max(1),
            convert_formulas: config.convert_formulas,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Extract one chunk, retrying per the policy. Never fails: exhaustion
    /// yields `success: false` with `retry_count == max_retries`.
    pub async fn process_chunk(&self, chunk: &ContentChunk, hints: &MarkerHints) -> ChunkProcessingResult {
        let num = chunk.chunk_index + 1;
        let total = chunk.total_chunks;
        let start = Instant::now();
        self.progress.on_chunk_start(num, total);

        let prompt = chunk_prompt(chunk, hints);
        debug!("Chunk {}/{}: prompt {} chars", num, total, prompt.chars().count());

        let backend = &self.backend;
        let prompt = prompt.as_str();
        let max_tokens = self.max_tokens;
        let label = format!("Chunk {num}/{total}");
        let outcome = run_with_retry(&self.policy, &label, move |_| async move {
            let raw = backend
                .call(prompt, max_tokens)
                .await
                .map_err(|e| ChunkError::Backend {
                    chunk: num,
                    detail: e.to_string(),
                })?;
            parse_chunk_response(&raw).map_err(|e| ChunkError::InvalidResponse {
                chunk: num,
                detail: e.to_string(),
            })
        })
        .await;

        match outcome {
            Ok(done) => {
                let data = self.normalize(done.value);
                debug!(
                    "Chunk {}/{}: {} sections, {} retries, {:?}",
                    num,
                    total,
                    data.sections.len(),
                    done.retries,
                    start.elapsed()
                );
                self.progress.on_chunk_complete(num, total, data.sections.len());
                ChunkProcessingResult::succeeded(chunk.chunk_index, data, done.retries)
            }
            Err(failed) => {
                let error = failed.value.to_string();
                warn!("Chunk {}/{} failed after {} retries: {}", num, total, failed.retries, error);
                self.progress.on_chunk_error(num, total, &error);
                ChunkProcessingResult::failed(chunk.chunk_index, error, failed.retries)
            }
        }
    }

    /// Extract every chunk with bounded concurrency; results sorted by
    /// `chunk_index`. `original_text` is scanned once for markers.
    pub async fn process_all(
        &self,
        chunks: &[ContentChunk],
        original_text: &str,
    ) -> Vec<ChunkProcessingResult> {
        let total = chunks.len();
        self.progress.on_extraction_start(total);
        info!(
            "Extracting {} chunks (concurrency {})",
            total, self.concurrency
        );

        let document_hints = MarkerHints::scan(original_text);
        let mut results: Vec<ChunkProcessingResult> = stream::iter(chunks)
            .map(|chunk| {
                let hints = document_hints.narrow_to(chunk);
                async move { self.process_chunk(chunk, &hints).await }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|r| r.chunk_index);

        let succeeded = results.iter().filter(|r| r.success).count();
        info!("Extraction finished: {}/{} chunks succeeded", succeeded, total);
        self.progress.on_extraction_complete(total, succeeded);
        results
    }

    /// Run the LaTeX converters over every section body.
    fn normalize(&self, mut data: ThesisData) -> ThesisData {
        for section in &mut data.sections {
            section.content = normalize_content(&section.content, &self.labeler, self.convert_formulas);
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::pipeline::chunker::ChunkSection;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays `script` in order, then repeats its last entry.
    struct Scripted {
        script: Vec<Result<String, BackendError>>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(script: Vec<Result<&str, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                script: script.into_iter().map(|r| r.map(str::to_string)).collect(),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ExtractionBackend for Scripted {
        async fn call(&self, prompt: &str, _max_tokens: usize) -> Result<String, BackendError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            self.script[i.min(self.script.len() - 1)].clone()
        }
    }

    fn config() -> ExtractionConfig {
        ExtractionConfig::builder()
            .retry(RetryPolicy {
                max_retries: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
            })
            .build()
            .unwrap()
    }

    fn chunk(index: usize, total: usize, content: &str) -> ContentChunk {
        ContentChunk {
            sections: vec![ChunkSection {
                title: format!("节{index}"),
                level: 1,
                content: content.to_string(),
            }],
            chunk_index: index,
            total_chunks: total,
            ..Default::default()
        }
    }

    const OK: &str = r#"{"metadata": {}, "sections": [{"title": "绪论", "content": "正文", "level": 1}]}"#;

    #[tokio::test]
    async fn success_on_first_attempt() {
        let backend = Scripted::new(vec![Ok(OK)]);
        let p = ChunkProcessor::new(backend.clone(), &config(), Arc::new(Labeler::new()));
        let r = p.process_chunk(&chunk(0, 1, "x"), &MarkerHints::default()).await;
        assert!(r.success);
        assert_eq!(r.retry_count, 0);
        assert_eq!(r.data.unwrap().sections[0].title, "绪论");
    }

    #[tokio::test]
    async fn bad_json_is_retried() {
        let backend = Scripted::new(vec![Ok("not json"), Ok("[]"), Ok(OK)]);
        let p = ChunkProcessor::new(backend.clone(), &config(), Arc::new(Labeler::new()));
        let r = p.process_chunk(&chunk(0, 1, "x"), &MarkerHints::default()).await;
        assert!(r.success);
        assert_eq!(r.retry_count, 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_mark_the_chunk_failed() {
        let backend = Scripted::new(vec![Err(BackendError::Api("503".into()))]);
        let p = ChunkProcessor::new(backend.clone(), &config(), Arc::new(Labeler::new()));
        let r = p.process_chunk(&chunk(1, 2, "x"), &MarkerHints::default()).await;
        assert!(!r.success);
        assert_eq!(r.chunk_index, 1);
        assert_eq!(r.retry_count, 3);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
        assert!(r.error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn section_content_is_normalized() {
        let raw = r#"{"sections": [{"title": "实验", "content": "结果如下\n| 模型 | 准确率 |\n|---|---|\n| A | 0.9 |\n其中α为权重", "level": 1}]}"#;
        let backend = Scripted::new(vec![Ok(raw)]);
        let p = ChunkProcessor::new(backend, &config(), Arc::new(Labeler::new()));
        let r = p.process_chunk(&chunk(0, 1, "x"), &MarkerHints::default()).await;
        let content = &r.data.unwrap().sections[0].content;
        assert!(content.contains("\\begin{tabular}{|c|c|}"));
        assert!(content.contains("$\\alpha$"));
    }

    #[tokio::test]
    async fn formulas_can_be_left_alone() {
        let raw = r#"{"sections": [{"title": "实验", "content": "其中α为权重", "level": 1}]}"#;
        let backend = Scripted::new(vec![Ok(raw)]);
        let cfg = ExtractionConfig::builder().convert_formulas(false).build().unwrap();
        let p = ChunkProcessor::new(backend, &cfg, Arc::new(Labeler::new()));
        let r = p.process_chunk(&chunk(0, 1, "x"), &MarkerHints::default()).await;
        assert_eq!(r.data.unwrap().sections[0].content, "其中α为权重");
    }

    #[tokio::test]
    async fn process_all_sorts_and_isolates_failures() {
        struct FailSecond;

        #[async_trait]
        impl ExtractionBackend for FailSecond {
            async fn call(&self, prompt: &str, _max_tokens: usize) -> Result<String, BackendError> {
                if prompt.contains("第 2/3 部分") {
                    Err(BackendError::Timeout { secs: 1 })
                } else {
                    Ok(OK.to_string())
                }
            }
        }

        let cfg = ExtractionConfig::builder()
            .retry(RetryPolicy {
                max_retries: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
            })
            .concurrency(2)
            .build()
            .unwrap();
        let p = ChunkProcessor::new(Arc::new(FailSecond), &cfg, Arc::new(Labeler::new()));
        let chunks: Vec<ContentChunk> = (0..3).map(|i| chunk(i, 3, "内容")).collect();
        let results = p.process_all(&chunks, "内容").await;

        let indices: Vec<usize> = results.iter().map(|r| r.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(results[0].success && !results[1].success && results[2].success);
        assert_eq!(results[1].retry_count, 1);
    }

    #[tokio::test]
    async fn figure_ids_reach_the_prompt() {
        let backend = Scripted::new(vec![Ok(OK)]);
        let p = ChunkProcessor::new(backend.clone(), &config(), Arc::new(Labeler::new()));
        let text = "如图 [FIGURE:docximg1] 所示";
        p.process_all(&[chunk(0, 1, text)], text).await;
        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].contains("图片处理"));
        assert!(prompts[0].contains("docximg1"));
        assert!(!prompts[0].contains("表格处理"));
    }

    #[test]
    fn hints_detect_each_marker_kind() {
        let h = MarkerHints::scan("[FIGURE:a1] [FIGURE:b2:ok] [FIGURE:a1]");
        assert_eq!(h.figure_ids, vec!["a1", "b2"]);
        assert!(!h.tables && !h.formulas);

        assert!(MarkerHints::scan("[TABLE_START]\n[TABLE_END]").tables);
        assert!(MarkerHints::scan("| a | b |\n|---|---|\n| 1 | 2 |").tables);
        assert!(MarkerHints::scan("损失 𝐿 = ∑").formulas);
        assert!(MarkerHints::scan("[FORMULA: x :END_FORMULA]").formulas);
        assert!(MarkerHints::scan("普通中文文本，没有标记。").is_empty());
    }

    #[test]
    fn hints_narrow_to_chunk() {
        let doc = MarkerHints::scan("[FIGURE:a1] [FIGURE:b2] [TABLE_START]");
        let narrowed = doc.narrow_to(&chunk(0, 1, "见 [FIGURE:b2]"));
        assert_eq!(narrowed.figure_ids, vec!["b2"]);
        assert!(!narrowed.tables);
    }
}
