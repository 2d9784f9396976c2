//! # edgequake-thesis2tex
//!
//! Turn the plain text of an academic thesis into structured, LaTeX-safe
//! data using LLMs.
//!
//! The input is text an upstream extractor already pulled out of a Word or
//! PDF file, possibly carrying inline markers for figures, tables and
//! formulas. The output is a [`ThesisData`]: metadata, ordered sections,
//! abstracts, keywords, references and acknowledgements, with tables and
//! figures rendered as LaTeX environments and Unicode math rewritten as
//! LaTeX commands. It is ready for a template renderer.
//!
//! ## Pipeline Overview
//!
//! ```text
//! text
//!  │
//!  ├─ 1. Route      ≤ 45 000 chars → one call for the whole document
//!  ├─ 2. Structure  LLM outline, regex fallback on any failure
//!  ├─ 3. Chunk      pack sections into ≤ 40 000-char chunks
//!  ├─ 4. Extract    concurrent calls with retry + backoff
//!  ├─ 5. Normalise  tables, figures, formulas → LaTeX
//!  ├─ 6. Merge      dedup sections and references, warn per failed chunk
//!  └─ 7. References one more call re-renders the list as GB/T 7714
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_thesis2tex::{extract, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let text = std::fs::read_to_string("thesis.txt")?;
//!     let config = ExtractionConfig::default();
//!     let output = extract(&text, &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&output.thesis)?);
//!     for warning in output.thesis.warnings.iter().flatten() {
//!         eprintln!("warning: {warning}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Custom backends
//!
//! Anything implementing [`ExtractionBackend`] can stand in for the LLM,
//! which is how the tests drive the pipeline without network access.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `thesis2tex` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-thesis2tex = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod convert;
pub mod error;
pub mod latex;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod references;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{ExtractionBackend, LlmBackend};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, RetryPolicy};
pub use convert::{extract, extract_sync, extract_to_file, inspect};
pub use error::{BackendError, ChunkError, ThesisError};
pub use latex::{FigureConverter, FormulaConverter, Labeler, TableConverter};
pub use output::{
    ExtractionMode, ExtractionOutput, ExtractionStats, Section, ThesisData, ThesisMetadata,
};
pub use pipeline::chunker::{ContentChunk, ContentChunker};
pub use pipeline::merge::merge_results;
pub use pipeline::processor::{ChunkProcessingResult, ChunkProcessor};
pub use pipeline::structure::{DocumentStructure, StructureAnalyzer, StructureSource};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use references::{format_gbt7714, Reference, ReferenceFormatter, ReferenceType};
pub use stream::{extract_stream, ChunkStream};
