//! Progress-callback trait for per-chunk extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline analyses the structure and extracts each chunk.
//! Callers can forward them to a channel, a job-status record or a
//! terminal progress bar; the library does not care which.
//!
//! # Example
//!
//! ```rust
//! use edgequake_thesis2tex::{ExtractionProgressCallback, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ExtractionProgressCallback for CountingCallback {
//!     fn on_chunk_complete(&self, chunk_num: usize, total_chunks: usize, sections: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Chunk {}/{} done ({} sections)", chunk_num, total_chunks, sections);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::structure::StructureSource;
use std::sync::Arc;

/// Called by the extraction pipeline as it works through a document.
///
/// Chunks run concurrently, so the per-chunk methods may be called from
/// several tasks at once; protect shared state with `Mutex` or atomics.
/// Every method defaults to a no-op.
pub trait ExtractionProgressCallback: Send + Sync {
    /// The outline is known (two-phase mode only).
    fn on_structure_ready(&self, sections: usize, source: StructureSource) {
        let _ = (sections, source);
    }

    /// Called once before any chunk is sent.
    fn on_extraction_start(&self, total_chunks: usize) {
        let _ = total_chunks;
    }

    /// Called just before the first attempt for a chunk.
    ///
    /// # Arguments
    /// * `chunk_num`    — 1-indexed chunk number
    /// * `total_chunks` — total chunks in the document
    fn on_chunk_start(&self, chunk_num: usize, total_chunks: usize) {
        let _ = (chunk_num, total_chunks);
    }

    /// Called when a chunk was extracted; `sections` is how many it yielded.
    fn on_chunk_complete(&self, chunk_num: usize, total_chunks: usize, sections: usize) {
        let _ = (chunk_num, total_chunks, sections);
    }

    /// Called when a chunk fails after all retries.
    fn on_chunk_error(&self, chunk_num: usize, total_chunks: usize, error: &str) {
        let _ = (chunk_num, total_chunks, error);
    }

    /// Called once after every chunk has been attempted.
    fn on_extraction_complete(&self, total_chunks: usize, success_count: usize) {
        let _ = (total_chunks, success_count);
    }
}

/// A no-op implementation, the default when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
