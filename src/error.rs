//! Error types for the edgequake-thesis2tex library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ThesisError`] — **Fatal**: the extraction cannot proceed at all
//!   (empty input, provider not configured, every chunk failed). Returned as
//!   `Err(ThesisError)` from the top-level `extract*` functions.
//!
//! * [`ChunkError`] — **Non-fatal**: a single chunk failed (transient API
//!   error, malformed JSON) but the other chunks are fine. Its message is
//!   stored on the failed [`crate::pipeline::processor::ChunkProcessingResult`]
//!   and surfaces as a warning on the merged document.
//!
//! Structure-analysis failures never appear here: they are recovered by the
//! regex fallback. Ambiguous tables and unmatched formula fragments are not
//! errors either; the original markup is kept and a log line is emitted.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-thesis2tex library.
#[derive(Debug, Error)]
pub enum ThesisError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input text is empty or whitespace only.
    #[error("Input text is empty; nothing to extract")]
    EmptyInput,

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every chunk failed after all retries; there is nothing to merge.
    #[error("All {total} chunks failed to process.\nFirst error: {first_error}")]
    AllChunksFailed { total: usize, first_error: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The extracted document could not be serialised.
    #[error("Failed to serialise thesis data: {0}")]
    Serialization(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single chunk.
///
/// `chunk` is the 1-indexed chunk number. The Display text leaves it out;
/// the merged warning puts it in front.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// The backend call itself failed.
    #[error("backend call failed: {detail}")]
    Backend { chunk: usize, detail: String },

    /// The backend answered but the payload was not a usable JSON object.
    #[error("invalid response: {detail}")]
    InvalidResponse { chunk: usize, detail: String },
}

/// Errors produced by an [`crate::backend::ExtractionBackend`].
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The provider returned an error (HTTP status, rate limit, auth…).
    #[error("LLM API error: {0}")]
    Api(String),

    /// The provider answered with no content.
    #[error("Empty response from LLM")]
    EmptyResponse,

    /// The call did not complete within the configured timeout.
    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Errors from validating a backend response as a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    #[error("response JSON is not an object")]
    NotAnObject,
}
