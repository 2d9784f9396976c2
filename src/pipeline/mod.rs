//! Pipeline stages for thesis-text extraction.
//!
//! Each submodule implements one step; only [`structure`] and
//! [`processor`] talk to the backend.
//!
//! ## Data Flow
//!
//! ```text
//! text ──▶ structure ──▶ chunker ──▶ processor ──▶ merge
//!          (outline)     (packing)   (LLM + LaTeX) (one document)
//! ```
//!
//! 1. [`structure`] — locate headings, abstract, references and
//!    acknowledgements; falls back to regex detection when the model fails
//! 2. [`chunker`]   — pack sections into size-bounded chunks, splitting
//!    oversized sections at paragraph or sentence boundaries
//! 3. [`processor`] — one backend call per chunk, concurrently, with
//!    retry; parsed by [`response`] and normalised by [`crate::latex`]
//! 4. [`merge`]     — combine chunk results, dedup, record failures
//!
//! Documents below the single-call threshold skip steps 1 and 2.

pub mod chunker;
pub mod merge;
pub mod processor;
pub mod response;
pub mod retry;
pub mod structure;
pub mod text;
