//! Output types: the extracted thesis document and run statistics.
//!
//! [`ThesisData`] doubles as the per-chunk partial result. A chunk that did
//! not see the abstract simply leaves `abstract_text` as `None`; the merge
//! step fills the final document field by field.

use crate::pipeline::structure::{DocumentStructure, StructureSource};
use serde::{Deserialize, Serialize};

// ── Document ─────────────────────────────────────────────────────────────

/// Bibliographic metadata of a thesis. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThesisMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervisor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl ThesisMetadata {
    fn fields(&self) -> [&Option<String>; 8] {
        [
            &self.title,
            &self.title_en,
            &self.author,
            &self.student_id,
            &self.school,
            &self.major,
            &self.supervisor,
            &self.date,
        ]
    }

    fn fields_mut(&mut self) -> [&mut Option<String>; 8] {
        [
            &mut self.title,
            &mut self.title_en,
            &mut self.author,
            &mut self.student_id,
            &mut self.school,
            &mut self.major,
            &mut self.supervisor,
            &mut self.date,
        ]
    }

    /// Number of fields holding a non-empty value.
    pub fn filled_count(&self) -> usize {
        self.fields()
            .iter()
            .filter(|f| f.as_deref().is_some_and(|s| !s.trim().is_empty()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.filled_count() == 0
    }

    /// Copy every field of `other` into `self` where `self` has nothing.
    pub fn backfill_from(&mut self, other: &ThesisMetadata) {
        for (dst, src) in self.fields_mut().into_iter().zip(other.fields()) {
            let empty = dst.as_deref().is_none_or(|s| s.trim().is_empty());
            if empty {
                if let Some(v) = src.as_deref().filter(|s| !s.trim().is_empty()) {
                    *dst = Some(v.to_string());
                }
            }
        }
    }
}

/// One body section of the thesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub content: String,
    /// Heading depth: 1 (chapter), 2 or 3.
    pub level: u8,
}

/// The structured thesis, or a partial view of it produced by one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThesisData {
    #[serde(default)]
    pub metadata: ThesisMetadata,

    /// Body sections in source-document order.
    #[serde(default)]
    pub sections: Vec<Section>,

    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_en: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords_en: Option<String>,

    /// Reference list, one entry per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledgements: Option<String>,

    /// One entry per chunk that failed after all retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

// ── Run statistics ───────────────────────────────────────────────────────

/// How the document was sent to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// The whole text went out in one call.
    SingleCall,
    /// Structure analysis, chunking, then one call per chunk.
    TwoPhase,
}

/// Statistics for one extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub mode: ExtractionMode,
    /// `None` in single-call mode.
    pub structure_source: Option<StructureSource>,
    pub input_chars: usize,
    pub total_chunks: usize,
    pub succeeded_chunks: usize,
    pub failed_chunks: usize,
    /// Sum of `retry_count` over every chunk.
    pub total_retries: u32,
    pub sections: usize,
    pub structure_duration_ms: u64,
    pub extraction_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything [`crate::extract`] produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub thesis: ThesisData,
    /// The structure the chunks were cut from (two-phase mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure: Option<DocumentStructure>,
    pub stats: ExtractionStats,
}
