//! Reference list formatting to GB/T 7714.
//!
//! The merged reference text is whatever the model copied out of the
//! thesis, in whatever style the author used. [`ReferenceFormatter`] asks
//! the backend to split it into typed [`Reference`] entries and renders
//! them with [`format_gbt7714`]:
//!
//! ```text
//! [1] 张三, 李四. 深度学习综述[J]. 计算机学报, 2020, 43(1): 1-20.
//! [2] Goodfellow I, Bengio Y, Courville A, 等. Deep Learning[M]. Cambridge: MIT Press, 2016.
//! ```
//!
//! Formatting is best effort: if the call or its JSON fails, the raw text
//! is kept unchanged.

use crate::backend::ExtractionBackend;
use crate::error::ResponseError;
use crate::pipeline::response::{
    json_span, lenient, loose_list, loose_text, parse_json, strip_fences, Lenient,
};
use crate::prompts::reference_prompt;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

// ── Types ────────────────────────────────────────────────────────────────

/// Document type, rendered as the GB/T 7714 marker after the title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Journal,
    Book,
    Conference,
    Thesis,
    Website,
    Standard,
    #[default]
    #[serde(other)]
    Other,
}

impl ReferenceType {
    /// `J`, `M`, `C`, `D`, `EB/OL`, `S` or `Z`.
    pub fn marker(self) -> &'static str {
        match self {
            ReferenceType::Journal => "J",
            ReferenceType::Book => "M",
            ReferenceType::Conference => "C",
            ReferenceType::Thesis => "D",
            ReferenceType::Website => "EB/OL",
            ReferenceType::Standard => "S",
            ReferenceType::Other => "Z",
        }
    }
}

/// One parsed bibliography entry.
///
/// Optional fields are trimmed and never empty; numbers in the JSON
/// (`"year": 2020`) are read as text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Reference {
    #[serde(rename = "type", deserialize_with = "lenient")]
    pub kind: ReferenceType,
    #[serde(deserialize_with = "loose_list")]
    pub authors: Vec<String>,
    #[serde(deserialize_with = "loose_text")]
    pub title: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub journal: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub publisher: Option<String>,
    #[serde(alias = "publisher_location", deserialize_with = "loose_text")]
    pub publisher_location: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub year: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub volume: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub issue: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub pages: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub doi: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub url: Option<String>,
    #[serde(alias = "access_date", deserialize_with = "loose_text")]
    pub access_date: Option<String>,
    #[serde(alias = "conference_name", deserialize_with = "loose_text")]
    pub conference_name: Option<String>,
    #[serde(deserialize_with = "loose_text")]
    pub institution: Option<String>,
    #[serde(alias = "standard_number", deserialize_with = "loose_text")]
    pub standard_number: Option<String>,
}

// ── Formatting ───────────────────────────────────────────────────────────

/// Authors joined with `, `; past three, the first three and `等`.
pub fn format_authors(authors: &[String]) -> String {
    if authors.len() <= 3 {
        authors.join(", ")
    } else {
        format!("{}, 等", authors[..3].join(", "))
    }
}

/// Render one entry with its 1-based number `n`.
pub fn format_reference(r: &Reference, n: usize) -> String {
    let marker = r.kind.marker();
    let title = r.title.as_deref().unwrap_or_default();

    if r.kind == ReferenceType::Standard {
        let mut out = format!("[{n}]");
        if let Some(number) = &r.standard_number {
            let _ = write!(out, " {number},");
        }
        let _ = write!(out, " {title}[{marker}].");
        return out;
    }

    // No authors: the entry starts at the title instead of ". Title".
    let authors = format_authors(&r.authors);
    let mut out = if authors.is_empty() {
        format!("[{n}] {title}[{marker}]")
    } else {
        format!("[{n}] {authors}. {title}[{marker}]")
    };

    match r.kind {
        ReferenceType::Journal => {
            let _ = write!(out, ". {}", r.journal.as_deref().unwrap_or_default());
            if let Some(year) = &r.year {
                let _ = write!(out, ", {year}");
            }
            if let Some(volume) = &r.volume {
                let _ = write!(out, ", {volume}");
                if let Some(issue) = &r.issue {
                    let _ = write!(out, "({issue})");
                }
            }
            if let Some(pages) = &r.pages {
                let _ = write!(out, ": {pages}");
            }
            out.push('.');
            if let Some(doi) = &r.doi {
                let _ = write!(out, " DOI: {doi}.");
            }
        }
        ReferenceType::Book | ReferenceType::Conference => {
            if r.kind == ReferenceType::Conference {
                if let Some(conference) = &r.conference_name {
                    let _ = write!(out, "//{conference}");
                }
            }
            out.push('.');
            push_imprint(&mut out, r, r.publisher.as_deref());
            if let Some(pages) = &r.pages {
                let _ = write!(out, ": {pages}");
            }
            out.push('.');
        }
        ReferenceType::Thesis => {
            out.push('.');
            push_imprint(&mut out, r, r.institution.as_deref());
            out.push('.');
        }
        ReferenceType::Website => {
            out.push('.');
            if let Some(year) = &r.year {
                let _ = write!(out, " ({year})");
            }
            if let Some(accessed) = &r.access_date {
                let _ = write!(out, "[{accessed}]");
            }
            out.push('.');
            if let Some(url) = &r.url {
                let _ = write!(out, " {url}.");
            }
        }
        ReferenceType::Other | ReferenceType::Standard => {
            out.push('.');
            if let Some(year) = &r.year {
                let _ = write!(out, " {year}.");
            }
        }
    }
    out
}

/// ` 地点: 出版者, 年` with each part present only when known.
fn push_imprint(out: &mut String, r: &Reference, issuer: Option<&str>) {
    if let Some(place) = &r.publisher_location {
        let _ = write!(out, " {place}:");
    }
    if let Some(issuer) = issuer {
        let _ = write!(out, " {issuer}");
    }
    if let Some(year) = &r.year {
        let _ = write!(out, ", {year}");
    }
}

/// Render a whole list, numbered from 1, one entry per line.
pub fn format_gbt7714(references: &[Reference]) -> String {
    references
        .iter()
        .enumerate()
        .map(|(i, r)| format_reference(r, i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Parsing ──────────────────────────────────────────────────────────────

#[derive(Default, Deserialize)]
#[serde(default)]
struct ReferenceList {
    #[serde(deserialize_with = "lenient")]
    references: Vec<Lenient<Reference>>,
}

/// Parse a reference response: `{"references": [...]}` or a bare array.
///
/// Entries without a title are dropped.
pub fn parse_references(raw: &str) -> Result<Vec<Reference>, ResponseError> {
    let trimmed = strip_fences(raw.trim());
    let entries = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<Lenient<Reference>>>(json_span(trimmed, '[', ']'))
            .map_err(|e| ResponseError::NotJson(e.to_string()))?
    } else {
        parse_json::<ReferenceList>(raw)?.references
    };
    Ok(entries
        .into_iter()
        .filter_map(Lenient::into_value)
        .filter(|r| r.title.is_some())
        .collect())
}

// ── Backend pass ─────────────────────────────────────────────────────────

/// Reformats a raw reference list through the backend.
pub struct ReferenceFormatter {
    backend: Arc<dyn ExtractionBackend>,
    max_tokens: usize,
}

impl ReferenceFormatter {
    pub fn new(backend: Arc<dyn ExtractionBackend>, max_tokens: usize) -> Self {
        Self {
            backend,
            max_tokens,
        }
    }

    /// The GB/T 7714 rendering of `raw`, or `raw` itself when the call
    /// fails, the answer is not JSON, or no entry survives parsing.
    pub async fn format(&self, raw: &str) -> String {
        if raw.trim().is_empty() {
            return String::new();
        }
        info!("Formatting references ({} chars)", raw.chars().count());

        let answer = match self.backend.call(&reference_prompt(raw), self.max_tokens).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Reference formatting call failed, keeping raw list: {}", e);
                return raw.to_string();
            }
        };
        match parse_references(&answer) {
            Ok(refs) if !refs.is_empty() => {
                info!("Formatted {} references", refs.len());
                format_gbt7714(&refs)
            }
            Ok(_) => {
                warn!("Reference response listed no entries, keeping raw list");
                raw.to_string()
            }
            Err(e) => {
                warn!("Reference response unusable, keeping raw list: {}", e);
                raw.to_string()
            }
        }
    }
}
