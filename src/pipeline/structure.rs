//! Document structure discovery.
//!
//! [`StructureAnalyzer::analyze`] asks the backend for the section outline
//! and the abstract / references / acknowledgements ranges. When the call
//! or its JSON fails, [`regex_fallback`] recovers an outline from heading
//! patterns alone, so analysis never fails.
//!
//! All positions are char offsets into the input text.

use crate::backend::ExtractionBackend;
use crate::config::{ExtractionConfig, RetryPolicy};
use crate::error::ResponseError;
use crate::output::ThesisMetadata;
use crate::pipeline::response::{char_position, lenient, parse_json, Lenient, Level, RawMetadata};
use crate::pipeline::retry::run_with_retry;
use crate::pipeline::text::{truncate_chars, CharText};
use crate::prompts::structure_prompt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ── Types ────────────────────────────────────────────────────────────────

/// A half-open char range `[start, end)` with `start ≤ end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: usize,
    pub end: usize,
}

impl TextRange {
    /// Build a range, clamping `end` up to `start`.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }
}

/// One heading of the outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureSection {
    pub title: String,
    /// 1 (chapter), 2 or 3.
    pub level: u8,
    pub start_pos: usize,
    pub end_pos: usize,
}

/// Where a [`DocumentStructure`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureSource {
    Llm,
    RegexFallback,
}

/// The outline of a thesis, sections ordered by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStructure {
    pub metadata: ThesisMetadata,
    pub sections: Vec<StructureSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_range: Option<TextRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references_range: Option<TextRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledgements_range: Option<TextRange>,
    pub source: StructureSource,
}

// ── LLM path ─────────────────────────────────────────────────────────────

/// Chars of the document sent verbatim ahead of the outline.
pub const EXCERPT_CHARS: usize = 3000;
/// Lines longer than this are body text, not heading candidates.
const OUTLINE_LINE_CHARS: usize = 60;
const OUTLINE_MAX_LINES: usize = 2000;

/// Discovers the section outline of a document.
pub struct StructureAnalyzer {
    backend: Arc<dyn ExtractionBackend>,
    policy: RetryPolicy,
    max_tokens: usize,
}

impl StructureAnalyzer {
    pub fn new(backend: Arc<dyn ExtractionBackend>, config: &ExtractionConfig) -> Self {
        Self {
            backend,
            policy: config.structure_retry_policy(),
            max_tokens: config.structure_max_tokens,
        }
    }

    /// Analyse `text`. Falls back to [`regex_fallback`] on any failure.
    pub async fn analyze(&self, text: &str) -> DocumentStructure {
        let chars = text.chars().count();
        let prompt = structure_prompt(truncate_chars(text, EXCERPT_CHARS), &document_outline(text), chars);

        let backend = &self.backend;
        let prompt = prompt.as_str();
        let max_tokens = self.max_tokens;
        let result = run_with_retry(&self.policy, "Structure analysis", move |_| async move {
            let raw = backend
                .call(prompt, max_tokens)
                .await
                .map_err(|e| e.to_string())?;
            parse_structure(&raw, chars).map_err(|e| e.to_string())
        })
        .await;

        match result {
            Ok(done) if !done.value.sections.is_empty() => {
                info!(
                    "Structure extracted: {} sections ({} retries)",
                    done.value.sections.len(),
                    done.retries
                );
                done.value
            }
            Ok(_) => {
                warn!("Structure response listed no sections, using regex fallback");
                regex_fallback(text)
            }
            Err(failed) => {
                warn!(
                    "Structure analysis failed after {} retries: {}; using regex fallback",
                    failed.retries, failed.value
                );
                regex_fallback(text)
            }
        }
    }
}

/// A `[@offset] line` listing of every short non-empty line.
///
/// Headings are short lines, so this gives the model exact char offsets
/// for every candidate without sending the whole body.
pub fn document_outline(text: &str) -> String {
    let mut out = String::new();
    let mut offset = 0usize;
    let mut emitted = 0usize;
    for line in text.split('\n') {
        let len = line.chars().count();
        let trimmed = line.trim();
        if !trimmed.is_empty() && trimmed.chars().count() <= OUTLINE_LINE_CHARS {
            let lead = line.chars().take_while(|c| c.is_whitespace()).count();
            out.push_str(&format!("[@{}] {}\n", offset + lead, trimmed));
            emitted += 1;
            if emitted >= OUTLINE_MAX_LINES {
                debug!("Outline capped at {} lines", OUTLINE_MAX_LINES);
                break;
            }
        }
        offset += len + 1;
    }
    out
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawStructure {
    #[serde(deserialize_with = "lenient")]
    metadata: RawMetadata,
    #[serde(deserialize_with = "lenient")]
    sections: Vec<Lenient<RawOutlineEntry>>,
    #[serde(rename = "abstractRange", alias = "abstract_range", deserialize_with = "lenient")]
    abstract_range: Option<RawRange>,
    #[serde(rename = "referencesRange", alias = "references_range", deserialize_with = "lenient")]
    references_range: Option<RawRange>,
    #[serde(
        rename = "acknowledgementsRange",
        alias = "acknowledgements_range",
        deserialize_with = "lenient"
    )]
    acknowledgements_range: Option<RawRange>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawOutlineEntry {
    title: Option<String>,
    level: Level,
    #[serde(rename = "startPos", alias = "start_pos", deserialize_with = "char_position")]
    start_pos: Option<usize>,
    #[serde(rename = "endPos", alias = "end_pos", deserialize_with = "char_position")]
    end_pos: Option<usize>,
}

impl RawOutlineEntry {
    fn into_section(self, text_chars: usize) -> Option<StructureSection> {
        let title = self.title?.trim().to_string();
        if title.is_empty() {
            return None;
        }
        let start = self.start_pos?.min(text_chars);
        let end = self.end_pos.unwrap_or(start).clamp(start, text_chars.max(start));
        Some(StructureSection {
            title,
            level: self.level.0,
            start_pos: start,
            end_pos: end,
        })
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawRange {
    #[serde(deserialize_with = "char_position")]
    start: Option<usize>,
    #[serde(deserialize_with = "char_position")]
    end: Option<usize>,
}

impl RawRange {
    fn into_range(self, text_chars: usize) -> Option<TextRange> {
        let start = self.start?.min(text_chars);
        let end = self.end.unwrap_or(start).min(text_chars);
        Some(TextRange::new(start, end))
    }
}

/// Validate a structure response against a text of `text_chars` chars.
///
/// Sections need a title and a numeric start; positions clamp into
/// `[0, text_chars]`, each end is raised to its start, and sections are
/// sorted by position.
pub fn parse_structure(raw: &str, text_chars: usize) -> Result<DocumentStructure, ResponseError> {
    let resp: RawStructure = parse_json(raw)?;

    let mut sections: Vec<StructureSection> = resp
        .sections
        .into_iter()
        .filter_map(Lenient::into_value)
        .filter_map(|entry| entry.into_section(text_chars))
        .collect();
    sections.sort_by_key(|s| s.start_pos);

    let range = |r: Option<RawRange>| r.and_then(|r| r.into_range(text_chars));
    Ok(DocumentStructure {
        metadata: resp.metadata.into_metadata(),
        sections,
        abstract_range: range(resp.abstract_range),
        references_range: range(resp.references_range),
        acknowledgements_range: range(resp.acknowledgements_range),
        source: StructureSource::Llm,
    })
}

// ── Regex fallback ───────────────────────────────────────────────────────

static HEADING_PATTERNS: Lazy<[Regex; 4]> = Lazy::new(|| {
    [
        Regex::new(r"(?m)^(第[一二三四五六七八九十\d]+章)[ \t\x{3000}]*(.*)$").unwrap(),
        Regex::new(r"(?m)^(\d+(?:\.\d+)*)[ \t\x{3000}]+(.+)$").unwrap(),
        Regex::new(r"(?mi)^(Chapter[ \t]+\d+)[ \t]*[:.]?[ \t]*(.*)$").unwrap(),
        Regex::new(r"(?m)^([一二三四五六七八九十]+、)[ \t\x{3000}]*(.+)$").unwrap(),
    ]
});

static RE_ABSTRACT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)摘\s*要|Abstract").unwrap());
static RE_ABSTRACT_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)关键词|Keywords|目录|第[一二三四五六七八九十\d]+章|Chapter\s+\d+").unwrap()
});
static RE_REFERENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)参考文献|References|Bibliography").unwrap());
static RE_ACKNOWLEDGEMENTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)致\s*谢|Acknowledgements?").unwrap());

/// The abstract end is searched from this far past its start…
const ABSTRACT_MIN_CHARS: usize = 100;
/// …up to this far; without a match the abstract spans this many chars.
const ABSTRACT_WINDOW_CHARS: usize = 5000;
const ACKNOWLEDGEMENTS_MAX_CHARS: usize = 10_000;

/// Recover a structure from heading patterns alone.
///
/// Recognises `第X章 …`, `1.2.3 …`, `Chapter N …` and `一、…` lines.
/// Level is 3 for a two-dot number, 2 for one dot, 1 otherwise. Each
/// section ends one char before the next heading, the last at text end.
pub fn regex_fallback(text: &str) -> DocumentStructure {
    let ct = CharText::new(text);
    let len = ct.len();

    let mut headings: Vec<(usize, String, u8)> = Vec::new();
    for re in HEADING_PATTERNS.iter() {
        for caps in re.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let prefix = caps.get(1).map_or("", |m| m.as_str());
            let title = caps.get(2).map_or("", |m| m.as_str()).trim();
            let title = if title.is_empty() { prefix.trim() } else { title };
            headings.push((ct.char_at(whole.start()), title.to_string(), prefix_level(prefix)));
        }
    }
    headings.sort_by_key(|h| h.0);
    headings.dedup_by_key(|h| h.0);

    let sections: Vec<StructureSection> = headings
        .iter()
        .enumerate()
        .map(|(i, (pos, title, level))| StructureSection {
            title: title.clone(),
            level: *level,
            start_pos: *pos,
            end_pos: headings.get(i + 1).map_or(len, |next| next.0 - 1),
        })
        .collect();

    let abstract_range = RE_ABSTRACT.find(text).map(|m| {
        let start = ct.char_at(m.start());
        let window_start = start + ABSTRACT_MIN_CHARS;
        let window = ct.slice(window_start, start + ABSTRACT_WINDOW_CHARS);
        let end = match RE_ABSTRACT_END.find(window) {
            Some(end) => window_start + window[..end.start()].chars().count(),
            None => (start + ABSTRACT_WINDOW_CHARS).min(len),
        };
        TextRange::new(start, end)
    });

    let references_range = RE_REFERENCES
        .find(text)
        .map(|m| TextRange::new(ct.char_at(m.start()), len));

    let acknowledgements_range = RE_ACKNOWLEDGEMENTS.find(text).map(|m| {
        let start = ct.char_at(m.start());
        let limit = references_range
            .map(|r| r.start)
            .filter(|&r| r > start)
            .unwrap_or(len);
        TextRange::new(start, limit.min(start + ACKNOWLEDGEMENTS_MAX_CHARS))
    });

    info!("Regex extraction: {} sections found", sections.len());
    DocumentStructure {
        metadata: ThesisMetadata::default(),
        sections,
        abstract_range,
        references_range,
        acknowledgements_range,
        source: StructureSource::RegexFallback,
    }
}

fn prefix_level(prefix: &str) -> u8 {
    if !prefix.starts_with(|c: char| c.is_ascii_digit()) {
        return 1;
    }
    match prefix.matches('.').count() {
        0 => 1,
        1 => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use async_trait::async_trait;

    const SAMPLE: &str = "基于深度学习的图像分割研究\n摘要\n本文研究了图像分割问题。\n关键词：深度学习\n第一章 绪论\n1.1 研究背景\n背景内容。\n1.1.1 问题描述\n问题。\n第二章 方法\n方法内容。\n致谢\n感谢导师。\n参考文献\n[1] 张三. 论文.\n";

    fn pos_of(haystack: &str, needle: &str) -> usize {
        let byte = haystack.find(needle).unwrap();
        haystack[..byte].chars().count()
    }

    #[test]
    fn fallback_finds_headings_with_levels() {
        let s = regex_fallback(SAMPLE);
        let titles: Vec<(&str, u8)> = s.sections.iter().map(|x| (x.title.as_str(), x.level)).collect();
        assert_eq!(
            titles,
            vec![("绪论", 1), ("研究背景", 2), ("问题描述", 3), ("方法", 1)]
        );
        assert_eq!(s.source, StructureSource::RegexFallback);
        assert!(s.metadata.is_empty());
    }

    #[test]
    fn fallback_section_ends_before_next_heading() {
        let s = regex_fallback(SAMPLE);
        assert_eq!(s.sections[0].start_pos, pos_of(SAMPLE, "第一章"));
        assert_eq!(s.sections[0].end_pos, s.sections[1].start_pos - 1);
        assert_eq!(s.sections.last().unwrap().end_pos, SAMPLE.chars().count());
    }

    #[test]
    fn fallback_special_ranges() {
        let s = regex_fallback(SAMPLE);
        let len = SAMPLE.chars().count();

        let abs = s.abstract_range.unwrap();
        assert_eq!(abs.start, pos_of(SAMPLE, "摘要"));
        // Short abstract: no end marker past the 100-char offset.
        assert_eq!(abs.end, len);

        let refs = s.references_range.unwrap();
        assert_eq!(refs, TextRange::new(pos_of(SAMPLE, "参考文献"), len));

        let ack = s.acknowledgements_range.unwrap();
        assert_eq!(ack.start, pos_of(SAMPLE, "致谢"));
        assert_eq!(ack.end, refs.start);
    }

    #[test]
    fn abstract_ends_at_keywords_past_offset() {
        let body = "内".repeat(150);
        let text = format!("摘要\n{body}\n关键词：分割\n正文");
        let s = regex_fallback(&text);
        let abs = s.abstract_range.unwrap();
        assert_eq!(abs.end, pos_of(&text, "关键词"));
    }

    #[test]
    fn english_chapters_and_enumerators() {
        let text = "Chapter 1 Introduction\ntext\nCHAPTER 2: Methods\n一、总体设计\n";
        let s = regex_fallback(text);
        let titles: Vec<&str> = s.sections.iter().map(|x| x.title.as_str()).collect();
        assert_eq!(titles, vec!["Introduction", "Methods", "总体设计"]);
    }

    #[test]
    fn bare_chapter_line_uses_prefix_as_title() {
        let s = regex_fallback("第三章\n实验\n");
        assert_eq!(s.sections[0].title, "第三章");
    }

    #[test]
    fn text_without_headings() {
        let s = regex_fallback("just some prose without structure");
        assert!(s.sections.is_empty());
        assert!(s.abstract_range.is_none());
    }

    #[test]
    fn parse_clamps_and_sorts() {
        let raw = r#"{
            "metadata": {"title": " 论文 ", "author": ""},
            "sections": [
                {"title": "方法", "level": 1, "startPos": 500, "endPos": 400},
                {"title": "绪论", "level": 7, "startPos": -20, "endPos": 300},
                {"title": "", "level": 1, "startPos": 10},
                {"title": "无位置", "level": 1}
            ],
            "abstractRange": {"start": 5, "end": 2},
            "referencesRange": null
        }"#;
        let s = parse_structure(raw, 1000).unwrap();
        assert_eq!(s.metadata.title.as_deref(), Some("论文"));
        assert_eq!(s.metadata.author, None);
        assert_eq!(s.sections.len(), 2);
        assert_eq!(s.sections[0].title, "绪论");
        assert_eq!(s.sections[0].start_pos, 0);
        assert_eq!(s.sections[0].level, 1);
        assert_eq!(s.sections[1].end_pos, 500);
        assert_eq!(s.abstract_range, Some(TextRange { start: 5, end: 5 }));
        assert_eq!(s.references_range, None);
        assert_eq!(s.source, StructureSource::Llm);
    }

    #[test]
    fn parse_accepts_snake_case_keys() {
        let raw = r#"{
            "sections": [{"title": "绪论", "level": "2", "start_pos": 4, "end_pos": 40}],
            "references_range": {"start": 50, "end": 80},
            "acknowledgementsRange": "unknown"
        }"#;
        let s = parse_structure(raw, 100).unwrap();
        assert_eq!(s.sections[0].start_pos, 4);
        assert_eq!(s.sections[0].level, 2);
        assert_eq!(s.references_range, Some(TextRange::new(50, 80)));
        assert_eq!(s.acknowledgements_range, None);
    }

    #[test]
    fn parse_clamps_to_text_length() {
        let raw = r#"{"sections": [{"title": "A", "startPos": 90, "endPos": 5000}]}"#;
        let s = parse_structure(raw, 100).unwrap();
        assert_eq!(s.sections[0].end_pos, 100);
    }

    #[test]
    fn outline_reports_char_offsets() {
        let text = "论文标题\n\n  第一章 绪论\n这是一段很长的正文".to_string() + &"字".repeat(80);
        let outline = document_outline(&text);
        assert!(outline.contains("[@0] 论文标题"));
        assert!(outline.contains(&format!("[@{}] 第一章 绪论", pos_of(&text, "第一章"))));
        assert!(!outline.contains("这是一段"));
    }

    struct Scripted(Result<&'static str, BackendError>);

    #[async_trait]
    impl ExtractionBackend for Scripted {
        async fn call(&self, _prompt: &str, _max_tokens: usize) -> Result<String, BackendError> {
            self.0.clone().map(str::to_string)
        }
    }

    fn analyzer(backend: Scripted) -> StructureAnalyzer {
        StructureAnalyzer::new(Arc::new(backend), &ExtractionConfig::default())
    }

    #[tokio::test]
    async fn analyze_uses_backend_outline() {
        let a = analyzer(Scripted(Ok(
            r#"{"sections": [{"title": "绪论", "level": 1, "startPos": 3, "endPos": 9}]}"#,
        )));
        let s = a.analyze(SAMPLE).await;
        assert_eq!(s.source, StructureSource::Llm);
        assert_eq!(s.sections.len(), 1);
    }

    #[tokio::test]
    async fn analyze_falls_back_on_backend_error() {
        let a = analyzer(Scripted(Err(BackendError::Api("503".into()))));
        let s = a.analyze(SAMPLE).await;
        assert_eq!(s.source, StructureSource::RegexFallback);
        assert_eq!(s.sections.len(), 4);
    }

    #[tokio::test]
    async fn analyze_falls_back_on_bad_json() {
        let a = analyzer(Scripted(Ok("I cannot help with that.")));
        assert_eq!(a.analyze(SAMPLE).await.source, StructureSource::RegexFallback);
    }

    #[tokio::test]
    async fn analyze_falls_back_on_empty_outline() {
        let a = analyzer(Scripted(Ok(r#"{"sections": []}"#)));
        assert_eq!(a.analyze(SAMPLE).await.source, StructureSource::RegexFallback);
    }
}
