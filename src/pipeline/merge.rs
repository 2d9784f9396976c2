//! Combines chunk results into one document.
//!
//! * metadata: the most complete candidate wins; its empty fields are
//!   back-filled from the others in score order
//! * sections: concatenated in chunk order, then deduplicated
//! * abstract, keywords, acknowledgements: first chunk that has them
//! * references: merged across chunks, deduplicated entry by entry
//! * one warning per failed chunk

use crate::error::ThesisError;
use crate::output::{Section, ThesisData, ThesisMetadata};
use crate::pipeline::processor::ChunkProcessingResult;
use crate::pipeline::text::truncate_chars;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Characters of content that take part in the section dedup key.
const DEDUP_PREFIX_CHARS: usize = 100;
/// Characters of a normalised reference that take part in its dedup key.
const REFERENCE_KEY_CHARS: usize = 100;

static RE_REFERENCE_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\[\d+\]|\d+\.\s|\d+\)\s)").unwrap());
static RE_LEADING_NUMBERING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\[\d.)\]]+\s*").unwrap());

/// Merge `results` into one [`ThesisData`].
///
/// # Errors
/// [`ThesisError::AllChunksFailed`] when no chunk succeeded, including
/// when `results` is empty.
pub fn merge_results(results: &[ChunkProcessingResult]) -> Result<ThesisData, ThesisError> {
    let mut successes: Vec<(usize, &ThesisData)> = results
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.data.as_ref().map(|d| (r.chunk_index, d)))
        .collect();

    if successes.is_empty() {
        let first_error = results
            .iter()
            .find_map(|r| r.error.clone())
            .unwrap_or_else(|| "no chunks to merge".to_string());
        return Err(ThesisError::AllChunksFailed {
            total: results.len(),
            first_error,
        });
    }
    successes.sort_by_key(|(index, _)| *index);
    let parts: Vec<&ThesisData> = successes.into_iter().map(|(_, d)| d).collect();

    let mut failures: Vec<&ChunkProcessingResult> = results.iter().filter(|r| !r.success).collect();
    failures.sort_by_key(|r| r.chunk_index);
    let warnings: Vec<String> = failures
        .iter()
        .map(|f| {
            let warning = format!(
                "Chunk {} failed after {} retries: {}",
                f.chunk_index + 1,
                f.retry_count,
                f.error.as_deref().unwrap_or("unknown error")
            );
            warn!("{}", warning);
            warning
        })
        .collect();

    let sections = dedup_sections(parts.iter().flat_map(|p| p.sections.iter().cloned()).collect());
    let merged = ThesisData {
        metadata: select_metadata(&parts),
        abstract_text: first_found(&parts, |d| &d.abstract_text),
        abstract_en: first_found(&parts, |d| &d.abstract_en),
        keywords: first_found(&parts, |d| &d.keywords),
        keywords_en: first_found(&parts, |d| &d.keywords_en),
        acknowledgements: first_found(&parts, |d| &d.acknowledgements),
        references: merge_references(parts.iter().filter_map(|p| p.references.as_deref()).collect()),
        sections,
        warnings: (!warnings.is_empty()).then_some(warnings),
    };

    info!(
        "Merged {} chunks into {} sections",
        parts.len(),
        merged.sections.len()
    );
    if !failures.is_empty() {
        warn!("{} chunks were skipped due to failures", failures.len());
    }
    Ok(merged)
}

fn first_found<'a>(
    parts: &[&'a ThesisData],
    field: impl Fn(&'a ThesisData) -> &'a Option<String>,
) -> Option<String> {
    parts.iter().find_map(|p| field(p).clone())
}

/// Highest-scoring metadata, back-filled field by field from the rest.
/// Ties keep chunk order.
fn select_metadata(parts: &[&ThesisData]) -> ThesisMetadata {
    let mut candidates: Vec<&ThesisMetadata> = parts
        .iter()
        .map(|p| &p.metadata)
        .filter(|m| !m.is_empty())
        .collect();
    candidates.sort_by_key(|m| std::cmp::Reverse(m.filled_count()));

    let mut iter = candidates.into_iter();
    let Some(best) = iter.next() else {
        return ThesisMetadata::default();
    };
    let mut merged = best.clone();
    for other in iter {
        merged.backfill_from(other);
    }
    merged
}

/// Drop sections seen before (same title, level and content prefix) and
/// sections repeating the title and level of the one just kept.
fn dedup_sections(sections: Vec<Section>) -> Vec<Section> {
    let mut seen: HashSet<(String, u8, String)> = HashSet::new();
    let mut out: Vec<Section> = Vec::with_capacity(sections.len());

    for section in sections {
        let key = (
            section.title.clone(),
            section.level,
            truncate_chars(&section.content, DEDUP_PREFIX_CHARS).to_string(),
        );
        let repeats_previous = out
            .last()
            .is_some_and(|prev| prev.title == section.title && prev.level == section.level);

        if repeats_previous || seen.contains(&key) {
            debug!(
                "Duplicate section removed: \"{}\" (consecutive: {})",
                section.title, repeats_previous
            );
            continue;
        }
        seen.insert(key);
        out.push(section);
    }
    out
}

/// Merge reference lists. A single list is returned untouched; several are
/// split into entries and deduplicated on their text without numbering.
fn merge_references(lists: Vec<&str>) -> Option<String> {
    match lists.len() {
        0 => return None,
        1 => return Some(lists[0].to_string()),
        _ => {}
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut unique: Vec<&str> = Vec::new();
    for entry in lists.into_iter().flat_map(split_references) {
        let stripped = RE_LEADING_NUMBERING.replace(entry, "").to_lowercase();
        let key = truncate_chars(&stripped, REFERENCE_KEY_CHARS).to_string();
        if seen.insert(key) {
            unique.push(entry);
        }
    }
    Some(unique.join("\n"))
}

/// Split a reference list before every line opening with `[n]`, `n. ` or `n) `.
fn split_references(list: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut start = 0usize;
    let mut offset = 0usize;
    for line in list.split_inclusive('\n') {
        if offset > 0 && RE_REFERENCE_START.is_match(line) {
            entries.push(&list[start..offset]);
            start = offset;
        }
        offset += line.len();
    }
    entries.push(&list[start..]);
    entries
        .into_iter()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(title: &str, content: &str, level: u8) -> Section {
        Section {
            title: title.into(),
            content: content.into(),
            level,
        }
    }

    fn ok(index: usize, data: ThesisData) -> ChunkProcessingResult {
        ChunkProcessingResult::succeeded(index, data, 0)
    }

    fn with_sections(sections: Vec<Section>) -> ThesisData {
        ThesisData {
            sections,
            ..Default::default()
        }
    }

    #[test]
    fn partial_failure_keeps_successful_sections() {
        let results = vec![
            ok(0, with_sections(vec![section("绪论", "a", 1), section("背景", "b", 2)])),
            ChunkProcessingResult::failed(1, "backend call failed: 503", 3),
            ok(2, with_sections(vec![section("结论", "c", 1)])),
        ];
        let merged = merge_results(&results).unwrap();
        assert_eq!(merged.sections.len(), 3);
        let warnings = merged.warnings.unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Chunk 2"));
        assert_eq!(warnings[0], "Chunk 2 failed after 3 retries: backend call failed: 503");
    }

    #[test]
    fn no_warnings_when_everything_succeeds() {
        let merged = merge_results(&[ok(0, with_sections(vec![section("A", "x", 1)]))]).unwrap();
        assert!(merged.warnings.is_none());
    }

    #[test]
    fn empty_and_all_failed_are_fatal() {
        assert!(matches!(
            merge_results(&[]),
            Err(ThesisError::AllChunksFailed { total: 0, .. })
        ));
        let failed = vec![
            ChunkProcessingResult::failed(0, "first", 3),
            ChunkProcessingResult::failed(1, "second", 3),
        ];
        match merge_results(&failed) {
            Err(ThesisError::AllChunksFailed { total, first_error }) => {
                assert_eq!(total, 2);
                assert_eq!(first_error, "first");
            }
            other => panic!("expected AllChunksFailed, got {other:?}"),
        }
    }

    #[test]
    fn sections_follow_chunk_order() {
        let results = vec![
            ok(1, with_sections(vec![section("二", "y", 1)])),
            ok(0, with_sections(vec![section("一", "x", 1)])),
        ];
        let merged = merge_results(&results).unwrap();
        let titles: Vec<&str> = merged.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["一", "二"]);
    }

    #[test]
    fn duplicate_and_consecutive_sections_dropped() {
        let sections = vec![
            section("方法", "同样的内容", 1),
            section("方法", "边界重复", 1),
            section("实验", "e", 1),
            section("方法", "同样的内容", 1),
            section("方法", "同样的内容", 2),
        ];
        let out = dedup_sections(sections);
        let keys: Vec<(&str, u8)> = out.iter().map(|s| (s.title.as_str(), s.level)).collect();
        assert_eq!(keys, vec![("方法", 1), ("实验", 1), ("方法", 2)]);
    }

    #[test]
    fn metadata_best_score_with_backfill() {
        let sparse = ThesisData {
            metadata: ThesisMetadata {
                title: Some("草稿标题".into()),
                date: Some("2024年5月".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let rich = ThesisData {
            metadata: ThesisMetadata {
                title: Some("正式标题".into()),
                author: Some("张三".into()),
                school: Some("计算机学院".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let merged = merge_results(&[ok(0, sparse), ok(1, rich)]).unwrap();
        assert_eq!(merged.metadata.title.as_deref(), Some("正式标题"));
        assert_eq!(merged.metadata.author.as_deref(), Some("张三"));
        assert_eq!(merged.metadata.date.as_deref(), Some("2024年5月"));
    }

    #[test]
    fn special_fields_first_found() {
        let a = ThesisData {
            keywords: Some("深度学习".into()),
            ..Default::default()
        };
        let b = ThesisData {
            abstract_text: Some("摘要B".into()),
            keywords: Some("机器学习".into()),
            acknowledgements: Some("致谢".into()),
            ..Default::default()
        };
        let merged = merge_results(&[ok(0, a), ok(1, b)]).unwrap();
        assert_eq!(merged.keywords.as_deref(), Some("深度学习"));
        assert_eq!(merged.abstract_text.as_deref(), Some("摘要B"));
        assert_eq!(merged.acknowledgements.as_deref(), Some("致谢"));
    }

    #[test]
    fn single_reference_list_is_untouched() {
        let list = "[1] A\n[1] A";
        assert_eq!(merge_references(vec![list]).as_deref(), Some(list));
    }

    #[test]
    fn references_merge_across_chunks() {
        let a = "[1] Smith J. Deep Learning. 2020.\n[2] 李四. 图像分割. 2021.";
        let b = "1. smith j. deep learning. 2020.\n2) Wang X. Transformers\ncontinued title. 2022.";
        let merged = merge_references(vec![a, b]).unwrap();
        let lines: Vec<&str> = merged.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[1] Smith J. Deep Learning. 2020.",
                "[2] 李四. 图像分割. 2021.",
                "2) Wang X. Transformers",
                "continued title. 2022.",
            ]
        );
    }

    #[test]
    fn split_keeps_continuation_lines() {
        let entries = split_references("[1] A\n  more of A\n[2] B\n\n3. C");
        assert_eq!(entries, vec!["[1] A\n  more of A", "[2] B", "3. C"]);
    }
}
