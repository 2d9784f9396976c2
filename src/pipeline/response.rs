//! Validating parse of backend responses.
//!
//! The backend is asked for a JSON object but answers are loosely typed:
//! fenced in ```` ```json ````, wrapped in prose, numbers as strings,
//! keyword lists as arrays. The raw payload is deserialised into the
//! lenient `Raw*` shapes below and only then converted to output types;
//! a field of the wrong shape is dropped instead of failing the chunk.

use crate::error::ResponseError;
use crate::output::{Section, ThesisData, ThesisMetadata};
use serde::de::{DeserializeOwned, Deserializer, IgnoredAny};
use serde::Deserialize;
use serde_json::Value;

// ── Envelope ─────────────────────────────────────────────────────────────

/// Deserialise the JSON object in `raw` into `T`.
///
/// Code fences are stripped and the text between the first `{` and the
/// last `}` is parsed, so a short preamble from the model does no harm.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, ResponseError> {
    let candidate = json_span(strip_fences(raw.trim()), '{', '}');
    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => {
            serde_json::from_value(value).map_err(|e| ResponseError::NotJson(e.to_string()))
        }
        Ok(_) => Err(ResponseError::NotAnObject),
        Err(e) => Err(ResponseError::NotJson(e.to_string())),
    }
}

pub(crate) fn strip_fences(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the info string (`json`) on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// The text from the first `open` to the last `close`, or `s` itself.
pub(crate) fn json_span(s: &str, open: char, close: char) -> &str {
    match (s.find(open), s.rfind(close)) {
        (Some(start), Some(end)) if start < end => &s[start..=end],
        _ => s,
    }
}

// ── Lenient field types ──────────────────────────────────────────────────

/// A value that either has the expected shape or is ignored.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum Lenient<T> {
    Value(T),
    Ignored(IgnoredAny),
}

impl<T> Lenient<T> {
    pub(crate) fn into_value(self) -> Option<T> {
        match self {
            Lenient::Value(v) => Some(v),
            Lenient::Ignored(_) => None,
        }
    }
}

/// `deserialize_with` helper: a mis-shaped value becomes `T::default()`.
pub(crate) fn lenient<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Lenient::<T>::deserialize(d)?.into_value().unwrap_or_default())
}

/// A text-ish JSON value as models emit it.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum Loose {
    Text(String),
    Number(serde_json::Number),
    List(Vec<Loose>),
    Other(IgnoredAny),
}

impl Loose {
    /// A trimmed, non-empty string. Numbers are rendered; lists are joined
    /// with `sep`.
    pub(crate) fn text(&self, sep: &str) -> Option<String> {
        let text = match self {
            Loose::Text(s) => s.trim().to_string(),
            Loose::Number(n) => n.to_string(),
            Loose::List(items) => items
                .iter()
                .filter_map(|v| v.text(sep))
                .collect::<Vec<_>>()
                .join(sep),
            Loose::Other(_) => return None,
        };
        (!text.is_empty()).then_some(text)
    }
}

/// `deserialize_with` helper: a [`Loose`] value as trimmed, non-empty text.
pub(crate) fn loose_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Loose>::deserialize(d)?.and_then(|v| v.text(", ")))
}

/// `deserialize_with` helper: a list of texts, or a single text as a
/// one-element list.
pub(crate) fn loose_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Ok(match Option::<Loose>::deserialize(d)? {
        Some(Loose::List(items)) => items.iter().filter_map(|v| v.text(", ")).collect(),
        Some(other) => other.text(", ").into_iter().collect(),
        None => Vec::new(),
    })
}

fn joined(value: &Option<Loose>, sep: &str) -> Option<String> {
    value.as_ref()?.text(sep)
}

/// Heading level in 1..=3; anything else (missing, 0, "二", 7) reads as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Level(pub u8);

impl Default for Level {
    fn default() -> Self {
        Level(1)
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let n = match Option::<Loose>::deserialize(d)? {
            Some(Loose::Number(n)) => n.as_u64(),
            Some(Loose::Text(s)) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        Ok(match n {
            Some(l @ 1..=3) => Level(l as u8),
            _ => Level::default(),
        })
    }
}

/// `deserialize_with` helper for a char position. Negative values clamp
/// to 0; fractional values are truncated; anything non-numeric is `None`.
pub(crate) fn char_position<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
    Ok(match Option::<Loose>::deserialize(d)? {
        Some(Loose::Number(n)) => n
            .as_u64()
            .map(|u| u as usize)
            .or_else(|| n.as_f64().map(|f| if f <= 0.0 { 0 } else { f as usize })),
        _ => None,
    })
}

// ── Response shapes ──────────────────────────────────────────────────────

/// The `metadata` object of a chunk or structure response.
#[derive(Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawMetadata {
    title: Option<Loose>,
    title_en: Option<Loose>,
    // Both keys show up in practice, sometimes together.
    author_name: Option<Loose>,
    author: Option<Loose>,
    #[serde(alias = "studentId")]
    student_id: Option<Loose>,
    school: Option<Loose>,
    major: Option<Loose>,
    supervisor: Option<Loose>,
    date: Option<Loose>,
}

impl RawMetadata {
    pub(crate) fn into_metadata(self) -> ThesisMetadata {
        let field = |v: &Option<Loose>| joined(v, " ");
        ThesisMetadata {
            title: field(&self.title),
            title_en: field(&self.title_en),
            author: field(&self.author_name).or_else(|| field(&self.author)),
            student_id: field(&self.student_id),
            school: field(&self.school),
            major: field(&self.major),
            supervisor: field(&self.supervisor),
            date: field(&self.date),
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RawSection {
    title: Option<Loose>,
    content: Option<Loose>,
    level: Level,
}

impl RawSection {
    /// `None` when the section has neither title nor content.
    fn into_section(self) -> Option<Section> {
        let title = joined(&self.title, " ").unwrap_or_default();
        let content = joined(&self.content, "\n\n").unwrap_or_default();
        if title.is_empty() && content.is_empty() {
            return None;
        }
        Some(Section {
            title,
            content,
            level: self.level.0,
        })
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ChunkResponse {
    #[serde(deserialize_with = "lenient")]
    metadata: RawMetadata,
    #[serde(deserialize_with = "lenient")]
    sections: Vec<Lenient<RawSection>>,
    #[serde(rename = "abstract")]
    abstract_text: Option<Loose>,
    abstract_en: Option<Loose>,
    keywords: Option<Loose>,
    keywords_en: Option<Loose>,
    references: Option<Loose>,
    acknowledgements: Option<Loose>,
}

/// Parse one chunk (or whole-document) response into a partial [`ThesisData`].
///
/// Sections with neither title nor content are dropped; `level` outside
/// 1..=3 becomes 1. Section content is returned as the model wrote it;
/// LaTeX normalisation happens in the processor.
pub fn parse_chunk_response(raw: &str) -> Result<ThesisData, ResponseError> {
    let resp: ChunkResponse = parse_json(raw)?;

    Ok(ThesisData {
        metadata: resp.metadata.into_metadata(),
        sections: resp
            .sections
            .into_iter()
            .filter_map(Lenient::into_value)
            .filter_map(RawSection::into_section)
            .collect(),
        abstract_text: joined(&resp.abstract_text, "\n\n"),
        abstract_en: joined(&resp.abstract_en, "\n\n"),
        keywords: joined(&resp.keywords, "、"),
        keywords_en: joined(&resp.keywords_en, ", "),
        references: joined(&resp.references, "\n"),
        acknowledgements: joined(&resp.acknowledgements, "\n\n"),
        warnings: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_is_accepted() {
        let raw = "```json\n{\"sections\": []}\n```";
        assert!(parse_json::<Value>(raw).is_ok());
    }

    #[test]
    fn preamble_is_ignored() {
        let raw = "好的，以下是结果：\n{\"abstract\": \"本文研究…\"}\n希望有帮助";
        let data = parse_chunk_response(raw).unwrap();
        assert_eq!(data.abstract_text.as_deref(), Some("本文研究…"));
    }

    #[test]
    fn non_object_is_rejected() {
        assert_eq!(parse_json::<Value>("[1, 2]"), Err(ResponseError::NotAnObject));
        assert!(matches!(
            parse_json::<Value>("not json at all"),
            Err(ResponseError::NotJson(_))
        ));
    }

    #[test]
    fn sections_are_validated() {
        let raw = r#"{
            "sections": [
                {"title": " 绪论 ", "content": "内容", "level": 1},
                {"title": "研究背景", "content": "x", "level": "2"},
                {"title": "", "content": ""},
                {"title": "方法", "content": "y", "level": 9},
                "garbage"
            ]
        }"#;
        let data = parse_chunk_response(raw).unwrap();
        assert_eq!(data.sections.len(), 3);
        assert_eq!(data.sections[0].title, "绪论");
        assert_eq!(data.sections[1].level, 2);
        assert_eq!(data.sections[2].level, 1);
    }

    #[test]
    fn missing_level_defaults_to_chapter() {
        let data = parse_chunk_response(r#"{"sections": [{"title": "绪论", "level": null}, {"title": "结论"}]}"#)
            .unwrap();
        assert_eq!(data.sections[0].level, 1);
        assert_eq!(data.sections[1].level, 1);
    }

    #[test]
    fn metadata_accepts_either_author_key() {
        let raw = r#"{"metadata": {"title": "T", "author_name": "张三", "student_id": 2021001}}"#;
        let data = parse_chunk_response(raw).unwrap();
        assert_eq!(data.metadata.author.as_deref(), Some("张三"));
        assert_eq!(data.metadata.student_id.as_deref(), Some("2021001"));

        let raw = r#"{"metadata": {"author": "李四", "school": "  "}}"#;
        let data = parse_chunk_response(raw).unwrap();
        assert_eq!(data.metadata.author.as_deref(), Some("李四"));
        assert_eq!(data.metadata.school, None);

        let raw = r#"{"metadata": {"author_name": "", "author": "王五"}}"#;
        let data = parse_chunk_response(raw).unwrap();
        assert_eq!(data.metadata.author.as_deref(), Some("王五"));
    }

    #[test]
    fn misshaped_fields_are_dropped_not_fatal() {
        let raw = r#"{"metadata": "none", "sections": null, "abstract": {"text": "x"}, "keywords": "分割"}"#;
        let data = parse_chunk_response(raw).unwrap();
        assert!(data.metadata.is_empty());
        assert!(data.sections.is_empty());
        assert_eq!(data.abstract_text, None);
        assert_eq!(data.keywords.as_deref(), Some("分割"));
    }

    #[test]
    fn keyword_arrays_are_joined() {
        let raw = r#"{"keywords": ["深度学习", "图像分割"], "keywords_en": ["deep learning", "segmentation"]}"#;
        let data = parse_chunk_response(raw).unwrap();
        assert_eq!(data.keywords.as_deref(), Some("深度学习、图像分割"));
        assert_eq!(data.keywords_en.as_deref(), Some("deep learning, segmentation"));
    }

    #[test]
    fn blank_fields_are_none() {
        let data = parse_chunk_response(r#"{"abstract": "  ", "references": null, "metadata": {}}"#)
            .unwrap();
        assert_eq!(data.abstract_text, None);
        assert_eq!(data.references, None);
        assert!(data.metadata.is_empty());
    }

    #[derive(Deserialize)]
    struct Pos {
        #[serde(default, deserialize_with = "char_position")]
        at: Option<usize>,
    }

    fn pos(raw: &str) -> Option<usize> {
        parse_json::<Pos>(raw).unwrap().at
    }

    #[test]
    fn positions_clamp_negative() {
        assert_eq!(pos(r#"{"at": -5}"#), Some(0));
        assert_eq!(pos(r#"{"at": 12.7}"#), Some(12));
        assert_eq!(pos(r#"{"at": "12"}"#), None);
        assert_eq!(pos("{}"), None);
    }
}
