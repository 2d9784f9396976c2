//! Packs discovered sections into size-bounded chunks.
//!
//! ## Algorithm
//!
//! 1. Slice abstract / references / acknowledgements from their ranges.
//! 2. Cut each section's window `[start, next)`, stopping early at the
//!    references or acknowledgements start, and drop a repeated heading
//!    line from the front.
//! 3. Greedily pack sections; a section over the limit is split into its
//!    own run of chunks, first at blank lines, then at sentence ends.
//! 4. Abstract joins the first chunk, acknowledgements then references the
//!    last, each getting a chunk of its own when it does not fit.
//! 5. Renumber.
//!
//! Sizes are char counts. The chunker is pure and never fails.

use crate::config::MAX_CHUNK_SIZE;
use crate::pipeline::structure::{DocumentStructure, TextRange};
use crate::pipeline::text::{truncate_chars, CharText};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One section's share of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSection {
    pub title: String,
    pub level: u8,
    pub content: String,
}

/// A unit of content sent to the backend in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub sections: Vec<ChunkSection>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstract_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledgements_content: Option<String>,
    /// The whole document in one chunk (single-call mode). The text is the
    /// content of the only section.
    #[serde(default)]
    pub full_document: bool,
}

impl ContentChunk {
    /// The single chunk used when the whole document goes out in one call.
    pub fn whole_document(text: &str) -> Self {
        Self {
            sections: vec![ChunkSection {
                title: String::new(),
                level: 1,
                content: text.to_string(),
            }],
            chunk_index: 0,
            total_chunks: 1,
            full_document: true,
            ..Default::default()
        }
    }

    pub fn includes_abstract(&self) -> bool {
        self.abstract_content.is_some()
    }

    pub fn includes_references(&self) -> bool {
        self.references_content.is_some()
    }

    pub fn includes_acknowledgements(&self) -> bool {
        self.acknowledgements_content.is_some()
    }

    /// Chars of section content plus any attached special sections.
    pub fn size(&self) -> usize {
        let specials = [
            &self.abstract_content,
            &self.references_content,
            &self.acknowledgements_content,
        ];
        self.sections_size()
            + specials
                .iter()
                .filter_map(|s| s.as_deref())
                .map(|s| s.chars().count())
                .sum::<usize>()
    }

    fn sections_size(&self) -> usize {
        self.sections.iter().map(|s| s.content.chars().count()).sum()
    }

    /// Every text the chunk carries, for marker detection.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.abstract_content
            .as_deref()
            .into_iter()
            .chain(self.sections.iter().map(|s| s.content.as_str()))
            .chain(self.acknowledgements_content.as_deref())
            .chain(self.references_content.as_deref())
    }
}

static HEADER_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"^第[一二三四五六七八九十百千万\d]+[章节]\s*.+?\n").unwrap(),
        Regex::new(r"^[\d.]+\s+.+?\n").unwrap(),
        Regex::new(r"(?i)^(?:Chapter|Section|Part)\s+[\d.]+\s*.+?\n").unwrap(),
    ]
});

/// Splits a document into chunks along its structure.
#[derive(Debug, Clone, Copy)]
pub struct ContentChunker {
    max_chunk_size: usize,
}

impl Default for ContentChunker {
    fn default() -> Self {
        Self::new(MAX_CHUNK_SIZE)
    }
}

impl ContentChunker {
    pub fn new(max_chunk_size: usize) -> Self {
        Self {
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    /// Split `text` along `structure`. Never returns an empty list.
    pub fn split(&self, text: &str, structure: &DocumentStructure) -> Vec<ContentChunk> {
        let ct = CharText::new(text);
        let special = |range: Option<TextRange>| {
            range
                .map(|r| ct.slice(r.start, r.end).trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let abstract_content = special(structure.abstract_range);
        let references_content = special(structure.references_range);
        let acknowledgements_content = special(structure.acknowledgements_range);

        if structure.sections.is_empty() {
            warn!("No sections in structure, treating the text as a single chunk");
            return vec![ContentChunk {
                sections: vec![ChunkSection {
                    title: String::new(),
                    level: 1,
                    content: truncate_chars(text, self.max_chunk_size).to_string(),
                }],
                chunk_index: 0,
                total_chunks: 1,
                abstract_content,
                references_content,
                acknowledgements_content,
                full_document: false,
            }];
        }

        let sections = section_windows(&ct, structure);
        let mut chunks = self.pack(sections);
        self.place_specials(
            &mut chunks,
            abstract_content,
            acknowledgements_content,
            references_content,
        );

        let total = chunks.len();
        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk.chunk_index = i;
            chunk.total_chunks = total;
        }
        info!("Content split into {} chunks", total);
        chunks
    }

    fn pack(&self, sections: Vec<ChunkSection>) -> Vec<ContentChunk> {
        let mut chunks = Vec::new();
        let mut current = ContentChunk::default();
        let mut current_size = 0usize;

        for section in sections {
            let size = section.content.chars().count();

            if size > self.max_chunk_size {
                if !current.sections.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                    current_size = 0;
                }
                let parts = self.split_section(&section);
                debug!("Section '{}' ({} chars) split into {} parts", section.title, size, parts.len());
                chunks.extend(parts.into_iter().map(|part| ContentChunk {
                    sections: vec![part],
                    ..Default::default()
                }));
                continue;
            }

            if current_size + size > self.max_chunk_size && !current.sections.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_size = 0;
            }
            current.sections.push(section);
            current_size += size;
        }

        if !current.sections.is_empty() {
            chunks.push(current);
        }
        chunks
    }

    fn place_specials(
        &self,
        chunks: &mut Vec<ContentChunk>,
        abstract_content: Option<String>,
        acknowledgements_content: Option<String>,
        references_content: Option<String>,
    ) {
        let fits = |chunk: &ContentChunk, extra: &str| {
            chunk.size() + extra.chars().count() <= self.max_chunk_size
        };

        if let Some(abs) = abstract_content {
            if chunks.first().is_some_and(|c| fits(c, &abs)) {
                if let Some(first) = chunks.first_mut() {
                    first.abstract_content = Some(abs);
                }
            } else {
                chunks.insert(
                    0,
                    ContentChunk {
                        abstract_content: Some(abs),
                        ..Default::default()
                    },
                );
            }
        }

        if let Some(ack) = acknowledgements_content {
            if chunks.last().is_some_and(|c| fits(c, &ack)) {
                if let Some(last) = chunks.last_mut() {
                    last.acknowledgements_content = Some(ack);
                }
            } else {
                chunks.push(ContentChunk {
                    acknowledgements_content: Some(ack),
                    ..Default::default()
                });
            }
        }

        if let Some(refs) = references_content {
            if chunks.last().is_some_and(|c| fits(c, &refs)) {
                if let Some(last) = chunks.last_mut() {
                    last.references_content = Some(refs);
                }
            } else {
                chunks.push(ContentChunk {
                    references_content: Some(refs),
                    ..Default::default()
                });
            }
        }
    }

    /// Split an oversized section. Parts concatenate back to the content
    /// exactly; every part after the first is titled `…（续N）`, N from 2.
    fn split_section(&self, section: &ChunkSection) -> Vec<ChunkSection> {
        let pieces: Vec<&str> = split_at_paragraphs(&section.content, self.max_chunk_size)
            .into_iter()
            .flat_map(|piece| {
                if piece.chars().count() > self.max_chunk_size {
                    force_split(piece, self.max_chunk_size)
                } else {
                    vec![piece]
                }
            })
            .collect();

        pieces
            .into_iter()
            .enumerate()
            .map(|(i, content)| ChunkSection {
                title: if i == 0 {
                    section.title.clone()
                } else {
                    format!("{}（续{}）", section.title, i + 1)
                },
                level: section.level,
                content: content.to_string(),
            })
            .collect()
    }
}

/// Section content windows, in structure order.
fn section_windows(ct: &CharText<'_>, structure: &DocumentStructure) -> Vec<ChunkSection> {
    let len = ct.len();
    let stop_at = |start: usize, range: Option<TextRange>| {
        range.map(|r| r.start).filter(|&s| s > start).unwrap_or(len)
    };

    structure
        .sections
        .iter()
        .enumerate()
        .map(|(i, sec)| {
            let next = structure.sections.get(i + 1).map_or(len, |n| n.start_pos);
            let end = next
                .min(stop_at(sec.start_pos, structure.references_range))
                .min(stop_at(sec.start_pos, structure.acknowledgements_range));
            let raw = ct.slice(sec.start_pos, end).trim();
            ChunkSection {
                title: sec.title.clone(),
                level: sec.level,
                content: strip_heading(raw, &sec.title).to_string(),
            }
        })
        .collect()
}

/// Drop a leading heading line that repeats the section title.
fn strip_heading<'a>(content: &'a str, title: &str) -> &'a str {
    if content.is_empty() || title.is_empty() {
        return content;
    }
    for re in HEADER_PATTERNS.iter() {
        if let Some(m) = re.find(content) {
            if m.as_str().contains(title) || title.chars().count() < 3 {
                return content[m.end()..].trim();
            }
        }
    }
    content
}

/// Cut at blank-line boundaries, accumulating paragraphs up to `max`
/// chars. The separators stay attached to the preceding piece.
fn split_at_paragraphs(content: &str, max: usize) -> Vec<&str> {
    static RE_BLANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n\s*").unwrap());

    let mut pieces = Vec::new();
    let mut piece_start = 0usize;
    let mut piece_chars = 0usize;
    let mut para_start = 0usize;

    let boundaries = RE_BLANK
        .find_iter(content)
        .map(|m| m.end())
        .chain(std::iter::once(content.len()));
    for para_end in boundaries {
        let para_chars = content[para_start..para_end].chars().count();
        if piece_chars > 0 && piece_chars + para_chars > max {
            pieces.push(&content[piece_start..para_start]);
            piece_start = para_start;
            piece_chars = 0;
        }
        piece_chars += para_chars;
        para_start = para_end;
    }
    if piece_start < content.len() {
        pieces.push(&content[piece_start..]);
    }
    pieces
}

/// Cut at most every `max` chars, preferring the last `。` or `. ` past
/// half the window.
fn force_split(content: &str, max: usize) -> Vec<&str> {
    let ct = CharText::new(content);
    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < ct.len() {
        let mut end = (start + max).min(ct.len());
        if end < ct.len() {
            let window = ct.slice(start, end);
            let sentence = window.rfind('。');
            let period = window.rfind(". ");
            if let Some(byte) = sentence.max(period) {
                let at = window[..byte].chars().count();
                if at * 2 > max {
                    end = start + at + 1;
                }
            }
        }
        pieces.push(ct.slice(start, end));
        start = end;
    }
    pieces
}
