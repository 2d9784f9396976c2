//! LaTeX escaping and bibliography splitting.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Decode the handful of HTML entities LLMs like to emit, then escape
/// LaTeX specials in a single pass so escapes are never escaped twice.
pub fn escape_latex(text: &str) -> String {
    escape_specials(&decode_entities(text))
}

/// Escape LaTeX specials without touching HTML entities.
pub fn escape_specials(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\textbackslash{}"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '$' => out.push_str("\\$"),
            '&' => out.push_str("\\&"),
            '%' => out.push_str("\\%"),
            '#' => out.push_str("\\#"),
            '_' => out.push_str("\\_"),
            '^' => out.push_str("\\textasciicircum{}"),
            '~' => out.push_str("\\textasciitilde{}"),
            _ => out.push(ch),
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    // `&amp;` last so `&amp;lt;` decodes to the literal `&lt;`.
    text.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

// ── Bibliography ─────────────────────────────────────────────────────────

/// One `\bibitem` worth of reference text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BibEntry {
    /// `ref1`, `ref2`, …
    pub key: String,
    /// Citation text with its leading number removed.
    pub citation: String,
}

static RE_ENTRY_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\[\d+\]|\d+\.\s|\d+\)\s)").unwrap());

static RE_ENTRY_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[?\d+[\].)]\s*").unwrap());

/// Split a reference list into numbered entries.
///
/// Lines opening with `[n]`, `n. ` or `n) ` start an entry; any other
/// non-empty line is appended to the entry in progress.
pub fn split_bibliography(references: &str) -> Vec<BibEntry> {
    let mut citations: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in references.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if RE_ENTRY_START.is_match(trimmed) {
            if !current.trim().is_empty() {
                citations.push(current.trim().to_string());
            }
            current = RE_ENTRY_NUMBER.replace(trimmed, "").into_owned();
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(trimmed);
        }
    }
    if !current.trim().is_empty() {
        citations.push(current.trim().to_string());
    }

    citations
        .into_iter()
        .enumerate()
        .map(|(i, citation)| BibEntry {
            key: format!("ref{}", i + 1),
            citation,
        })
        .collect()
}
