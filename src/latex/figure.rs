//! Figure markers → complete LaTeX `figure` environments.
//!
//! Two passes, both safe to re-run:
//!
//! * `[FIGURE:<id>]` / `[FIGURE:<id>:<status>]` markers become a full
//!   environment whose caption is lifted from the surrounding text when a
//!   `图…` / `Figure…` phrase is nearby.
//! * Existing `\begin{figure}…\end{figure}` blocks missing a caption or a
//!   label get one derived from their `\includegraphics` file name.

use super::escape::escape_latex;
use super::labeler::Labeler;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

/// Characters of context examined on each side of a marker.
pub const CONTEXT_CHARS: usize = 100;

static RE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[FIGURE:([A-Za-z0-9_\-]+)(?::(\w+))?\]").unwrap());

static RE_CAPTION_ZH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"图\s*\d*[：:.]?\s*([^。\n]{3,30})").unwrap());
static RE_CAPTION_EN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[Ff]igure\s*\d*[：:.]?\s*([^.\n]{3,50})").unwrap());

static RE_FIGURE_ENV: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\\begin\{figure\}(\[[\w!]*\])?\s*(.*?)\\end\{figure\}").unwrap()
});
static RE_INCLUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\includegraphics[^{]*\{([^}]+)\}").unwrap());
static RE_IMAGE_EXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.(png|jpe?g|pdf)$").unwrap());
static RE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Converts figure markers and repairs incomplete figure environments.
pub struct FigureConverter<'a> {
    labeler: &'a Labeler,
}

impl<'a> FigureConverter<'a> {
    pub fn new(labeler: &'a Labeler) -> Self {
        Self { labeler }
    }

    /// Both passes: convert markers, then complete existing environments.
    pub fn process(&self, content: &str) -> String {
        let converted = self.convert_markers(content);
        self.ensure_captions(&converted)
    }

    pub fn convert_markers(&self, content: &str) -> String {
        if !content.contains("[FIGURE:") {
            return content.to_string();
        }
        RE_MARKER
            .replace_all(content, |caps: &Captures| {
                let whole = caps.get(0).map_or(0..0, |m| m.range());
                let id = &caps[1];
                let context = format!(
                    "{}{}",
                    tail_chars(&content[..whole.start], CONTEXT_CHARS),
                    head_chars(&content[whole.end..], CONTEXT_CHARS)
                );
                let caption = self.caption_for(id, Some(&context));
                debug!(figure = id, caption = %caption, "Converting figure marker");
                figure_block("[H]", &format!(
                    "    \\centering\n    \\includegraphics[width=0.8\\textwidth]{{{id}}}\n    \\caption{{{caption}}}\n    \\label{{fig:{id}}}"
                ))
            })
            .into_owned()
    }

    pub fn ensure_captions(&self, content: &str) -> String {
        if !content.contains("\\begin{figure}") {
            return content.to_string();
        }
        RE_FIGURE_ENV
            .replace_all(content, |caps: &Captures| {
                let body = &caps[2];
                let has_caption = body.contains("\\caption{");
                let has_label = body.contains("\\label{");
                if has_caption && has_label {
                    return caps[0].to_string();
                }
                let Some(img) = RE_INCLUDE.captures(body) else {
                    return caps[0].to_string();
                };
                let id = RE_IMAGE_EXT.replace(&img[1], "").into_owned();

                let mut new_body = body.trim().to_string();
                if !has_caption {
                    let caption = self.caption_for(&id, None);
                    new_body.push_str(&format!("\n    \\caption{{{caption}}}"));
                    debug!(figure = %id, "Added missing caption");
                }
                if !has_label {
                    new_body.push_str(&format!("\n    \\label{{fig:{id}}}"));
                    debug!(figure = %id, "Added missing label");
                }
                let placement = caps.get(1).map_or("[H]", |m| m.as_str());
                figure_block(placement, &new_body)
            })
            .into_owned()
    }

    /// Caption from context if a figure phrase is found, else `图 N`.
    fn caption_for(&self, id: &str, context: Option<&str>) -> String {
        let n = self.labeler.next_figure();
        if let Some(ctx) = context {
            for re in [&*RE_CAPTION_ZH, &*RE_CAPTION_EN] {
                if let Some(c) = re.captures(ctx) {
                    let text = c[1].trim();
                    if !text.is_empty() {
                        return escape_latex(text);
                    }
                }
            }
        }
        let num = RE_DIGITS
            .find(id)
            .map_or_else(|| n.to_string(), |m| m.as_str().to_string());
        format!("图 {num}")
    }
}

fn figure_block(placement: &str, body: &str) -> String {
    format!("\\begin{{figure}}{placement}\n{body}\n\\end{{figure}}")
}

/// Last `n` chars of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((i, _)) if n > 0 => &s[i..],
        _ if n == 0 => "",
        _ => s,
    }
}

/// First `n` chars of `s`.
fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
