//! Table marker → LaTeX `tabular` conversion.
//!
//! Three grammars are recognised, in this order:
//!
//! 1. Markdown pipe tables (`| a | b |` + `|---|---|` + body rows).
//! 2. Structured blocks: `[TABLE cols=N]` with `[HEADER]a|b[/HEADER]` and
//!    `[ROW]1|2[/ROW]` lines, closed by `[/TABLE]`.
//! 3. Legacy `[TABLE_START]…[TABLE_END]` blocks, either split into rows by
//!    `[TABLE_ROW:n]` or a flat run of `[TABLE_CELL: x]` tokens whose
//!    column count has to be inferred.
//!
//! Each grammar parses into a [`ParsedTable`] first and is rendered by a
//! single function. Anything that does not parse with enough confidence is
//! left exactly as it was.

use super::escape::escape_latex;
use super::labeler::Labeler;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Caption used when no header cell is usable.
pub const DEFAULT_CAPTION: &str = "表格数据";

/// Minimum composite score for an inferred column layout.
pub const MIN_CONFIDENCE: f64 = 0.4;

const MAX_INFERRED_COLS: usize = 8;

// ── Grammars ─────────────────────────────────────────────────────────────

static RE_MARKDOWN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\|[^\n]+\|\n)(\|[-:\t |]+\|\n)((?:\|[^\n]+\|\n?)+)").unwrap()
});

static RE_STRUCTURED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[TABLE cols=(\d+)\]\n(.*?)\[/TABLE\]").unwrap());
static RE_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[HEADER\](.*?)\[/HEADER\]").unwrap());
static RE_ROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[ROW\](.*?)\[/ROW\]").unwrap());

static RE_LEGACY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[TABLE_START\]\n(.*?)\[TABLE_END\]").unwrap());
static RE_ROW_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[TABLE_ROW:\d+\]\s*").unwrap());
static RE_CELL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[TABLE_CELL:\s*([^\]]*)\]").unwrap());
static RE_CELL_NONEMPTY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[TABLE_CELL:\s*([^\]]+)\]").unwrap());

// Cleanup patterns for `strip_unconverted_markers`.
static RE_LEFTOVER_LEGACY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[TABLE_START\].*?\[TABLE_END\]").unwrap());
static RE_STRAY_LEGACY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[TABLE_(?:START|END|ROW:\d+|CELL:[^\]]*)\]").unwrap());
static RE_LEFTOVER_STRUCTURED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[TABLE cols=\d+\].*?\[/TABLE\]").unwrap());
static RE_STRAY_STRUCTURED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(?:HEADER|ROW|/HEADER|/ROW|/TABLE)\]").unwrap());

static RE_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d,.\-+%]+$").unwrap());
static RE_CHINESE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\x{4e00}-\x{9fa5}]+$").unwrap());
static RE_ENGLISH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z]+$").unwrap());
static RE_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z][\w\-]*$").unwrap());

// ── Typed intermediate ───────────────────────────────────────────────────

/// A table recovered from one of the marker grammars.
///
/// `rows[0]` is the header. Rows may be ragged; rendering pads short rows
/// with empty cells and truncates long ones to `num_cols`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    pub rows: Vec<Vec<String>>,
    pub num_cols: usize,
}

/// Coarse cell classification used for column inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellType {
    Numeric,
    Chinese,
    English,
    Identifier,
    Mixed,
}

impl CellType {
    pub fn of(cell: &str) -> Self {
        if RE_NUMERIC.is_match(cell) {
            CellType::Numeric
        } else if RE_CHINESE.is_match(cell) {
            CellType::Chinese
        } else if RE_ENGLISH.is_match(cell) {
            CellType::English
        } else if RE_IDENT.is_match(cell) {
            CellType::Identifier
        } else {
            CellType::Mixed
        }
    }

    fn tag(self) -> &'static str {
        match self {
            CellType::Numeric => "num",
            CellType::Chinese => "chn",
            CellType::English => "eng",
            CellType::Identifier => "id",
            CellType::Mixed => "mix",
        }
    }
}

/// Best column count found for a flat cell list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnGuess {
    pub num_cols: usize,
    pub confidence: f64,
}

// ── Converter ────────────────────────────────────────────────────────────

/// Converts table markers in section content to LaTeX.
pub struct TableConverter<'a> {
    labeler: &'a Labeler,
}

impl<'a> TableConverter<'a> {
    pub fn new(labeler: &'a Labeler) -> Self {
        Self { labeler }
    }

    /// Run all three grammars over `content`.
    pub fn process(&self, content: &str) -> String {
        let content = self.convert_markdown(content);
        let content = self.convert_structured(&content);
        self.convert_legacy(&content)
    }

    /// Markdown pipe tables.
    pub fn convert_markdown(&self, content: &str) -> String {
        if !content.contains('|') {
            return content.to_string();
        }
        RE_MARKDOWN
            .replace_all(content, |caps: &Captures| {
                match parse_markdown(&caps[1], &caps[3]) {
                    Some(table) => self.render(&table),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// `[TABLE cols=N]…[/TABLE]` blocks.
    pub fn convert_structured(&self, content: &str) -> String {
        if !content.contains("[TABLE cols=") {
            return content.to_string();
        }
        RE_STRUCTURED
            .replace_all(content, |caps: &Captures| {
                match parse_structured(&caps[1], &caps[2]) {
                    Some(table) => self.render(&table),
                    None => {
                        warn!("Structured table unusable, keeping markers");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    /// `[TABLE_START]…[TABLE_END]` blocks, with or without row markers.
    pub fn convert_legacy(&self, content: &str) -> String {
        if !content.contains("[TABLE_START]") {
            return content.to_string();
        }
        RE_LEGACY
            .replace_all(content, |caps: &Captures| {
                let body = &caps[1];
                let parsed = if body.contains("[TABLE_ROW:") {
                    parse_row_marked(body)
                } else {
                    parse_flat_cells(body)
                };
                match parsed {
                    Some(table) => self.render(&table),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Render a parsed table as a floating `table` with caption and label.
    pub fn render(&self, table: &ParsedTable) -> String {
        let n = self.labeler.next_table();
        let caption = caption_from_header(table.rows.first().map(Vec::as_slice).unwrap_or(&[]));

        let mut out = String::from("\\begin{table}[H]\n\\centering\n");
        out.push_str(&format!("\\caption{{{}}}\n", escape_latex(&caption)));
        out.push_str(&format!("\\label{{tab:auto_{n}}}\n"));
        out.push_str(&format!(
            "\\begin{{tabular}}{{|{}}}\n\\hline\n",
            "c|".repeat(table.num_cols)
        ));
        for row in &table.rows {
            let cells: Vec<String> = (0..table.num_cols)
                .map(|i| row.get(i).map(|c| escape_latex(c)).unwrap_or_default())
                .collect();
            out.push_str(&cells.join(" & "));
            out.push_str(" \\\\ \\hline\n");
        }
        out.push_str("\\end{tabular}\n\\end{table}");
        debug!(label = n, cols = table.num_cols, rows = table.rows.len(), "Rendered table");
        out
    }

    /// Flatten whatever table markup survived [`process`](Self::process).
    ///
    /// Legacy blocks become a comma-separated cell list, structured blocks
    /// are dropped, and stray tokens are deleted. Lossy, so callers opt in.
    pub fn strip_unconverted_markers(content: &str) -> String {
        let content = RE_LEFTOVER_LEGACY.replace_all(content, |caps: &Captures| {
            warn!("Removing unconverted table markers");
            RE_CELL
                .captures_iter(&caps[0])
                .map(|c| c[1].trim().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        });
        let content = RE_STRAY_LEGACY.replace_all(&content, "");
        let content = RE_LEFTOVER_STRUCTURED.replace_all(&content, |_: &Captures| {
            warn!("Removing unconverted structured table");
            String::new()
        });
        RE_STRAY_STRUCTURED.replace_all(&content, "").into_owned()
    }
}

// ── Parsers ──────────────────────────────────────────────────────────────

fn split_pipe_row(line: &str) -> Vec<String> {
    let line = line.trim();
    let line = line.strip_prefix('|').unwrap_or(line);
    let line = line.strip_suffix('|').unwrap_or(line);
    line.split('|').map(|c| c.trim().to_string()).collect()
}

fn parse_markdown(header: &str, body: &str) -> Option<ParsedTable> {
    let header: Vec<String> = split_pipe_row(header)
        .into_iter()
        .filter(|c| !c.is_empty())
        .collect();
    if header.is_empty() {
        return None;
    }
    let num_cols = header.len();
    let mut rows = vec![header];
    rows.extend(
        body.lines()
            .map(split_pipe_row)
            .filter(|cells| cells.iter().any(|c| !c.is_empty())),
    );
    Some(ParsedTable { rows, num_cols })
}

fn parse_structured(cols: &str, body: &str) -> Option<ParsedTable> {
    let num_cols: usize = cols.parse().ok().filter(|&n| n > 0)?;
    let split = |s: &str| s.split('|').map(|c| c.trim().to_string()).collect::<Vec<_>>();

    let mut rows = Vec::new();
    if let Some(h) = RE_HEADER.captures(body) {
        rows.push(split(&h[1]));
    }
    rows.extend(RE_ROW.captures_iter(body).map(|r| split(&r[1])));

    if rows.len() < 2 {
        return None;
    }
    Some(ParsedTable { rows, num_cols })
}

fn parse_row_marked(body: &str) -> Option<ParsedTable> {
    let rows: Vec<Vec<String>> = RE_ROW_MARKER
        .split(body)
        .filter(|section| !section.trim().is_empty())
        .map(|section| {
            RE_CELL
                .captures_iter(section)
                .map(|c| c[1].trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|cells| !cells.is_empty())
        .collect();

    if rows.len() < 2 {
        warn!("Table with row markers too small");
        return None;
    }
    let num_cols = rows[0].len();
    Some(ParsedTable { rows, num_cols })
}

fn parse_flat_cells(body: &str) -> Option<ParsedTable> {
    let cells: Vec<String> = RE_CELL_NONEMPTY
        .captures_iter(body)
        .map(|c| c[1].trim().to_string())
        .collect();
    if cells.len() < 4 {
        return None;
    }

    let Some(guess) = detect_columns(&cells) else {
        warn!(cells = cells.len(), "Column detection failed, preserving original markers");
        return None;
    };
    let num_cols = guess.num_cols;

    let rows: Vec<Vec<String>> = cells
        .chunks(num_cols)
        .filter(|row| row.len() == num_cols)
        .map(<[String]>::to_vec)
        .collect();

    if rows.len() < 2 {
        warn!("Table too small after reconstruction");
        return None;
    }
    let used = rows.len() * num_cols;
    if (used as f64) < cells.len() as f64 * 0.8 {
        warn!(lost = cells.len() - used, "Too many cells left over, preserving original");
        return None;
    }
    if rows[0].iter().all(|c| RE_NUMERIC.is_match(c)) {
        warn!("No text headers found, preserving original");
        return None;
    }

    debug!(cols = num_cols, confidence = guess.confidence, "Inferred table layout");
    Some(ParsedTable { rows, num_cols })
}

/// Infer the column count of a flat cell list.
///
/// Every candidate count from 2 to 8 that divides the cell count with at
/// most one cell left over is scored as
/// `0.6 * consistency + 0.3 * header_distinctiveness - 0.3 * leftover_ratio`.
/// Returns `None` when all cells share a type or the best score is below
/// [`MIN_CONFIDENCE`].
pub fn detect_columns(cells: &[String]) -> Option<ColumnGuess> {
    let types: Vec<CellType> = cells.iter().map(|c| CellType::of(c)).collect();
    let first = *types.first()?;
    if types.iter().all(|&t| t == first) {
        return None;
    }

    let n = cells.len();
    let mut best = ColumnGuess {
        num_cols: 0,
        confidence: 0.0,
    };

    for num_cols in 2..=MAX_INFERRED_COLS.min(n / 2) {
        if n % num_cols > 1 {
            continue;
        }
        let num_rows = n / num_cols;
        if num_rows < 2 {
            continue;
        }
        let rows: Vec<&[CellType]> = types[..num_rows * num_cols].chunks(num_cols).collect();
        let (header, data) = (rows[0], &rows[1..]);

        // Share of the dominant type in each column, averaged.
        let mut consistency = 0.0;
        for col in 0..num_cols {
            let mut counts: HashMap<CellType, usize> = HashMap::new();
            for row in data {
                *counts.entry(row[col]).or_default() += 1;
            }
            let max = counts.values().copied().max().unwrap_or(0);
            consistency += max as f64 / data.len() as f64;
        }
        consistency /= num_cols as f64;

        let pattern = |row: &[CellType]| row.iter().map(|t| t.tag()).collect::<Vec<_>>().join(",");
        let data_pattern = data.iter().map(|r| pattern(*r)).collect::<Vec<_>>().join("|");
        let mut distinct = 0.0;
        if !data_pattern.contains(&pattern(header)) {
            distinct = 0.3;
        }
        let text_count = |row: &[CellType]| row.iter().filter(|&&t| t != CellType::Numeric).count();
        let avg_data_text =
            data.iter().map(|r| text_count(*r)).sum::<usize>() as f64 / data.len() as f64;
        if text_count(header) as f64 > avg_data_text {
            distinct += 0.2;
        }

        let penalty = (n - num_rows * num_cols) as f64 / n as f64;
        let score = consistency * 0.6 + distinct * 0.3 - penalty * 0.3;
        if score > best.confidence {
            best = ColumnGuess {
                num_cols,
                confidence: score,
            };
        }
    }

    (best.confidence >= MIN_CONFIDENCE).then_some(best)
}

/// Join up to three non-numeric header cells with `、`.
pub fn caption_from_header(header: &[String]) -> String {
    let parts: Vec<&str> = header
        .iter()
        .map(|h| h.trim())
        .filter(|h| !h.is_empty() && !RE_NUMERIC.is_match(h))
        .take(3)
        .collect();
    if parts.is_empty() {
        DEFAULT_CAPTION.to_string()
    } else {
        parts.join("、")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn flat(v: &[&str]) -> String {
        let body: String = v.iter().map(|c| format!("[TABLE_CELL: {c}]\n")).collect();
        format!("[TABLE_START]\n{body}[TABLE_END]")
    }

    #[test]
    fn two_text_headers_one_numeric_row() {
        let guess = detect_columns(&cells(&["A", "B", "1", "2"])).unwrap();
        assert_eq!(guess.num_cols, 2);
        assert!(guess.confidence >= MIN_CONFIDENCE);
    }

    #[test]
    fn all_numeric_cells_are_left_alone() {
        let labeler = Labeler::new();
        let input = flat(&["1", "2", "3", "4", "5"]);
        assert_eq!(TableConverter::new(&labeler).process(&input), input);
        assert_eq!(labeler.tables_issued(), 0);
    }

    #[test]
    fn flat_cells_become_tabular() {
        let labeler = Labeler::new();
        let input = format!("前文\n{}\n后文", flat(&["方法", "准确率", "CNN", "90.1", "RNN", "88.5"]));
        let out = TableConverter::new(&labeler).process(&input);
        assert!(out.starts_with("前文\n\\begin{table}[H]"));
        assert!(out.contains("\\begin{tabular}{|c|c|}"));
        assert!(out.contains("方法 & 准确率 \\\\ \\hline"));
        assert!(out.contains("CNN & 90.1 \\\\ \\hline"));
        assert!(out.contains("\\caption{方法、准确率}"));
        assert!(out.contains("\\label{tab:auto_1}"));
        assert!(out.ends_with("\\end{table}\n后文"));
    }

    #[test]
    fn markdown_table_converts() {
        let labeler = Labeler::new();
        let input = "| Name | Score |\n|------|:-----:|\n| a_b | 1 |\n| c | 2 |\n";
        let out = TableConverter::new(&labeler).process(input);
        assert!(out.contains("Name & Score \\\\ \\hline"));
        assert!(out.contains("a\\_b & 1 \\\\ \\hline"));
        assert!(out.contains("\\caption{Name、Score}"));
    }

    #[test]
    fn structured_rows_are_padded_and_truncated() {
        let labeler = Labeler::new();
        let input = "[TABLE cols=3]\n[HEADER]A|B|C[/HEADER]\n[ROW]1|2[/ROW]\n[ROW]1|2|3|4[/ROW]\n[/TABLE]";
        let out = TableConverter::new(&labeler).process(input);
        assert!(out.contains("1 & 2 &  \\\\ \\hline"));
        assert!(out.contains("1 & 2 & 3 \\\\ \\hline"));
        assert!(!out.contains('4'));
    }

    #[test]
    fn structured_header_only_kept_verbatim() {
        let labeler = Labeler::new();
        let input = "[TABLE cols=2]\n[HEADER]A|B[/HEADER]\n[/TABLE]";
        assert_eq!(TableConverter::new(&labeler).process(input), input);
    }

    #[test]
    fn row_marked_table_uses_first_row_width() {
        let labeler = Labeler::new();
        let input = "[TABLE_START]\n[TABLE_ROW:0] [TABLE_CELL: 指标] [TABLE_CELL: 值]\n[TABLE_ROW:1] [TABLE_CELL: F1] [TABLE_CELL: 0.9]\n[TABLE_END]";
        let out = TableConverter::new(&labeler).process(input);
        assert!(out.contains("{|c|c|}"));
        assert!(out.contains("F1 & 0.9"));
    }

    #[test]
    fn labels_increase_across_tables() {
        let labeler = Labeler::new();
        let conv = TableConverter::new(&labeler);
        let t = flat(&["A", "B", "1", "2"]);
        let out = conv.process(&format!("{t}\n\n{t}"));
        assert!(out.contains("tab:auto_1"));
        assert!(out.contains("tab:auto_2"));
    }

    #[test]
    fn cell_ampersand_is_escaped() {
        let labeler = Labeler::new();
        let table = ParsedTable {
            rows: vec![cells(&["R&D", "x"]), cells(&["1", "2"])],
            num_cols: 2,
        };
        let out = TableConverter::new(&labeler).render(&table);
        assert!(out.contains("R\\&D & x"));
    }

    #[test]
    fn caption_falls_back_when_header_numeric() {
        assert_eq!(caption_from_header(&cells(&["1", "2.5"])), DEFAULT_CAPTION);
        assert_eq!(caption_from_header(&cells(&["a", "b", "c", "d"])), "a、b、c");
    }

    #[test]
    fn strip_flattens_and_drops_leftovers() {
        let input = "x [TABLE_START]\n[TABLE_CELL: 1]\n[TABLE_CELL: 2]\n[TABLE_END] y [TABLE cols=2]\n[HEADER]a|b[/HEADER]\n[/TABLE] z [ROW]";
        let out = TableConverter::strip_unconverted_markers(input);
        assert_eq!(out, "x 1, 2 y  z ");
    }

    #[test]
    fn cell_types() {
        assert_eq!(CellType::of("3.5%"), CellType::Numeric);
        assert_eq!(CellType::of("准确率"), CellType::Chinese);
        assert_eq!(CellType::of("Recall"), CellType::English);
        assert_eq!(CellType::of("ResNet-50"), CellType::Identifier);
        assert_eq!(CellType::of("F1 值"), CellType::Mixed);
    }
}
