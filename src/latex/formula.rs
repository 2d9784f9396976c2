//! Unicode math → LaTeX.
//!
//! PDF extractors hand us formulas as Unicode math alphanumerics (`𝑥`, `𝛼`),
//! operator glyphs (`∑`, `≤`) and super/subscript digits (`²`, `₁`), often
//! smeared across several lines. This module maps those glyphs to LaTeX,
//! wraps them in math mode where needed, and stitches the common
//! five-line summation fragment back into one display equation.
//!
//! Content is first split into segments (plain text, existing math spans,
//! `[FORMULA:…]` and `[FORMULA_BLOCK:…]` markers) so each kind is rewritten
//! exactly once. Plain text also gets LaTeX the model wrote without
//! delimiters (`\alpha`, `x_{i}`, a whole `L = -\sum_{i} …` line) put
//! into math mode. Running the conversion on its own output changes nothing.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

// ── Symbol table ─────────────────────────────────────────────────────────

/// What a single Unicode glyph becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// A plain letter, valid outside math mode.
    Letter(char),
    /// A control sequence such as `\alpha` or `\leq`.
    Command(&'static str),
    /// Superscript content, rendered as `^{…}`.
    Sup(&'static str),
    /// Subscript content, rendered as `_{…}`.
    Sub(&'static str),
}

/// Lowercase Greek in Unicode order, α through ω (including final sigma).
const LOWER_GREEK: [&str; 25] = [
    "\\alpha", "\\beta", "\\gamma", "\\delta", "\\epsilon", "\\zeta", "\\eta", "\\theta",
    "\\iota", "\\kappa", "\\lambda", "\\mu", "\\nu", "\\xi", "o", "\\pi", "\\rho",
    "\\varsigma", "\\sigma", "\\tau", "\\upsilon", "\\phi", "\\chi", "\\psi", "\\omega",
];

/// Uppercase Greek in Unicode order, Α through Ω. Index 17 is the theta
/// symbol in the math-italic block and unassigned in the plain block.
const UPPER_GREEK: [&str; 25] = [
    "A", "B", "\\Gamma", "\\Delta", "E", "Z", "H", "\\Theta", "I", "K", "\\Lambda", "M", "N",
    "\\Xi", "O", "\\Pi", "P", "\\Theta", "\\Sigma", "T", "\\Upsilon", "\\Phi", "X", "\\Psi",
    "\\Omega",
];

fn offset_char(base: char, from: u32, c: char) -> char {
    char::from_u32(base as u32 + (c as u32 - from)).unwrap_or(base)
}

fn greek(table: &'static [&'static str; 25], idx: u32) -> Option<Symbol> {
    let s = *table.get(idx as usize)?;
    Some(if s.starts_with('\\') {
        Symbol::Command(s)
    } else {
        Symbol::Letter(s.chars().next().unwrap_or('?'))
    })
}

/// Look up the LaTeX form of `c`, if it has one.
pub fn classify(c: char) -> Option<Symbol> {
    use Symbol::*;
    let sym = match c {
        // Math italic Latin
        '\u{1D434}'..='\u{1D44D}' => Letter(offset_char('A', 0x1D434, c)),
        '\u{1D44E}'..='\u{1D467}' => Letter(offset_char('a', 0x1D44E, c)),
        'ℎ' => Letter('h'),
        // Greek, math italic and plain
        '\u{1D6E2}'..='\u{1D6FA}' => return greek(&UPPER_GREEK, c as u32 - 0x1D6E2),
        '\u{1D6FC}'..='\u{1D714}' => return greek(&LOWER_GREEK, c as u32 - 0x1D6FC),
        '\u{0391}'..='\u{03A9}' => return greek(&UPPER_GREEK, c as u32 - 0x0391),
        '\u{03B1}'..='\u{03C9}' => return greek(&LOWER_GREEK, c as u32 - 0x03B1),
        // Big operators and calculus
        '∑' => Command("\\sum"),
        '∏' => Command("\\prod"),
        '∫' => Command("\\int"),
        '∬' => Command("\\iint"),
        '∭' => Command("\\iiint"),
        '∮' => Command("\\oint"),
        '∇' => Command("\\nabla"),
        '∂' => Command("\\partial"),
        '∆' => Command("\\Delta"),
        // Logic and sets
        '∀' => Command("\\forall"),
        '∃' => Command("\\exists"),
        '∈' => Command("\\in"),
        '∉' => Command("\\notin"),
        '⊂' => Command("\\subset"),
        '⊃' => Command("\\supset"),
        '⊆' => Command("\\subseteq"),
        '⊇' => Command("\\supseteq"),
        '∪' => Command("\\cup"),
        '∩' => Command("\\cap"),
        '∧' => Command("\\wedge"),
        '∨' => Command("\\vee"),
        '¬' => Command("\\neg"),
        '⊕' => Command("\\oplus"),
        '⊗' => Command("\\otimes"),
        '⊙' => Command("\\odot"),
        // Relations and arithmetic
        '≤' => Command("\\leq"),
        '≥' => Command("\\geq"),
        '≠' => Command("\\neq"),
        '≈' => Command("\\approx"),
        '≡' => Command("\\equiv"),
        '≢' => Command("\\not\\equiv"),
        '∝' => Command("\\propto"),
        '∞' => Command("\\infty"),
        '±' => Command("\\pm"),
        '×' => Command("\\times"),
        '÷' => Command("\\div"),
        '√' => Command("\\sqrt"),
        '∛' => Command("\\sqrt[3]"),
        '∜' => Command("\\sqrt[4]"),
        // Arrows
        '→' => Command("\\rightarrow"),
        '←' => Command("\\leftarrow"),
        '↔' => Command("\\leftrightarrow"),
        '⇒' => Command("\\Rightarrow"),
        '⇐' => Command("\\Leftarrow"),
        '⇔' => Command("\\Leftrightarrow"),
        // Superscripts
        '⁰' => Sup("0"),
        '¹' => Sup("1"),
        '²' => Sup("2"),
        '³' => Sup("3"),
        '⁴' => Sup("4"),
        '⁵' => Sup("5"),
        '⁶' => Sup("6"),
        '⁷' => Sup("7"),
        '⁸' => Sup("8"),
        '⁹' => Sup("9"),
        '⁺' => Sup("+"),
        '⁻' => Sup("-"),
        '⁼' => Sup("="),
        '⁽' => Sup("("),
        '⁾' => Sup(")"),
        'ⁿ' => Sup("n"),
        'ⁱ' => Sup("i"),
        // Subscripts
        '₀' => Sub("0"),
        '₁' => Sub("1"),
        '₂' => Sub("2"),
        '₃' => Sub("3"),
        '₄' => Sub("4"),
        '₅' => Sub("5"),
        '₆' => Sub("6"),
        '₇' => Sub("7"),
        '₈' => Sub("8"),
        '₉' => Sub("9"),
        '₊' => Sub("+"),
        '₋' => Sub("-"),
        '₌' => Sub("="),
        '₍' => Sub("("),
        '₎' => Sub(")"),
        'ₐ' => Sub("a"),
        'ₑ' => Sub("e"),
        'ₒ' => Sub("o"),
        'ₓ' => Sub("x"),
        'ₕ' => Sub("h"),
        'ₖ' => Sub("k"),
        'ₗ' => Sub("l"),
        'ₘ' => Sub("m"),
        'ₙ' => Sub("n"),
        'ₚ' => Sub("p"),
        'ₛ' => Sub("s"),
        'ₜ' => Sub("t"),
        'ᵢ' => Sub("i"),
        'ⱼ' => Sub("j"),
        _ => return None,
    };
    Some(sym)
}

// ── Math-mode writer ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Last {
    Other,
    Command,
    Sup,
    Sub,
}

/// Accumulates math-mode LaTeX, merging adjacent scripts (`x²³` →
/// `x^{23}`) and separating commands from following letters.
#[derive(Debug)]
struct MathWriter {
    out: String,
    last: Last,
}

impl MathWriter {
    fn new() -> Self {
        Self {
            out: String::new(),
            last: Last::Other,
        }
    }

    /// Append source text verbatim.
    fn push_raw(&mut self, c: char) {
        if self.last == Last::Command && c.is_ascii_alphabetic() {
            self.out.push(' ');
        }
        self.out.push(c);
        self.last = Last::Other;
    }

    fn push_symbol(&mut self, sym: Symbol) {
        match sym {
            Symbol::Letter(l) => {
                if ends_with_command(&self.out) {
                    self.out.push(' ');
                }
                self.out.push(l);
                self.last = Last::Other;
            }
            Symbol::Command(cmd) => {
                self.out.push_str(cmd);
                self.last = Last::Command;
            }
            Symbol::Sup(s) => self.push_script(Last::Sup, '^', s),
            Symbol::Sub(s) => self.push_script(Last::Sub, '_', s),
        }
    }

    fn push_script(&mut self, kind: Last, marker: char, content: &str) {
        if self.last == kind && self.out.ends_with('}') {
            self.out.pop();
        } else {
            self.out.push(marker);
            self.out.push('{');
        }
        self.out.push_str(content);
        self.out.push('}');
        self.last = kind;
    }

    fn into_string(self) -> String {
        self.out
    }
}

/// True when `s` ends in a control word such as `\alpha`.
fn ends_with_command(s: &str) -> bool {
    let trimmed = s.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    trimmed.len() < s.len() && trimmed.ends_with('\\')
}

/// Map every glyph in `text` to LaTeX without adding delimiters.
///
/// Intended for text already in math mode. The Unicode minus becomes `-`.
pub fn to_latex_symbols(text: &str) -> String {
    let mut w = MathWriter::new();
    for c in text.chars() {
        match classify(c) {
            Some(sym) => w.push_symbol(sym),
            None if c == '−' => w.push_raw('-'),
            None => w.push_raw(c),
        }
    }
    w.into_string()
}

// ── Segmentation ─────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    /// An existing math span with its delimiters.
    Math {
        open: &'a str,
        body: &'a str,
        close: &'a str,
    },
    InlineMarker(&'a str),
    BlockMarker(&'a str),
}

const DELIMITERS: [(&str, &str); 4] = [("$$", "$$"), ("\\[", "\\]"), ("\\(", "\\)"), ("$", "$")];

fn segments(s: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < s.len() {
        let rest = &s[i..];
        let mut found: Option<(Segment<'_>, usize)> = None;

        if rest.starts_with("\\\\") || rest.starts_with("\\$") {
            i += 2;
            continue;
        } else if let Some(after) = rest.strip_prefix("[FORMULA_BLOCK:") {
            if let Some(end) = after.find(":END_FORMULA_BLOCK]") {
                let len = "[FORMULA_BLOCK:".len() + end + ":END_FORMULA_BLOCK]".len();
                found = Some((Segment::BlockMarker(after[..end].trim()), len));
            }
        } else if let Some(after) = rest.strip_prefix("[FORMULA:") {
            if let Some(end) = after.find(":END_FORMULA]") {
                let len = "[FORMULA:".len() + end + ":END_FORMULA]".len();
                found = Some((Segment::InlineMarker(after[..end].trim()), len));
            }
        } else if let Some(&(open, close)) = DELIMITERS.iter().find(|(o, _)| rest.starts_with(o)) {
            let after = &rest[open.len()..];
            if let Some(end) = after.find(close).filter(|&e| e > 0) {
                let len = open.len() + end + close.len();
                found = Some((
                    Segment::Math {
                        open,
                        body: &after[..end],
                        close,
                    },
                    len,
                ));
            }
        }

        match found {
            Some((seg, len)) => {
                if text_start < i {
                    out.push(Segment::Text(&s[text_start..i]));
                }
                out.push(seg);
                i += len;
                text_start = i;
            }
            None => i += rest.chars().next().map_or(1, char::len_utf8),
        }
    }
    if text_start < s.len() {
        out.push(Segment::Text(&s[text_start..]));
    }
    out
}

// ── Conversion ───────────────────────────────────────────────────────────

static RE_SPACED_BIGOP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)^\s*([NMKnmk])\s+\\(sum|prod)\s+([A-Za-z])\s*=\s*(-?)\s*([ijk])\s*=\s*(\d+)\s+(.+?)\s*$",
    )
    .unwrap()
});

static RE_BIG_OP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:sum|prod|int|frac)(?:[^A-Za-z]|$)").unwrap());

/// A standalone formula line: `lhs = …` with a big operator on the right.
static RE_DISPLAY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\\?[A-Za-z][A-Za-z0-9]*(?:_\{[^{}]*\}|_[A-Za-z0-9])?\s*=.*\\(?:sum|prod|int|frac)(?:[^A-Za-z]|$)")
        .unwrap()
});

/// An equation or a big operator. Anything else stays inline text.
fn is_mathy(latex: &str) -> bool {
    latex.contains('=') || RE_BIG_OP.is_match(latex)
}

/// Wrap runs of math-only glyphs in running text with `$…$`.
///
/// A run opens at the first glyph that needs math mode and extends over
/// further glyphs and ASCII alphanumerics.
fn convert_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run: Option<MathWriter> = None;

    for c in text.chars() {
        match classify(c) {
            Some(Symbol::Letter(l)) => match run.as_mut() {
                Some(w) => w.push_symbol(Symbol::Letter(l)),
                None => out.push(l),
            },
            Some(sym) => {
                let w = run.get_or_insert_with(|| {
                    let mut w = MathWriter::new();
                    if matches!(sym, Symbol::Sup(_) | Symbol::Sub(_)) {
                        if let Some(base) = out.chars().last().filter(char::is_ascii_alphanumeric) {
                            out.pop();
                            w.push_raw(base);
                        }
                    }
                    w
                });
                w.push_symbol(sym);
            }
            None if c.is_ascii_alphanumeric() && run.is_some() => {
                if let Some(w) = run.as_mut() {
                    w.push_raw(c);
                }
            }
            None => {
                if let Some(w) = run.take() {
                    close_run(&mut out, w);
                }
                out.push(c);
            }
        }
    }
    if let Some(w) = run.take() {
        close_run(&mut out, w);
    }
    out
}

fn close_run(out: &mut String, w: MathWriter) {
    out.push('$');
    out.push_str(&w.into_string());
    out.push('$');
}

fn convert_inline_marker(body: &str) -> String {
    let latex = to_latex_symbols(body);
    if is_mathy(&latex) {
        format!("${latex}$")
    } else {
        wrap_bare_latex(&latex)
    }
}

fn convert_block_marker(body: &str) -> String {
    let latex = to_latex_symbols(body);
    if let Some(c) = RE_SPACED_BIGOP.captures(&latex) {
        return format!(
            "$${lhs} = {sign}\\{op}_{{{idx}={start}}}^{{{upper}}} {rest}$$",
            lhs = &c[3],
            sign = &c[4],
            op = &c[2],
            idx = &c[5],
            start = &c[6],
            upper = &c[1],
            rest = &c[7],
        );
    }
    if is_mathy(&latex) {
        format!("$${latex}$$")
    } else {
        wrap_bare_latex(&latex)
    }
}

/// Convert Unicode math glyphs and formula markers to LaTeX.
///
/// * `[FORMULA: … :END_FORMULA]` becomes inline math, `[FORMULA_BLOCK: …
///   :END_FORMULA_BLOCK]` display math (plain text stays plain).
/// * Existing `$…$`, `$$…$$`, `\(…\)` and `\[…\]` spans are converted in
///   place and never wrapped again.
/// * In running text, math-only glyphs are wrapped in `$…$`; math italic
///   letters just become ASCII.
/// * A whole line of the form `lhs = …\sum…` becomes `$$…$$`.
/// * Bare math commands (`\alpha`, `\frac{a}{b}`) and scripted
///   identifiers (`x_{i}`, `x^{2}`) in running text become `$…$`.
pub fn convert_unicode_math_to_latex(content: &str) -> String {
    if content.is_ascii() && !content.contains("[FORMULA") && !content.contains(['\\', '_', '^']) {
        return content.to_string();
    }
    let segs = segments(content);
    let count = segs.len();
    let mut out = String::with_capacity(content.len() + content.len() / 4);
    for (k, seg) in segs.into_iter().enumerate() {
        match seg {
            Segment::Text(t) => {
                let starts_line = k == 0 || out.ends_with('\n');
                let ends_line = k + 1 == count;
                out.push_str(&convert_text_lines(t, starts_line, ends_line));
            }
            Segment::Math { open, body, close } => {
                out.push_str(open);
                out.push_str(&to_latex_symbols(body));
                out.push_str(close);
            }
            Segment::InlineMarker(body) => out.push_str(&convert_inline_marker(body)),
            Segment::BlockMarker(body) => out.push_str(&convert_block_marker(body)),
        }
    }
    out
}

/// Convert a text segment line by line. Only lines the segment holds in
/// full (per `starts_line` / `ends_line`) may become display math.
fn convert_text_lines(text: &str, starts_line: bool, ends_line: bool) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len() - 1;
    let mut out = String::with_capacity(text.len());
    for (j, line) in lines.iter().enumerate() {
        if j > 0 {
            out.push('\n');
        }
        let whole = (j > 0 || starts_line) && (j < last || ends_line);
        match whole.then(|| display_line(line)).flatten() {
            Some(eq) => out.push_str(&eq),
            None => out.push_str(&wrap_bare_latex(&convert_text(line))),
        }
    }
    out
}

/// `line` as `$$…$$` when it is a standalone formula, keeping its
/// surrounding whitespace.
fn display_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if !trimmed.contains('=') || trimmed.contains('$') {
        return None;
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii() || c == '−' || classify(c).is_some())
    {
        return None;
    }
    let latex = to_latex_symbols(trimmed);
    if !RE_DISPLAY_LINE.is_match(&latex) {
        return None;
    }
    let lead = &line[..line.len() - line.trim_start().len()];
    let tail = &line[line.trim_end().len()..];
    Some(format!("{lead}$${latex}$${tail}"))
}

// ── Bare LaTeX ───────────────────────────────────────────────────────────

/// Commands that only make sense in math mode, besides the Greek letters.
const MATH_COMMANDS: [&str; 52] = [
    "sum", "prod", "int", "iint", "iiint", "oint", "frac", "dfrac", "sqrt", "partial", "nabla",
    "infty", "leq", "geq", "neq", "le", "ge", "approx", "equiv", "propto", "pm", "mp", "times",
    "div", "cdot", "cdots", "ldots", "in", "notin", "subset", "supset", "subseteq", "supseteq",
    "cup", "cap", "forall", "exists", "rightarrow", "leftarrow", "Rightarrow", "log", "ln", "exp",
    "sin", "cos", "tan", "max", "min", "lim", "arg", "mathbf", "hat",
];

fn is_math_command(name: &str) -> bool {
    MATH_COMMANDS.contains(&name)
        || LOWER_GREEK
            .iter()
            .chain(UPPER_GREEK.iter())
            .chain(["\\varepsilon", "\\vartheta", "\\varphi"].iter())
            .any(|g| g.strip_prefix('\\') == Some(name))
}

/// End of the balanced `{…}` group opening at `pos`. Groups never span a
/// line or a `$`.
fn group_end(b: &[u8], pos: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (k, &c) in b.iter().enumerate().skip(pos) {
        match c {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(k + 1);
                }
            }
            b'$' | b'\n' => return None,
            _ => {}
        }
    }
    None
}

/// Skip `[…]` and `{…}` arguments starting at `pos`.
fn args_end(b: &[u8], mut pos: usize) -> usize {
    loop {
        match b.get(pos) {
            Some(b'{') => match group_end(b, pos) {
                Some(end) => pos = end,
                None => return pos,
            },
            Some(b'[') => match b[pos..].iter().position(|&c| c == b']' || c == b'\n') {
                Some(k) if b[pos + k] == b']' => pos += k + 1,
                _ => return pos,
            },
            _ => return pos,
        }
    }
}

/// Skip `_x`, `^x`, `_{…}` and `^{…}` scripts starting at `pos`.
fn scripts_end(b: &[u8], mut pos: usize) -> usize {
    while matches!(b.get(pos), Some(b'_' | b'^')) {
        match b.get(pos + 1) {
            Some(b'{') => match group_end(b, pos + 1) {
                Some(end) => pos = end,
                None => break,
            },
            Some(c) if c.is_ascii_alphanumeric() => pos += 2,
            _ => break,
        }
    }
    pos
}

/// Close of the `$…$` or `$$…$$` span opening at `pos`, or the text end.
fn math_span_end(text: &str, pos: usize) -> usize {
    let delim = if text[pos..].starts_with("$$") { "$$" } else { "$" };
    let body = pos + delim.len();
    text[body..]
        .find(delim)
        .map_or(text.len(), |k| body + k + delim.len())
}

/// Put undelimited math LaTeX in running text into `$…$`.
///
/// Existing `$` spans, escapes (`\\`, `\$`) and non-math commands with
/// their arguments (`\label{eq_{1}}`) are copied unchanged. An identifier
/// needs a braced first script, so `snake_case` names stay text.
fn wrap_bare_latex(text: &str) -> String {
    if !text.contains(['\\', '_', '^']) {
        return text.to_string();
    }
    let b = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 8);
    let mut copied = 0;
    let mut i = 0;

    while i < b.len() {
        let wrap_end = match b[i] {
            b'$' => {
                i = math_span_end(text, i);
                continue;
            }
            b'\\' => {
                let name_end = i + 1 + b[i + 1..].iter().take_while(|c| c.is_ascii_alphabetic()).count();
                if name_end == i + 1 {
                    // `\\`, `\$` and friends: skip the escaped byte too.
                    i += if matches!(b.get(i + 1), Some(b'\\' | b'$')) { 2 } else { 1 };
                    continue;
                }
                if is_math_command(&text[i + 1..name_end]) {
                    let mut end = name_end;
                    loop {
                        let next = scripts_end(b, args_end(b, end));
                        if next == end {
                            break;
                        }
                        end = next;
                    }
                    end
                } else {
                    i = args_end(b, name_end);
                    continue;
                }
            }
            c if c.is_ascii_alphabetic()
                && (i == 0 || !(b[i - 1].is_ascii_alphanumeric() || matches!(b[i - 1], b'\\' | b'_'))) =>
            {
                let id_end = i + b[i..].iter().take_while(|c| c.is_ascii_alphanumeric()).count();
                let braced = matches!(b.get(id_end), Some(b'_' | b'^')) && b.get(id_end + 1) == Some(&b'{');
                let end = if braced { scripts_end(b, id_end) } else { id_end };
                if end == id_end {
                    i = id_end;
                    continue;
                }
                end
            }
            _ => {
                i += 1;
                continue;
            }
        };
        out.push_str(&text[copied..i]);
        out.push('$');
        out.push_str(&text[i..wrap_end]);
        out.push('$');
        i = wrap_end;
        copied = wrap_end;
    }
    out.push_str(&text[copied..]);
    out
}

// ── Reconstruction ───────────────────────────────────────────────────────

const UPPER_LIMITS: [&str; 12] = ["𝑁", "𝑀", "𝐾", "𝑛", "𝑚", "𝑘", "N", "M", "K", "n", "m", "k"];

static RE_LHS_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.)=\s*([-−]?)\s*$").unwrap());
static RE_INDEX_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.)=(\d+)$").unwrap());

/// Rebuild summations split across five lines by PDF extraction.
///
/// ```text
/// 𝑁            upper limit
/// ∑            operator (∑ or ∏)
/// 𝐿= −         left-hand side, optional minus
/// 𝑖=1          index and start
/// 𝑦𝑖log(𝑝𝑖)    body
/// ```
///
/// becomes `$$L = -\sum_{i=1}^{N} yilog(pi)$$`. Lines that do not fit the
/// pattern pass through unchanged.
pub fn reconstruct_formulas(content: &str) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        if let Some(eq) = match_fragment(&lines, i) {
            out.push(eq);
            i += 5;
        } else {
            out.push(lines[i].to_string());
            i += 1;
        }
    }
    out.join("\n")
}

fn match_fragment(lines: &[&str], i: usize) -> Option<String> {
    let upper = lines[i].trim();
    if !UPPER_LIMITS.contains(&upper) || i + 4 >= lines.len() {
        return None;
    }
    let op = match lines[i + 1].trim() {
        "∑" => "\\sum",
        "∏" => "\\prod",
        _ => return None,
    };
    let (Some(lhs), Some(index)) = (
        RE_LHS_LINE.captures(lines[i + 2].trim()),
        RE_INDEX_LINE.captures(lines[i + 3].trim()),
    ) else {
        debug!(line = i + 1, "Formula fragment near {op} did not match, left as is");
        return None;
    };
    let sign = if lhs[2].is_empty() { "" } else { "-" };
    Some(format!(
        "$${} = {sign}{op}_{{{}={}}}^{{{}}} {}$$",
        to_latex_symbols(&lhs[1]),
        to_latex_symbols(&index[1]),
        &index[2],
        to_latex_symbols(upper),
        to_latex_symbols(lines[i + 4].trim()),
    ))
}

/// Namespace for the two formula passes.
pub struct FormulaConverter;

impl FormulaConverter {
    pub fn convert_unicode_math_to_latex(content: &str) -> String {
        convert_unicode_math_to_latex(content)
    }

    pub fn reconstruct_formulas(content: &str) -> String {
        reconstruct_formulas(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_line_summation_is_rebuilt() {
        let out = reconstruct_formulas("𝑁\n∑\n𝐿= −\n𝑖=1\n𝑦𝑖log(𝑝𝑖)");
        assert!(out.contains("$$"));
        assert!(out.contains("\\sum"));
        assert!(out.contains("_{i=1}"));
        assert!(out.contains("^{N}"));
        assert_eq!(out, "$$L = -\\sum_{i=1}^{N} yilog(pi)$$");
    }

    #[test]
    fn ascii_product_without_minus() {
        let out = reconstruct_formulas("前文\nK\n∏\nP=\nj=0\nq_j\n后文");
        assert_eq!(out, "前文\n$$P = \\prod_{j=0}^{K} q_j$$\n后文");
    }

    #[test]
    fn unrelated_lines_pass_through() {
        let input = "N\n∑\n这不是公式\ni=1\nbody";
        assert_eq!(reconstruct_formulas(input), input);
        assert_eq!(reconstruct_formulas("N\n∑\nL="), "N\n∑\nL=");
    }

    #[test]
    fn reconstruction_is_idempotent() {
        let once = reconstruct_formulas("𝑁\n∑\n𝐿= −\n𝑖=1\n𝑦𝑖log(𝑝𝑖)");
        assert_eq!(reconstruct_formulas(&once), once);
    }

    #[test]
    fn inline_marker_with_equation() {
        let out = convert_unicode_math_to_latex("损失为[FORMULA: 𝐿 = 𝛼𝑥² :END_FORMULA]。");
        assert_eq!(out, "损失为$L = \\alpha x^{2}$。");
    }

    #[test]
    fn inline_marker_plain_text_unwrapped() {
        assert_eq!(convert_unicode_math_to_latex("[FORMULA: 𝑥 :END_FORMULA]"), "x");
    }

    #[test]
    fn block_marker_space_joined_sum() {
        let out = convert_unicode_math_to_latex("[FORMULA_BLOCK: 𝑁 ∑ 𝐿= − 𝑖=1 𝑦𝑖log(𝑝𝑖) :END_FORMULA_BLOCK]");
        assert_eq!(out, "$$L = -\\sum_{i=1}^{N} yilog(pi)$$");
    }

    #[test]
    fn block_marker_generic_equation() {
        let out = convert_unicode_math_to_latex("[FORMULA_BLOCK: 𝑦 = ∫ 𝑓(𝑥) :END_FORMULA_BLOCK]");
        assert_eq!(out, "$$y = \\int f(x)$$");
    }

    #[test]
    fn running_text_scripts_pull_base() {
        assert_eq!(convert_unicode_math_to_latex("面积为x²。"), "面积为$x^{2}$。");
        assert_eq!(convert_unicode_math_to_latex("H₂O"), "$H_{2}O$");
    }

    #[test]
    fn adjacent_scripts_merge() {
        assert_eq!(to_latex_symbols("x²³"), "x^{23}");
        assert_eq!(to_latex_symbols("a₁²"), "a_{1}^{2}");
    }

    #[test]
    fn greek_in_text_is_wrapped() {
        assert_eq!(convert_unicode_math_to_latex("学习率α设为0.1"), "学习率$\\alpha$设为0.1");
        assert_eq!(convert_unicode_math_to_latex("a≤b"), "a$\\leq b$");
    }

    #[test]
    fn command_followed_by_letter_gets_space() {
        assert_eq!(to_latex_symbols("𝛼𝑖"), "\\alpha i");
        assert_eq!(to_latex_symbols("∑x"), "\\sum x");
        assert_eq!(to_latex_symbols("\\cdot𝑥"), "\\cdot x");
        assert_eq!(to_latex_symbols("\\alpha"), "\\alpha");
    }

    #[test]
    fn existing_math_converted_in_place() {
        assert_eq!(convert_unicode_math_to_latex("$𝛼 + 𝛽$"), "$\\alpha + \\beta$");
        assert_eq!(convert_unicode_math_to_latex("\\[𝑥 ≤ 1\\]"), "\\[x \\leq 1\\]");
        assert_eq!(convert_unicode_math_to_latex("$$𝑥²$$"), "$$x^{2}$$");
    }

    #[test]
    fn latex_content_is_a_fixed_point() {
        let inputs = [
            "已有公式 $L = -\\sum_{i=1}^{N} y_i$ 和 \\(a\\)。",
            "价格 \\$5 与 \\\\ 换行",
            "\\begin{table}[H]\n1 & 2 \\\\ \\hline\n\\end{table}",
        ];
        for input in inputs {
            assert_eq!(convert_unicode_math_to_latex(input), input);
        }
    }

    #[test]
    fn conversion_is_idempotent() {
        let input = "设α∈Ω，x²≥0，[FORMULA: 𝑦 = 𝑥₁ :END_FORMULA] 以及 [FORMULA_BLOCK: 𝑁 ∑ 𝐿= − 𝑖=1 𝑝𝑖 :END_FORMULA_BLOCK]";
        let once = convert_unicode_math_to_latex(input);
        assert_eq!(convert_unicode_math_to_latex(&once), once);
    }

    #[test]
    fn bare_command_in_text_is_wrapped() {
        assert_eq!(
            convert_unicode_math_to_latex("其中 \\alpha 为权重"),
            "其中 $\\alpha$ 为权重"
        );
    }

    #[test]
    fn bare_scripts_in_text_are_wrapped() {
        assert_eq!(
            convert_unicode_math_to_latex("变量 x_{i} 表示输入"),
            "变量 $x_{i}$ 表示输入"
        );
        assert_eq!(convert_unicode_math_to_latex("面积为 r^{2} 倍"), "面积为 $r^{2}$ 倍");
    }

    #[test]
    fn command_arguments_stay_inside_math() {
        assert_eq!(
            convert_unicode_math_to_latex("比值 \\frac{a^{2}}{b} 较小"),
            "比值 $\\frac{a^{2}}{b}$ 较小"
        );
    }

    #[test]
    fn standalone_formula_line_becomes_display() {
        assert_eq!(
            convert_unicode_math_to_latex("L = -\\sum_{i} y_i \\log p_i"),
            "$$L = -\\sum_{i} y_i \\log p_i$$"
        );
        let text = "损失函数为：\n  L = -\\sum_{i} y_i \\log p_i\n其中 \\alpha 为权重";
        assert_eq!(
            convert_unicode_math_to_latex(text),
            "损失函数为：\n  $$L = -\\sum_{i} y_i \\log p_i$$\n其中 $\\alpha$ 为权重"
        );
    }

    #[test]
    fn formula_line_next_to_existing_math_is_not_display() {
        let input = "$a$ L = \\sum_{i} x_{i}";
        assert_eq!(
            convert_unicode_math_to_latex(input),
            "$a$ L = $\\sum_{i}$ $x_{i}$"
        );
    }

    #[test]
    fn non_math_latex_and_identifiers_are_untouched() {
        let inputs = [
            "见图 \\ref{fig:auto_1}，变量 max_len 与 \\label{eq_{1}}",
            "\\includegraphics[width=0.8\\textwidth]{figures/a_{1}.png}",
            "\\begin{figure}[H]\n\\centering\n\\end{figure}",
        ];
        for input in inputs {
            assert_eq!(convert_unicode_math_to_latex(input), input);
        }
    }

    #[test]
    fn bare_latex_repair_is_idempotent() {
        let input = "其中 \\alpha 为权重，变量 x_{i}\nL = -\\sum_{i} y_i \\log p_i";
        let once = convert_unicode_math_to_latex(input);
        assert_eq!(convert_unicode_math_to_latex(&once), once);
    }

    #[test]
    fn only_equations_and_big_operators_are_mathy() {
        assert!(is_mathy("y = x"));
        assert!(is_mathy("\\sum x"));
        assert!(is_mathy("\\frac{a}{b}"));
        assert!(!is_mathy("x_{1}"));
        assert!(!is_mathy("\\alpha"));
        assert!(!is_mathy("\\integral"));
    }

    #[test]
    fn non_equation_marker_wraps_only_the_math() {
        assert_eq!(convert_unicode_math_to_latex("[FORMULA: ∑𝑥 :END_FORMULA]"), "$\\sum x$");
        assert_eq!(convert_unicode_math_to_latex("[FORMULA: 𝑥₁ :END_FORMULA]"), "$x_{1}$");
        assert_eq!(
            convert_unicode_math_to_latex("[FORMULA: 𝑎 ≤ 𝑏 :END_FORMULA]"),
            "a $\\leq$ b"
        );
    }

    #[test]
    fn unterminated_marker_left_alone() {
        let input = "[FORMULA: 𝑥 = 1";
        assert_eq!(convert_unicode_math_to_latex(input), "[FORMULA: x = 1");
    }

    #[test]
    fn plain_and_italic_greek_agree() {
        assert_eq!(classify('α'), classify('𝛼'));
        assert_eq!(classify('Ω'), Some(Symbol::Command("\\Omega")));
        assert_eq!(classify('Α'), Some(Symbol::Letter('A')));
        assert_eq!(classify('𝑍'), Some(Symbol::Letter('Z')));
        assert_eq!(classify('中'), None);
    }
}
