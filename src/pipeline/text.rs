//! Character-indexed view of the input text.
//!
//! Structure positions and chunk limits count Unicode scalar values, while
//! `regex` and `str` slicing work in bytes. [`CharText`] converts between
//! the two once instead of re-counting prefixes at every lookup.

/// Input text with a char → byte offset table.
#[derive(Debug, Clone)]
pub struct CharText<'a> {
    text: &'a str,
    /// Byte offset of every char, plus `text.len()` as a sentinel.
    offsets: Vec<usize>,
}

impl<'a> CharText<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());
        Self { text, offsets }
    }

    pub fn as_str(&self) -> &'a str {
        self.text
    }

    /// Length in chars.
    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte offset of char position `pos`, clamped to the end.
    pub fn byte_at(&self, pos: usize) -> usize {
        self.offsets[pos.min(self.len())]
    }

    /// Char position of byte offset `byte`. `byte` must lie on a char boundary.
    pub fn char_at(&self, byte: usize) -> usize {
        match self.offsets.binary_search(&byte) {
            Ok(i) | Err(i) => i,
        }
    }

    /// Chars `[start, end)`, clamped to the text.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        let start = start.min(self.len());
        let end = end.clamp(start, self.len());
        &self.text[self.offsets[start]..self.offsets[end]]
    }

    /// Everything from char `start` on.
    pub fn tail(&self, start: usize) -> &'a str {
        self.slice(start, self.len())
    }
}

/// The first `max` chars of `s`.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_width_positions() {
        let t = CharText::new("第一章 绪论abc");
        assert_eq!(t.len(), 9);
        assert_eq!(t.slice(0, 3), "第一章");
        assert_eq!(t.slice(4, 6), "绪论");
        assert_eq!(t.tail(6), "abc");
        assert_eq!(t.char_at(t.byte_at(4)), 4);
    }

    #[test]
    fn out_of_range_slices_clamp() {
        let t = CharText::new("abc");
        assert_eq!(t.slice(2, 100), "c");
        assert_eq!(t.slice(5, 1), "");
        assert_eq!(t.slice(2, 1), "");
    }

    #[test]
    fn empty_text() {
        let t = CharText::new("");
        assert!(t.is_empty());
        assert_eq!(t.slice(0, 10), "");
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate_chars("摘要内容", 2), "摘要");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }
}
