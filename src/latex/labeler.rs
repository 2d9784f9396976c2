//! Per-document label counters for auto-numbered figures and tables.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out unique `\label` numbers within one document.
///
/// One `Labeler` is created per extraction run and shared by reference
/// with every chunk task, so two documents processed side by side never
/// see each other's numbering. Within a document, numbers are unique but
/// their order across concurrently processed chunks is not fixed.
#[derive(Debug, Default)]
pub struct Labeler {
    tables: AtomicUsize,
    figures: AtomicUsize,
}

impl Labeler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next table number, starting at 1.
    pub fn next_table(&self) -> usize {
        self.tables.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Next figure number, starting at 1.
    pub fn next_figure(&self) -> usize {
        self.figures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Tables labelled so far.
    pub fn tables_issued(&self) -> usize {
        self.tables.load(Ordering::Relaxed)
    }

    /// Figures labelled so far.
    pub fn figures_issued(&self) -> usize {
        self.figures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn counters_are_independent() {
        let l = Labeler::new();
        assert_eq!(l.next_table(), 1);
        assert_eq!(l.next_table(), 2);
        assert_eq!(l.next_figure(), 1);
        assert_eq!(l.tables_issued(), 2);
        assert_eq!(l.figures_issued(), 1);
    }

    #[test]
    fn separate_documents_do_not_share_numbers() {
        let a = Labeler::new();
        let b = Labeler::new();
        a.next_table();
        a.next_table();
        assert_eq!(b.next_table(), 1);
    }

    #[test]
    fn concurrent_use_yields_unique_numbers() {
        let l = Arc::new(Labeler::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let l = Arc::clone(&l);
                std::thread::spawn(move || (0..50).map(|_| l.next_table()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for n in h.join().unwrap() {
                assert!(seen.insert(n), "duplicate label {n}");
            }
        }
        assert_eq!(seen.len(), 200);
    }
}
