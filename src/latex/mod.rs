//! Text → LaTeX converters applied to extracted section content.
//!
//! ```text
//! content
//!  │
//!  ├─ 1. formula   rebuild five-line summations
//!  ├─ 2. table     markdown / [TABLE cols=N] / [TABLE_START] → tabular
//!  ├─ 3. figure    [FIGURE:id] → figure env, complete caption + label
//!  └─ 4. formula   Unicode glyphs + [FORMULA…] markers → math mode
//! ```

pub mod escape;
pub mod figure;
pub mod formula;
pub mod labeler;
pub mod table;

pub use escape::{escape_latex, split_bibliography, BibEntry};
pub use figure::FigureConverter;
pub use formula::FormulaConverter;
pub use labeler::Labeler;
pub use table::TableConverter;

/// Run every converter over one section body, in pipeline order.
///
/// With `convert_formulas = false` only tables and figures are touched.
pub fn normalize_content(content: &str, labeler: &Labeler, convert_formulas: bool) -> String {
    let mut out = if convert_formulas {
        formula::reconstruct_formulas(content)
    } else {
        content.to_string()
    };
    out = TableConverter::new(labeler).process(&out);
    out = FigureConverter::new(labeler).process(&out);
    if convert_formulas {
        out = formula::convert_unicode_math_to_latex(&out);
    }
    out
}
