//! Deterministic canonicalization of noisy OCR text.
//!
//! Everything here is pure and table-driven: unit tokens, descriptions and
//! quantities come out of scanned Brazilian procurement documents riddled
//! with diacritics, superscripts and digit/letter confusions, and the rest
//! of the system (dedup, matching) relies on these functions producing the
//! same canonical form for every spelling of the same thing.

mod dedupe;
mod description;
mod item_code;
mod keywords;
mod quantity;
mod units;

pub use dedupe::dedupe_services;
pub use description::normalize_description;
pub use item_code::extract_item_code;
pub use keywords::{keywords, similarity, similarity_of_sets};
pub use quantity::parse_quantity_br;
pub use units::{normalize_unit, valid_unit};

use unicode_normalization::UnicodeNormalization;

/// Strip diacritics by NFD decomposition, dropping combining marks.
pub(crate) fn strip_diacritics(input: &str) -> String {
    input
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect()
}

/// Collapse runs of whitespace into single spaces and trim.
pub(crate) fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
