//! Description canonicalization.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{collapse_whitespace, strip_diacritics};

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Z0-9 ]+").expect("static regex"));

/// A maximal alphanumeric token made only of digits and the glyphs OCR
/// confuses with digits, containing at least one real digit.
static NUMERIC_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[0-9ILO]*[0-9][0-9ILO]*\b").expect("static regex"));

/// Canonical form of a service description: accent-free, uppercase,
/// punctuation-free, with digit/letter confusions repaired inside numeric
/// runs and whitespace collapsed.
pub fn normalize_description(raw: &str) -> String {
    let mut s = strip_diacritics(raw).to_uppercase();

    // Separator punctuation becomes a plain delimiter before the non-word
    // sweep turns everything else into spaces
    s = s.replace([';', ':'], ",");
    let spaced = NON_WORD.replace_all(&s, " ");

    let repaired = NUMERIC_RUN.replace_all(&spaced, |caps: &regex::Captures<'_>| {
        caps[0]
            .chars()
            .map(|c| match c {
                'I' | 'L' => '1',
                'O' => '0',
                other => other,
            })
            .collect::<String>()
    });

    collapse_whitespace(&repaired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_canonicalization() {
        assert_eq!(
            normalize_description("Pavimentação asfáltica, e=5cm"),
            "PAVIMENTACAO ASFALTICA E 5CM"
        );
    }

    #[test]
    fn test_separators_and_punctuation() {
        assert_eq!(
            normalize_description("Meio-fio; sarjeta: concreto"),
            "MEIO FIO SARJETA CONCRETO"
        );
    }

    #[test]
    fn test_digit_confusions_in_numeric_runs() {
        // l and O misread inside numbers
        assert_eq!(normalize_description("15O"), "150");
        assert_eq!(normalize_description("Item 1l0"), "ITEM 110");
        // words keep their letters
        assert_eq!(normalize_description("OLEO"), "OLEO");
        assert_eq!(normalize_description("LOTE"), "LOTE");
    }

    #[test]
    fn test_whitespace_collapse() {
        assert_eq!(normalize_description("  a   b  "), "A B");
    }

    #[test]
    fn test_empty() {
        assert_eq!(normalize_description(""), "");
        assert_eq!(normalize_description("   ,;:  "), "");
    }
}
