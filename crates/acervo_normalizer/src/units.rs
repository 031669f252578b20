//! Unit token normalization.
//!
//! The passes run in a fixed order chosen so that the function is
//! idempotent: character repairs happen before the `[A-Z0-9]` restriction,
//! doubled-letter repair and the correction table run on the restricted
//! token, and every table output is itself a fixed point.

use crate::strip_diacritics;

/// Units accepted verbatim. Anything else passes only on length (≤ 3).
const VALID_UNITS: &[&str] = &[
    "UN", "M", "M2", "M3", "KG", "G", "T", "L", "ML", "KM", "CM", "MM", "HA", "MES", "DIA", "H",
    "VB", "GL", "PC", "CJ", "PAR", "SC",
];

/// Exact-match correction table applied after character-level repair.
/// Tie-breaks favor the shortest valid canonical form.
const CORRECTIONS: &[(&str, &str)] = &[
    ("UNI", "UN"),
    ("UND", "UN"),
    ("UNIDADE", "UN"),
    ("METRO", "M"),
    ("METROS", "M"),
    ("KGS", "KG"),
    ("LT", "L"),
    ("TON", "T"),
    ("M23", "M2"),
    ("M22", "M2"),
    ("M32", "M3"),
    ("M33", "M3"),
    ("MOS", "MES"),
];

/// Canonicalize a raw unit token.
///
/// Idempotent: `normalize_unit(normalize_unit(x)) == normalize_unit(x)`.
pub fn normalize_unit(raw: &str) -> String {
    let mut s = strip_diacritics(raw).to_uppercase();

    // Unicode super/subscript digits read as their ASCII value
    s = translate_script_digits(&s);

    // OCR renderings of the square meter exponent
    s = s
        .replace("M^2", "M2")
        .replace("M^3", "M3")
        .replace("M?", "M2")
        .replace("M°", "M2");

    // Restrict to [A-Z0-9]; drops whitespace and leftover punctuation
    let mut token: String = s.chars().filter(|c| c.is_ascii_alphanumeric()).collect();

    // Doubled-letter OCR artifacts. "UN" stays untouched so the guard also
    // covers anything the table will map onto it.
    if token != "UN" {
        token = token.replace("NN", "N").replace("MM", "M").replace("UU", "U");
    }

    for (from, to) in CORRECTIONS {
        if token == *from {
            return (*to).to_string();
        }
    }

    token
}

/// True iff the token is a plausible unit.
pub fn valid_unit(token: &str) -> bool {
    if token.is_empty() || token.len() > 5 {
        return false;
    }
    if VALID_UNITS.contains(&token) {
        return true;
    }
    token.len() <= 3
}

fn translate_script_digits(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '⁰' | '₀' => '0',
            '¹' | '₁' => '1',
            '²' | '₂' => '2',
            '³' | '₃' => '3',
            '⁴' | '₄' => '4',
            '⁵' | '₅' => '5',
            '⁶' | '₆' => '6',
            '⁷' | '₇' => '7',
            '⁸' | '₈' => '8',
            '⁹' | '₉' => '9',
            other => other,
        })
        .collect()
}
