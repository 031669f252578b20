//! Leading item-code detection.
//!
//! Attestation tables prefix rows with hierarchical codes such as `1.2.3`,
//! `S1-4.1` or `AD2-10.5`; OCR frequently renders the dots as spaces.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::collapse_whitespace;

static ITEM_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*((?:S\d+-|AD\d*-)?(?:\d{1,3}(?:\.\d{1,3}){1,3}|\d{1,3}(?: \d{1,2}){1,3}))\s+")
        .expect("static regex")
});

/// Split a leading item code off a raw description.
///
/// Returns the code (spaces rewritten to dots) and the remaining
/// description. When no code is present the description comes back whole,
/// whitespace-collapsed either way.
pub fn extract_item_code(raw: &str) -> (Option<String>, String) {
    if let Some(caps) = ITEM_CODE.captures(raw) {
        let matched = caps.get(0).expect("whole match");
        let code = caps[1].replace(' ', ".");
        let rest = collapse_whitespace(&raw[matched.end()..]);
        return (Some(code), rest);
    }
    (None, collapse_whitespace(raw))
}
