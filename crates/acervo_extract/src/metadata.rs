//! Issuer and issue-date heuristics over raw document text.

use once_cell::sync::Lazy;
use regex::Regex;

/// Lines announcing the issuing body.
static ISSUER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:EMITENTE:\s*)?((?:PREFEITURA|SECRETARIA|DEPARTAMENTO|COMPANHIA|EMPRESA|CONSTRUTORA|CONSORCIO|CONSÓRCIO|GOVERNO)\b.{0,80})",
    )
    .expect("static regex")
});

/// dd/mm/yyyy or dd-mm-yyyy.
static DATE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4})\b").expect("static regex"));

/// First line that looks like an issuing body.
pub fn extract_issuer(text: &str) -> Option<String> {
    for line in text.lines() {
        if let Some(caps) = ISSUER_LINE.captures(line) {
            let issuer = caps[1].trim().trim_end_matches([',', '.', ';']).to_string();
            if issuer.len() > 5 {
                return Some(issuer);
            }
        }
    }
    None
}

/// Last plausible date in the document: attestations close with the
/// signature date.
pub fn extract_issue_date(text: &str) -> Option<String> {
    let mut last = None;
    for caps in DATE_TOKEN.captures_iter(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        if (1..=31).contains(&day) && (1..=12).contains(&month) {
            last = Some(format!("{:02}/{:02}/{}", day, month, &caps[3]));
        }
    }
    last
}
