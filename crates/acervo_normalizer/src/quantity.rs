//! Quantity parsing for Brazilian-formatted numbers.
//!
//! Documents write `1.234,56`; exports sometimes write `1234.56`. Both must
//! parse, and thousands separators must not be mistaken for decimals.

/// Parse a non-negative quantity token. Returns None for anything that is
/// not a plain number (ranges, percentages glued to text, negatives).
pub fn parse_quantity_br(raw: &str) -> Option<f64> {
    let token = raw.trim().trim_start_matches("R$").trim();
    if token.is_empty() {
        return None;
    }
    if !token
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == ',')
    {
        return None;
    }

    let normalized = if token.contains(',') {
        // comma is the decimal mark; dots are thousands separators
        token.replace('.', "").replace(',', ".")
    } else if is_dotted_thousands(token) {
        token.replace('.', "")
    } else {
        token.to_string()
    };

    let value = normalized.parse::<f64>().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}

/// `1.200` / `12.345.678` style: every dot group is exactly three digits.
fn is_dotted_thousands(token: &str) -> bool {
    let mut groups = token.split('.');
    let Some(head) = groups.next() else {
        return false;
    };
    if head.is_empty() || head.len() > 3 || !head.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let mut saw_group = false;
    for group in groups {
        if group.len() != 3 || !group.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        saw_group = true;
    }
    saw_group
}
