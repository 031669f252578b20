//! Page-output merging and service post-processing.
//!
//! Tabular rows are preferred when any tier produced them; otherwise the
//! caller runs a structured LLM pass or falls back to the line heuristics
//! here. Post-processing applies the normalizer: item-code extraction,
//! unit normalization, dedup and quantity backfill.

use acervo_normalizer::{
    dedupe_services, extract_item_code, normalize_unit, parse_quantity_br, valid_unit,
};
use acervo_protocol::{PageExtract, Service};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Header tokens that mark a table row as a header, not data.
const HEADER_TOKENS: &[&str] = &[
    "ITEM", "DESCRICAO", "DESCRIÇÃO", "DISCRIMINACAO", "QUANTIDADE", "QTD", "QTDE", "UNIDADE",
    "UND", "UNID", "SERVICO", "SERVIÇO",
];

/// `<desc> <qty> <unit>` line shape, unit possibly carrying OCR noise.
static LINE_DESC_QTY_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<desc>.+?)\s+(?P<qty>[\d.,]+)\s*(?P<unit>[A-Za-zÀ-ú²³°?^0-9]{1,6})\s*$")
        .expect("static regex")
});

/// `<desc> <unit> <qty>` line shape.
static LINE_DESC_UNIT_QTY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<desc>.+?)\s+(?P<unit>[A-Za-zÀ-ú²³°?^]{1,6})\s+(?P<qty>[\d.,]+)\s*$")
        .expect("static regex")
});

/// True when any accepted page carries usable tabular structure.
pub fn has_tabular_data(pages: &[PageExtract]) -> bool {
    pages
        .iter()
        .any(|p| p.tables.iter().any(|table| !table.is_empty()))
}

/// Interpret table rows as services. Cell layout varies between sources,
/// so the quantity and unit are located by shape, not by position.
pub fn services_from_tables(pages: &[PageExtract]) -> Vec<Service> {
    let mut services = Vec::new();
    for page in pages {
        for table in &page.tables {
            for row in table {
                if let Some(service) = service_from_row(row) {
                    services.push(service);
                }
            }
        }
    }
    services
}

fn service_from_row(row: &[String]) -> Option<Service> {
    let cells: Vec<&str> = row.iter().map(|c| c.trim()).filter(|c| !c.is_empty()).collect();
    if cells.is_empty() || is_header_row(&cells) {
        return None;
    }

    // quantity: rightmost numeric cell
    let qty_idx = cells
        .iter()
        .rposition(|c| c.chars().any(|ch| ch.is_ascii_digit()) && parse_quantity_br(c).is_some());
    // unit: rightmost short non-numeric cell that normalizes to something valid
    let unit_idx = cells.iter().enumerate().rev().find_map(|(i, c)| {
        if Some(i) == qty_idx {
            return None;
        }
        let token = normalize_unit(c);
        if !token.is_empty()
            && valid_unit(&token)
            && !c.chars().all(|ch| ch.is_ascii_digit() || ch == '.' || ch == ',')
        {
            Some(i)
        } else {
            None
        }
    });

    // description: longest remaining cell
    let desc_idx = cells
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != qty_idx && Some(*i) != unit_idx)
        .max_by_key(|(_, c)| c.len())
        .map(|(i, _)| i)?;
    if cells[desc_idx].len() < 3 {
        return None;
    }

    // a leading code may live in its own cell or inside the description
    let (code_from_desc, description) = extract_item_code(cells[desc_idx]);
    let item_code = code_from_desc.or_else(|| {
        cells
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != desc_idx && Some(*i) != qty_idx && Some(*i) != unit_idx)
            .find_map(|(_, c)| extract_item_code(&format!("{c} x")).0)
    });

    Some(Service {
        item_code,
        description,
        quantity: qty_idx.and_then(|i| parse_quantity_br(cells[i])),
        unit: unit_idx.map(|i| cells[i].to_string()),
    })
}

fn is_header_row(cells: &[&str]) -> bool {
    let header_hits = cells
        .iter()
        .filter(|c| HEADER_TOKENS.contains(&c.to_uppercase().as_str()))
        .count();
    header_hits * 2 >= cells.len().max(1)
}

/// Heuristic line parser used when no tier produced tables and no LLM is
/// configured. Handles the two common row layouts of attestation text.
pub fn services_from_text(text: &str) -> Vec<Service> {
    let mut services = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.len() < 8 {
            continue;
        }
        if let Some(service) = service_from_line(line) {
            services.push(service);
        }
    }
    debug!(count = services.len(), "parsed services from raw text");
    services
}

fn service_from_line(line: &str) -> Option<Service> {
    for regex in [&*LINE_DESC_QTY_UNIT, &*LINE_DESC_UNIT_QTY] {
        if let Some(caps) = regex.captures(line) {
            let unit_raw = caps.name("unit")?.as_str();
            let unit = normalize_unit(unit_raw);
            if unit.is_empty() || !valid_unit(&unit) {
                continue;
            }
            let Some(quantity) = parse_quantity_br(caps.name("qty")?.as_str()) else {
                continue;
            };
            let (item_code, description) = extract_item_code(caps.name("desc")?.as_str());
            if description.len() < 3 {
                continue;
            }
            return Some(Service {
                item_code,
                description,
                quantity: Some(quantity),
                unit: Some(unit_raw.to_string()),
            });
        }
    }
    None
}

/// Final normalization pass: extract item codes still embedded in
/// descriptions, normalize units, collapse description whitespace, backfill
/// missing quantities from the raw text, merge duplicates and drop services
/// that still lack a positive quantity or a unit.
pub fn postprocess(services: Vec<Service>, raw_text: &str) -> Vec<Service> {
    let mut out = Vec::with_capacity(services.len());
    for mut service in services {
        if service.item_code.is_none() {
            let (code, rest) = extract_item_code(&service.description);
            if code.is_some() {
                service.item_code = code;
                service.description = rest;
            }
        }
        service.description = service
            .description
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        service.unit = service
            .unit
            .as_deref()
            .map(normalize_unit)
            .filter(|u| !u.is_empty() && valid_unit(u));

        if service.quantity.is_none() {
            service.quantity = backfill_quantity(&service, raw_text);
        }

        out.push(service);
    }

    let deduped = dedupe_services(out);
    deduped.into_iter().filter(Service::is_complete).collect()
}

/// When an item has a code and a unit but no quantity, look for the single
/// unambiguous numeric token on the raw-text line that carries the code.
fn backfill_quantity(service: &Service, raw_text: &str) -> Option<f64> {
    let code = service.item_code.as_deref()?;
    let line = raw_text.lines().find(|line| line.contains(code))?;

    let candidates: Vec<f64> = line
        .split_whitespace()
        .filter(|token| *token != code)
        .filter(|token| token.chars().any(|c| c.is_ascii_digit()))
        .filter_map(parse_quantity_br_token)
        .collect();

    match candidates.as_slice() {
        [single] => Some(*single),
        _ => None,
    }
}

fn parse_quantity_br_token(token: &str) -> Option<f64> {
    parse_quantity_br(token.trim_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != ','))
}
