//! Service deduplication within one attestation.

use std::collections::HashMap;

use acervo_protocol::Service;

use crate::{normalize_description, normalize_unit};

/// Merge services sharing the same `(canonical description, normalized
/// unit)` key, regardless of item code. Quantities are summed and the
/// longest original description wins; first-seen order is preserved.
pub fn dedupe_services(services: Vec<Service>) -> Vec<Service> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut merged: HashMap<(String, String), Service> = HashMap::new();

    for service in services {
        let key = (
            normalize_description(&service.description),
            service
                .unit
                .as_deref()
                .map(normalize_unit)
                .unwrap_or_default(),
        );

        match merged.get_mut(&key) {
            None => {
                order.push(key.clone());
                merged.insert(key, service);
            }
            Some(existing) => {
                existing.quantity = match (existing.quantity, service.quantity) {
                    (Some(a), Some(b)) => Some(a + b),
                    (Some(a), None) => Some(a),
                    (None, q) => q,
                };
                if service.description.len() > existing.description.len() {
                    existing.description = service.description;
                }
                if existing.item_code.is_none() {
                    existing.item_code = service.item_code;
                }
            }
        }
    }

    order
        .into_iter()
        .map(|key| merged.remove(&key).expect("key recorded on insert"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(code: Option<&str>, desc: &str, qty: Option<f64>, unit: &str) -> Service {
        Service {
            item_code: code.map(str::to_string),
            description: desc.to_string(),
            quantity: qty,
            unit: Some(unit.to_string()),
        }
    }

    #[test]
    fn test_merges_equal_keys_summing_quantities() {
        let out = dedupe_services(vec![
            svc(Some("1.1"), "Pavimentação asfáltica", Some(100.0), "M2"),
            svc(Some("2.3"), "PAVIMENTACAO ASFALTICA", Some(50.0), "m²"),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].quantity, Some(150.0));
        // item code of the first occurrence is kept
        assert_eq!(out[0].item_code.as_deref(), Some("1.1"));
    }

    #[test]
    fn test_longest_description_wins() {
        let out = dedupe_services(vec![
            svc(None, "Meio fio", Some(10.0), "M"),
            svc(None, "Meio-fio  ", Some(5.0), "M"),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].description, "Meio-fio  ");
        assert_eq!(out[0].quantity, Some(15.0));
    }

    #[test]
    fn test_different_units_stay_separate() {
        let out = dedupe_services(vec![
            svc(None, "Tubo de concreto", Some(10.0), "M"),
            svc(None, "Tubo de concreto", Some(4.0), "UN"),
        ]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_missing_quantity_does_not_erase_sum() {
        let out = dedupe_services(vec![
            svc(None, "Drenagem", Some(20.0), "M"),
            svc(None, "Drenagem", None, "M"),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].quantity, Some(20.0));
    }

    #[test]
    fn test_order_preserved() {
        let out = dedupe_services(vec![
            svc(None, "A primeira", Some(1.0), "UN"),
            svc(None, "B segunda", Some(2.0), "UN"),
            svc(None, "A primeira", Some(3.0), "UN"),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].description, "A primeira");
        assert_eq!(out[1].description, "B segunda");
        assert_eq!(out[0].quantity, Some(4.0));
    }
}
