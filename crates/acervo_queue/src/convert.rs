//! Tender-notice conversions.

use acervo_protocol::{Requirement, Service};

/// Requirements extracted from a tender document share the services-table
/// shape; summation stays allowed unless a policy explicitly overrides it
/// later (the notice text is never trusted to declare it).
pub fn requirements_from_services(services: &[Service]) -> Vec<Requirement> {
    services
        .iter()
        .filter_map(|service| {
            let quantity = service.quantity?;
            let unit = service.unit.clone()?;
            if quantity <= 0.0 || unit.is_empty() {
                return None;
            }
            Some(Requirement {
                code: service.item_code.clone(),
                description: service.description.clone(),
                required_quantity: quantity,
                unit,
                allow_sum: true,
                activity: None,
                mandatory_terms: Vec::new(),
            })
        })
        .collect()
}
