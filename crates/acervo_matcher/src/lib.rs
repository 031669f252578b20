//! Requirement-to-attestation matching.
//!
//! Fully deterministic: the same requirements and attestations always yield
//! the same result. Selection is a greedy knapsack approximation, sorted by
//! initial contribution, then similarity, then attestation age; it is not
//! guaranteed optimal and is documented as such.

mod activity;

use acervo_normalizer::{keywords, normalize_description, normalize_unit, similarity_of_sets};
use acervo_protocol::{
    AnalysisResult, Attestation, CandidateTrace, Contribution, Decision, PipelineConfig,
    RejectionReason, Requirement, RequirementResult,
};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Guards against f64 rounding flipping a meets/partial verdict.
const QUANTITY_EPSILON: f64 = 1e-9;

/// A requirement whose keyword set is at most this large uses the relaxed
/// common-word minimum.
const SHORT_KEYWORD_SET_LEN: usize = 2;

/// Thresholds for candidate admission, lifted from the flat config.
#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    pub min_similarity: f64,
    pub min_common_words: usize,
    pub min_common_words_short: usize,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            min_similarity: 0.35,
            min_common_words: 2,
            min_common_words_short: 1,
        }
    }
}

impl From<&PipelineConfig> for MatchPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            min_similarity: config.min_similarity,
            min_common_words: config.min_common_words,
            min_common_words_short: config.min_common_words_short,
        }
    }
}

/// One admissible service, carrying everything the selection step needs.
struct Candidate {
    attestation_id: acervo_protocol::AttestationId,
    attestation_created_at: DateTime<Utc>,
    service_index: usize,
    quantity: f64,
    similarity: f64,
}

/// Match every requirement against the user's attestations.
pub fn match_requirements(
    requirements: &[Requirement],
    attestations: &[Attestation],
    policy: &MatchPolicy,
) -> AnalysisResult {
    let results = requirements
        .iter()
        .map(|req| match_one(req, attestations, policy))
        .collect();
    AnalysisResult::new(results)
}

fn match_one(
    requirement: &Requirement,
    attestations: &[Attestation],
    policy: &MatchPolicy,
) -> RequirementResult {
    let req_unit = normalize_unit(&requirement.unit);
    let req_keywords = keywords(&requirement.description);
    let activity_family = requirement
        .activity
        .as_deref()
        .and_then(activity::family_for);
    let mandatory: Vec<String> = requirement
        .mandatory_terms
        .iter()
        .map(|t| normalize_description(t))
        .filter(|t| !t.is_empty())
        .collect();
    let min_common = if req_keywords.len() <= SHORT_KEYWORD_SET_LEN {
        policy.min_common_words_short
    } else {
        policy.min_common_words
    };

    let mut trace = Vec::new();
    let mut candidates = Vec::new();

    for attestation in attestations {
        for (service_index, service) in attestation.services.iter().enumerate() {
            // Services without a positive quantity and a unit cannot
            // contribute and are invisible to the gates.
            let (Some(quantity), Some(unit)) = (service.quantity, service.unit.as_deref()) else {
                continue;
            };
            if quantity <= 0.0 {
                continue;
            }

            let canonical = normalize_description(&service.description);
            let service_keywords = keywords(&service.description);
            let sim = similarity_of_sets(&req_keywords, &service_keywords);
            let common = req_keywords.intersection(&service_keywords).count();

            let rejection = gate(
                &req_unit,
                unit,
                &canonical,
                activity_family,
                &mandatory,
                sim,
                common,
                policy.min_similarity,
                min_common,
            );

            trace.push(CandidateTrace {
                attestation_id: attestation.id,
                service_index,
                similarity: sim,
                common_keywords: common,
                accepted: rejection.is_none(),
                rejection,
            });

            if rejection.is_none() {
                candidates.push(Candidate {
                    attestation_id: attestation.id,
                    attestation_created_at: attestation.created_at,
                    service_index,
                    quantity,
                    similarity: sim,
                });
            }
        }
    }

    let required = requirement.required_quantity;
    sort_candidates(&mut candidates, required);
    let contributions = if requirement.allow_sum {
        select_greedy(&candidates, required)
    } else {
        select_single_best(&candidates, required)
    };

    let covered: f64 = contributions.iter().map(|c| c.quantity).sum();
    let decision = if covered + QUANTITY_EPSILON >= required {
        Decision::Meets
    } else if covered > 0.0 {
        Decision::Partial
    } else {
        Decision::Unmet
    };
    let coverage_pct = if required > 0.0 {
        (100.0 * covered / required).min(100.0)
    } else {
        100.0
    };

    debug!(
        requirement = %requirement.description,
        ?decision,
        coverage_pct,
        candidates = candidates.len(),
        "requirement matched"
    );

    RequirementResult {
        requirement: requirement.clone(),
        decision,
        coverage_pct,
        contributions,
        trace,
    }
}

#[allow(clippy::too_many_arguments)]
fn gate(
    req_unit: &str,
    service_unit: &str,
    canonical: &str,
    activity_family: Option<&'static [&'static str]>,
    mandatory: &[String],
    sim: f64,
    common: usize,
    min_similarity: f64,
    min_common: usize,
) -> Option<RejectionReason> {
    if normalize_unit(service_unit) != req_unit {
        return Some(RejectionReason::UnitMismatch);
    }
    if let Some(family) = activity_family {
        if !activity::mentions_activity(canonical, family) {
            return Some(RejectionReason::ActivityGate);
        }
    }
    if !mandatory.is_empty() && !mandatory.iter().any(|term| canonical.contains(term.as_str())) {
        return Some(RejectionReason::MandatoryTerm);
    }
    if sim < min_similarity || common < min_common {
        return Some(RejectionReason::BelowThreshold);
    }
    None
}

/// Order by initial contribution (quantity capped at the requirement),
/// then similarity, then attestation age, with ids and indexes as final
/// tie-breaks so the order is total.
fn sort_candidates(candidates: &mut [Candidate], required: f64) {
    candidates.sort_by(|a, b| {
        let ca = a.quantity.min(required);
        let cb = b.quantity.min(required);
        cb.partial_cmp(&ca)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.similarity
                    .partial_cmp(&a.similarity)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.attestation_created_at.cmp(&b.attestation_created_at))
            .then(a.attestation_id.cmp(&b.attestation_id))
            .then(a.service_index.cmp(&b.service_index))
    });
}

/// Accumulate candidates until the requirement is covered. Each
/// contribution is capped at the remaining demand, so the recorded sum
/// never exceeds the requirement.
fn select_greedy(candidates: &[Candidate], required: f64) -> Vec<Contribution> {
    let mut contributions = Vec::new();
    let mut running = 0.0_f64;

    for candidate in candidates {
        if running + QUANTITY_EPSILON >= required {
            break;
        }
        let contribution = candidate.quantity.min(required - running);
        if contribution <= 0.0 {
            continue;
        }
        running += contribution;
        contributions.push(Contribution {
            attestation_id: candidate.attestation_id,
            service_index: candidate.service_index,
            quantity: contribution,
            similarity: candidate.similarity,
        });
    }

    contributions
}

/// allow_sum = false: one attestation, one service. The list is already in
/// selection order, so the first candidate is the best.
fn select_single_best(candidates: &[Candidate], required: f64) -> Vec<Contribution> {
    candidates
        .first()
        .map(|best| {
            vec![Contribution {
                attestation_id: best.attestation_id,
                service_index: best.service_index,
                quantity: best.quantity.min(required),
                similarity: best.similarity,
            }]
        })
        .unwrap_or_default()
}
