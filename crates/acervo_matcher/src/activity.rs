//! Activity gate keyword families.
//!
//! When a requirement carries an activity tag, candidate services must
//! mention at least one keyword of that activity's family. Keywords are
//! canonical-form prefixes matched by substring, so `PAVIMENT` covers
//! `PAVIMENTACAO` and `PAVIMENTO`.

use acervo_normalizer::normalize_description;

const FAMILIES: &[(&str, &[&str])] = &[
    ("PAVIMENTACAO", &["PAVIMENT", "ASFALT", "CBUQ", "RECAPEAMENTO"]),
    ("TERRAPLENAGEM", &["TERRAPLEN", "ESCAVAC", "ATERRO", "CORTE"]),
    ("DRENAGEM", &["DREN", "GALERIA", "BUEIRO", "SARJETA", "TUBO"]),
    ("EDIFICACAO", &["EDIFIC", "CONSTRUC", "ALVENARIA", "ESTRUTURA"]),
    ("ELETRICA", &["ELETR", "ILUMINAC", "CABO", "SUBESTACAO"]),
    ("HIDRAULICA", &["HIDRAUL", "AGUA", "ESGOTO", "ADUTORA"]),
    ("SINALIZACAO", &["SINALIZ", "PLACA", "PINTURA"]),
];

/// Keyword family for an activity tag, or None when the tag is unknown
/// (unknown tags do not gate).
pub(crate) fn family_for(tag: &str) -> Option<&'static [&'static str]> {
    let canonical = normalize_description(tag);
    FAMILIES
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, keywords)| *keywords)
}

/// True when the canonical description names the activity.
pub(crate) fn mentions_activity(canonical_description: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| canonical_description.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_families() {
        assert!(family_for("pavimentação").is_some());
        assert!(family_for("Drenagem").is_some());
        assert!(family_for("obras especiais").is_none());
    }

    #[test]
    fn test_prefix_matching() {
        let paving = family_for("pavimentacao").unwrap();
        assert!(mentions_activity("PAVIMENTACAO ASFALTICA EM CBUQ", paving));
        assert!(mentions_activity("RECAPEAMENTO ASFALTICO", paving));
        assert!(!mentions_activity("REDE DE ESGOTO", paving));
    }
}
