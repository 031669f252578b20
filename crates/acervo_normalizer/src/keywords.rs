//! Keyword extraction and bag similarity.

use std::collections::HashSet;

use crate::normalize_description;

/// Portuguese prepositions, articles and contractions that carry no
/// descriptive weight, plus unit-like tokens that would otherwise dominate
/// intersections.
const STOPWORDS: &[&str] = &[
    // prepositions / articles / contractions
    "A", "O", "AS", "OS", "AO", "AOS", "DE", "DA", "DO", "DAS", "DOS", "E", "EM", "NA", "NO",
    "NAS", "NOS", "UM", "UMA", "UNS", "UMAS", "COM", "PARA", "POR", "PELO", "PELA", "SEM", "SOB",
    "SOBRE", "ATE", "APOS", "ENTRE", "CONTRA", "DESDE", "PERANTE", "TIPO", "INCLUSIVE",
    // unit-like tokens
    "M", "M2", "M3", "ML", "KG", "KM", "CM", "MM", "UN", "UND", "L", "T", "TON", "MES", "DIA",
    "H", "VB", "GL", "PC", "CJ", "PAR",
];

/// Keyword set of a description: canonical tokens minus stopwords and
/// single-character leftovers.
pub fn keywords(description: &str) -> HashSet<String> {
    normalize_description(description)
        .split_whitespace()
        .filter(|token| token.len() > 1 && !STOPWORDS.contains(token))
        .map(|token| token.to_string())
        .collect()
}

/// Keyword-bag similarity in [0, 1].
///
/// The denominator is the *larger* of the two sets so that a short
/// description cannot cover a long one just by being a subset of it.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ka = keywords(a);
    let kb = keywords(b);
    similarity_of_sets(&ka, &kb)
}

/// Same ratio over precomputed keyword sets.
pub fn similarity_of_sets(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let larger = a.len().max(b.len());
    if larger == 0 {
        return 0.0;
    }
    let common = a.intersection(b).count();
    common as f64 / larger as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_drop_stopwords_and_units() {
        let kw = keywords("Execução de base de brita em 500 m2");
        assert!(kw.contains("EXECUCAO"));
        assert!(kw.contains("BASE"));
        assert!(kw.contains("BRITA"));
        assert!(kw.contains("500"));
        assert!(!kw.contains("DE"));
        assert!(!kw.contains("EM"));
        assert!(!kw.contains("M2"));
    }

    #[test]
    fn test_keywords_drop_short_tokens() {
        let kw = keywords("C A piso");
        assert!(kw.contains("PISO"));
        assert!(!kw.contains("C"));
    }

    #[test]
    fn test_identical_descriptions() {
        let s = similarity("pavimentação asfáltica", "PAVIMENTACAO ASFALTICA");
        assert!((s - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_denominator_is_larger_set() {
        // 2 common keywords; set sizes 2 and 5 -> 2/5
        let s = similarity(
            "piso porcelanato",
            "piso porcelanato laminado acetinado retificado",
        );
        assert!((s - 2.0 / 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_disjoint_and_empty() {
        assert_eq!(similarity("meio fio", "drenagem pluvial"), 0.0);
        assert_eq!(similarity("", ""), 0.0);
        assert_eq!(similarity("de em com", "piso"), 0.0);
    }
}
