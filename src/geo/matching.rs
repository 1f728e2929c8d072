//! Name normalization and scored matching.
//!
//! Every candidate name is reduced once to a [`NameKey`] (full name, base
//! name before the first comma, and stem without a trailing designator such
//! as "County" or "city"). A query is reduced the same way and compared in
//! strictly ordered bands:
//!
//! | kind      | score        |
//! |-----------|--------------|
//! | exact     | 1.0          |
//! | stem      | 0.9          |
//! | token     | (0.60, 0.85] |
//! | substring | (0.45, 0.60) |
//! | fuzzy     | [0.30, 0.45] |

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

pub const EXACT_SCORE: f64 = 1.0;
pub const STEM_SCORE: f64 = 0.9;

/// Minimum Jaro-Winkler similarity for a fuzzy match.
pub const FUZZY_FLOOR: f64 = 0.8;

/// Shortest query (in bytes) eligible for substring matching.
const MIN_SUBSTRING_LEN: usize = 3;

/// Trailing designators, longest first so multi-word forms win.
static DESIGNATORS: &[&str] = &[
    "metropolitan statistical area",
    "micropolitan statistical area",
    "consolidated government",
    "unified government",
    "city and borough",
    "census area",
    "metro area",
    "micro area",
    "municipality",
    "plantation",
    "municipio",
    "township",
    "borough",
    "village",
    "county",
    "parish",
    "city",
    "town",
    "cdp",
];

/// Token spellings folded to one form before comparison.
static TOKEN_FOLDS: &[(&str, &str)] = &[
    ("saint", "st"),
    ("sainte", "ste"),
    ("mount", "mt"),
    ("fort", "ft"),
];

/// How a candidate matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    Fuzzy,
    Substring,
    Token,
    Stem,
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    pub kind: MatchKind,
    pub score: f64,
}

impl MatchScore {
    pub fn exact() -> Self {
        Self {
            kind: MatchKind::Exact,
            score: EXACT_SCORE,
        }
    }
}

/// Lowercase, strip diacritics and punctuation, fold common abbreviations,
/// and collapse whitespace.
pub fn normalize(text: &str) -> String {
    let cleaned: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| *c != '\'' && *c != '’')
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .map(|tok| {
            TOKEN_FOLDS
                .iter()
                .find(|(from, _)| *from == tok)
                .map(|(_, to)| *to)
                .unwrap_or(tok)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pre-computed comparison forms of one name.
#[derive(Debug, Clone)]
pub struct NameKey {
    /// Entire normalized name, including any ", State" suffix.
    pub full: String,
    /// Normalized text before the first comma.
    pub base: String,
    /// `base` without its trailing designator.
    pub stem: String,
    pub designator: Option<&'static str>,
    tokens: Vec<String>,
}

impl NameKey {
    pub fn new(name: &str) -> Self {
        let full = normalize(name);
        let base = normalize(name.split(',').next().unwrap_or(name));
        let (stem, designator) = strip_designator(&base);
        let tokens = base.split(' ').filter(|t| !t.is_empty()).map(String::from).collect();
        Self {
            full,
            base,
            stem,
            designator,
            tokens,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }
}

fn strip_designator(base: &str) -> (String, Option<&'static str>) {
    for designator in DESIGNATORS {
        if let Some(rest) = base.strip_suffix(designator) {
            if let Some(stem) = rest.strip_suffix(' ') {
                let stem = stem.trim();
                if !stem.is_empty() {
                    return (stem.to_string(), Some(designator));
                }
            }
        }
    }
    (base.to_string(), None)
}

/// Score `candidate` against `query`, or `None` when nothing matches.
pub fn score(query: &NameKey, candidate: &NameKey) -> Option<MatchScore> {
    if query.is_empty() || candidate.is_empty() {
        return None;
    }

    if query.base == candidate.base || query.full == candidate.full {
        return Some(MatchScore::exact());
    }

    let designators_agree = query.designator.is_none() || query.designator == candidate.designator;
    if designators_agree && query.stem == candidate.stem {
        return Some(MatchScore {
            kind: MatchKind::Stem,
            score: STEM_SCORE,
        });
    }

    if designators_agree
        && query
            .tokens
            .iter()
            .all(|t| candidate.tokens.iter().any(|c| c == t))
    {
        let coverage = query.tokens.len() as f64 / candidate.tokens.len().max(1) as f64;
        return Some(MatchScore {
            kind: MatchKind::Token,
            score: 0.6 + 0.25 * coverage.min(1.0),
        });
    }

    if query.base.len() >= MIN_SUBSTRING_LEN && candidate.base.contains(&query.base) {
        let ratio = query.base.len() as f64 / candidate.base.len() as f64;
        return Some(MatchScore {
            kind: MatchKind::Substring,
            score: 0.45 + 0.15 * ratio.min(0.99),
        });
    }

    let similarity = strsim::jaro_winkler(&query.stem, &candidate.stem);
    if similarity >= FUZZY_FLOOR {
        let t = (similarity - FUZZY_FLOOR) / (1.0 - FUZZY_FLOOR);
        return Some(MatchScore {
            kind: MatchKind::Fuzzy,
            score: 0.3 + 0.15 * t.min(1.0),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(query: &str, candidate: &str) -> Option<MatchScore> {
        score(&NameKey::new(query), &NameKey::new(candidate))
    }

    #[test]
    fn normalize_strips_accents_and_punctuation() {
        assert_eq!(normalize("Doña Ana County"), "dona ana county");
        assert_eq!(normalize("St. Louis"), "st louis");
        assert_eq!(normalize("Saint Louis"), "st louis");
        assert_eq!(normalize("Coeur d'Alene  city"), "coeur dalene city");
    }

    #[test]
    fn name_key_splits_base_and_stem() {
        let key = NameKey::new("Cook County, Illinois");
        assert_eq!(key.full, "cook county illinois");
        assert_eq!(key.base, "cook county");
        assert_eq!(key.stem, "cook");
        assert_eq!(key.designator, Some("county"));
    }

    #[test]
    fn designator_alone_is_not_stripped() {
        let key = NameKey::new("Town");
        assert_eq!(key.stem, "town");
        assert!(key.designator.is_none());
    }

    #[test]
    fn exact_beats_stem_beats_token() {
        let exact = s("Cook County", "Cook County, Illinois").unwrap();
        let stem = s("Cook", "Cook County, Illinois").unwrap();
        let token = s("York", "New York County, New York").unwrap();
        assert_eq!(exact.kind, MatchKind::Exact);
        assert_eq!(stem.kind, MatchKind::Stem);
        assert_eq!(token.kind, MatchKind::Token);
        assert!(exact.score > stem.score && stem.score > token.score);
    }

    #[test]
    fn substring_beats_fuzzy() {
        let substring = s("Spring", "Springfield city, Illinois").unwrap();
        assert_eq!(substring.kind, MatchKind::Substring);
        let fuzzy = s("Cok", "Cook County, Illinois").unwrap();
        assert_eq!(fuzzy.kind, MatchKind::Fuzzy);
        assert!(substring.score > fuzzy.score);
    }

    #[test]
    fn mismatched_designator_is_not_a_stem_match() {
        let county = s("St. Louis County", "St. Louis County, Missouri").unwrap();
        let city = s("St. Louis County", "St. Louis city, Missouri").map(|m| m.kind);
        assert_eq!(county.kind, MatchKind::Exact);
        assert_ne!(city, Some(MatchKind::Stem));
        assert_ne!(city, Some(MatchKind::Exact));
    }

    #[test]
    fn unrelated_names_do_not_match() {
        assert!(s("Houston", "Cook County, Illinois").is_none());
    }

    #[test]
    fn bands_are_ordered() {
        for (q, c) in [
            ("New", "New York County, New York"),
            ("Spring", "Springfield city, Illinois"),
            ("Cokk", "Cook County, Illinois"),
        ] {
            let m = s(q, c).unwrap();
            let (lo, hi) = match m.kind {
                MatchKind::Exact => (1.0, 1.0),
                MatchKind::Stem => (0.9, 0.9),
                MatchKind::Token => (0.6, 0.85),
                MatchKind::Substring => (0.45, 0.6),
                MatchKind::Fuzzy => (0.3, 0.45),
            };
            assert!(m.score >= lo && m.score <= hi, "{q}: {m:?}");
        }
    }
}
