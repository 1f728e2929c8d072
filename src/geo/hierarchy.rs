//! Hierarchy ordering table and friendly-name → API token table.
//!
//! The remote grammar expresses ancestor constraints as one space-joined
//! list ordered from least to most granular. That order is fixed here and
//! nowhere else; a level absent from [`HIERARCHY_ORDER`] cannot appear as an
//! ancestor and is reported as [`QueryError::UnorderedLevel`].

use super::GeographyLevel;
use crate::error::QueryError;

/// Geography levels from least to most granular.
///
/// ZIP code tabulation areas cross every other boundary and are deliberately
/// absent: they may be a primary selector but never an ancestor.
pub static HIERARCHY_ORDER: &[GeographyLevel] = &[
    GeographyLevel::Nation,
    GeographyLevel::Region,
    GeographyLevel::Division,
    GeographyLevel::CombinedStatisticalArea,
    GeographyLevel::MetropolitanStatisticalArea,
    GeographyLevel::MetropolitanDivision,
    GeographyLevel::State,
    GeographyLevel::County,
    GeographyLevel::CountySubdivision,
    GeographyLevel::Place,
    GeographyLevel::CongressionalDistrict,
    GeographyLevel::Tract,
    GeographyLevel::BlockGroup,
];

/// A row of the token table.
pub struct LevelToken {
    pub level: GeographyLevel,
    /// Exact token the remote service expects in `for`/`in` clauses and
    /// returns as a column header.
    pub token: &'static str,
    /// Friendly names accepted from callers, lowercase.
    pub aliases: &'static [&'static str],
}

/// Friendly-name → API token table.
pub static LEVEL_TOKENS: &[LevelToken] = &[
    LevelToken {
        level: GeographyLevel::Nation,
        token: "us",
        aliases: &["nation", "national", "country", "united states"],
    },
    LevelToken {
        level: GeographyLevel::Region,
        token: "region",
        aliases: &["regions", "census region"],
    },
    LevelToken {
        level: GeographyLevel::Division,
        token: "division",
        aliases: &["divisions", "census division"],
    },
    LevelToken {
        level: GeographyLevel::State,
        token: "state",
        aliases: &["states"],
    },
    LevelToken {
        level: GeographyLevel::County,
        token: "county",
        aliases: &["counties", "parish", "borough"],
    },
    LevelToken {
        level: GeographyLevel::CountySubdivision,
        token: "county subdivision",
        aliases: &["cousub", "county subdivisions", "minor civil division", "township"],
    },
    LevelToken {
        level: GeographyLevel::Place,
        token: "place",
        aliases: &["places", "city", "town", "village", "cdp", "municipality"],
    },
    LevelToken {
        level: GeographyLevel::Tract,
        token: "tract",
        aliases: &["tracts", "census tract"],
    },
    LevelToken {
        level: GeographyLevel::BlockGroup,
        token: "block group",
        aliases: &["block groups", "bg"],
    },
    LevelToken {
        level: GeographyLevel::CombinedStatisticalArea,
        token: "combined statistical area",
        aliases: &["csa"],
    },
    LevelToken {
        level: GeographyLevel::MetropolitanStatisticalArea,
        token: "metropolitan statistical area/micropolitan statistical area",
        aliases: &[
            "metropolitan statistical area",
            "msa",
            "cbsa",
            "metro",
            "metro area",
            "metropolitan area",
        ],
    },
    LevelToken {
        level: GeographyLevel::MetropolitanDivision,
        token: "metropolitan division",
        aliases: &["metro division", "metdiv"],
    },
    LevelToken {
        level: GeographyLevel::CongressionalDistrict,
        token: "congressional district",
        aliases: &["cd", "district", "congressional districts"],
    },
    LevelToken {
        level: GeographyLevel::ZipCodeTabulationArea,
        token: "zip code tabulation area",
        aliases: &["zcta", "zip", "zip code", "zipcode"],
    },
];

/// Position of `level` in [`HIERARCHY_ORDER`], if it has one.
pub fn position(level: GeographyLevel) -> Option<usize> {
    HIERARCHY_ORDER.iter().position(|l| *l == level)
}

/// Position of `level`, or [`QueryError::UnorderedLevel`].
pub fn require_position(level: GeographyLevel) -> Result<usize, QueryError> {
    position(level).ok_or(QueryError::UnorderedLevel { level })
}

/// The remote service token for `level`.
pub fn api_token(level: GeographyLevel) -> Result<&'static str, QueryError> {
    LEVEL_TOKENS
        .iter()
        .find(|t| t.level == level)
        .map(|t| t.token)
        .ok_or_else(|| QueryError::UnknownLevelToken {
            name: level.name().to_string(),
        })
}

/// Parse a caller-supplied level name (friendly name, alias, or API token).
pub fn level_from_name(name: &str) -> Result<GeographyLevel, QueryError> {
    let needle = name.trim().to_lowercase();
    if let Some(level) = GeographyLevel::ALL.iter().find(|l| l.name() == needle) {
        return Ok(*level);
    }
    LEVEL_TOKENS
        .iter()
        .find(|t| t.token == needle || t.aliases.contains(&needle.as_str()))
        .map(|t| t.level)
        .ok_or(QueryError::UnknownLevelToken {
            name: name.trim().to_string(),
        })
}

/// Map a response column header back to its level.
///
/// Headers such as `"state (or part)"` name a partial containment and map
/// to the same level.
pub fn level_from_api_token(header: &str) -> Option<GeographyLevel> {
    let header = header.trim();
    let header = header.strip_suffix(" (or part)").unwrap_or(header);
    LEVEL_TOKENS
        .iter()
        .find(|t| t.token == header)
        .map(|t| t.level)
}

/// Validate and order an ancestor chain for a geography at `level`.
///
/// Ancestors are sorted by table position (stable, so equal input yields
/// equal output). An entry repeating the geography itself is dropped, exact
/// duplicates are collapsed, and every remaining ancestor must have a
/// position strictly less granular than `level` when `level` is ordered.
pub fn order_ancestors(
    level: GeographyLevel,
    code: &str,
    ancestors: Vec<(GeographyLevel, String)>,
) -> Result<Vec<(GeographyLevel, String)>, QueryError> {
    let own_position = position(level);
    let mut keyed: Vec<(usize, (GeographyLevel, String))> = Vec::with_capacity(ancestors.len());

    for (ancestor, ancestor_code) in ancestors {
        if ancestor == level {
            if ancestor_code == code {
                continue;
            }
            return Err(QueryError::NonAncestor { ancestor, level });
        }
        let pos = require_position(ancestor)?;
        if own_position.is_some_and(|own| pos >= own) {
            return Err(QueryError::NonAncestor { ancestor, level });
        }
        if let Some((_, (_, existing))) = keyed.iter().find(|(_, (l, _))| *l == ancestor) {
            if *existing == ancestor_code {
                continue;
            }
            return Err(QueryError::ConflictingAncestor {
                level: ancestor,
                first: existing.clone(),
                second: ancestor_code,
            });
        }
        keyed.push((pos, (ancestor, ancestor_code)));
    }

    keyed.sort_by_key(|(pos, _)| *pos);
    Ok(keyed.into_iter().map(|(_, pair)| pair).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_level_has_exactly_one_token_row() {
        for level in GeographyLevel::ALL {
            let rows = LEVEL_TOKENS.iter().filter(|t| t.level == level).count();
            assert_eq!(rows, 1, "level {level} must have exactly one token row");
        }
    }

    #[test]
    fn tokens_round_trip_through_headers() {
        for level in GeographyLevel::ALL {
            let token = api_token(level).unwrap();
            assert_eq!(level_from_api_token(token), Some(level));
        }
    }

    #[test]
    fn friendly_names_and_aliases_parse() {
        for row in LEVEL_TOKENS {
            assert_eq!(level_from_name(row.token).unwrap(), row.level);
            assert_eq!(level_from_name(row.level.name()).unwrap(), row.level);
            for alias in row.aliases {
                assert_eq!(level_from_name(alias).unwrap(), row.level, "alias {alias}");
            }
        }
    }

    #[test]
    fn aliases_are_unique_across_rows() {
        let mut seen = std::collections::HashSet::new();
        for row in LEVEL_TOKENS {
            for alias in row.aliases.iter().chain(std::iter::once(&row.token)) {
                assert!(seen.insert(*alias), "alias {alias} appears twice");
            }
        }
    }

    #[test]
    fn nation_maps_to_us() {
        assert_eq!(api_token(GeographyLevel::Nation).unwrap(), "us");
        assert_eq!(level_from_name("Nation").unwrap(), GeographyLevel::Nation);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let err = level_from_name("galaxy").unwrap_err();
        assert!(matches!(err, QueryError::UnknownLevelToken { .. }));
    }

    #[test]
    fn partial_headers_map_to_level() {
        assert_eq!(
            level_from_api_token("state (or part)"),
            Some(GeographyLevel::State)
        );
    }

    #[test]
    fn state_precedes_county_precedes_tract() {
        let state = position(GeographyLevel::State).unwrap();
        let county = position(GeographyLevel::County).unwrap();
        let tract = position(GeographyLevel::Tract).unwrap();
        assert!(state < county && county < tract);
        let csa = position(GeographyLevel::CombinedStatisticalArea).unwrap();
        let metdiv = position(GeographyLevel::MetropolitanDivision).unwrap();
        assert!(csa < metdiv);
    }

    #[test]
    fn zcta_is_unordered() {
        assert!(position(GeographyLevel::ZipCodeTabulationArea).is_none());
        let err = order_ancestors(
            GeographyLevel::Place,
            "14000",
            vec![(GeographyLevel::ZipCodeTabulationArea, "60601".into())],
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::UnorderedLevel { .. }));
    }

    #[test]
    fn conflicting_ancestors_are_rejected() {
        let err = order_ancestors(
            GeographyLevel::County,
            "031",
            vec![
                (GeographyLevel::State, "17".into()),
                (GeographyLevel::State, "18".into()),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::ConflictingAncestor { .. }));
    }

    #[test]
    fn duplicate_ancestors_collapse() {
        let ordered = order_ancestors(
            GeographyLevel::County,
            "031",
            vec![
                (GeographyLevel::State, "17".into()),
                (GeographyLevel::State, "17".into()),
            ],
        )
        .unwrap();
        assert_eq!(ordered.len(), 1);
    }
}
