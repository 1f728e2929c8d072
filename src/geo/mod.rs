//! Geography data model: levels, canonical codes, and free-text references.
//!
//! A [`GeographyCode`] is the canonical, immutable identity of one entity
//! (or, for wildcards, of "every entity at a level"). It is owned by the
//! [`registry::GeographyRegistry`] and shared by `Arc` with resolution
//! results and query specs.

pub mod hierarchy;
pub mod matching;
pub mod registry;
pub mod resolver;
pub mod source;
pub mod states;

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

pub use registry::{GeoMatch, GeographyRegistry};
pub use resolver::{Candidate, GeographyResolver, ResolutionResult, ResolverConfig};

/// Code used by the remote service for the whole nation.
pub const NATION_CODE: &str = "1";

/// Code used to select every entity at a level.
pub const WILDCARD: &str = "*";

/// A tier in the geographic containment hierarchy.
///
/// Levels are ordered by [`hierarchy::HIERARCHY_ORDER`], not by declaration
/// order; use [`hierarchy::position`] to compare granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GeographyLevel {
    Nation,
    Region,
    Division,
    State,
    County,
    CountySubdivision,
    Place,
    Tract,
    BlockGroup,
    CombinedStatisticalArea,
    MetropolitanStatisticalArea,
    MetropolitanDivision,
    CongressionalDistrict,
    ZipCodeTabulationArea,
}

impl GeographyLevel {
    /// Every level, in declaration order.
    pub const ALL: [GeographyLevel; 14] = [
        GeographyLevel::Nation,
        GeographyLevel::Region,
        GeographyLevel::Division,
        GeographyLevel::State,
        GeographyLevel::County,
        GeographyLevel::CountySubdivision,
        GeographyLevel::Place,
        GeographyLevel::Tract,
        GeographyLevel::BlockGroup,
        GeographyLevel::CombinedStatisticalArea,
        GeographyLevel::MetropolitanStatisticalArea,
        GeographyLevel::MetropolitanDivision,
        GeographyLevel::CongressionalDistrict,
        GeographyLevel::ZipCodeTabulationArea,
    ];

    /// Friendly name used in logs, config, and CLI arguments.
    pub fn name(self) -> &'static str {
        match self {
            Self::Nation => "nation",
            Self::Region => "region",
            Self::Division => "division",
            Self::State => "state",
            Self::County => "county",
            Self::CountySubdivision => "county subdivision",
            Self::Place => "place",
            Self::Tract => "tract",
            Self::BlockGroup => "block group",
            Self::CombinedStatisticalArea => "combined statistical area",
            Self::MetropolitanStatisticalArea => "metropolitan statistical area",
            Self::MetropolitanDivision => "metropolitan division",
            Self::CongressionalDistrict => "congressional district",
            Self::ZipCodeTabulationArea => "zcta",
        }
    }
}

impl fmt::Display for GeographyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GeographyLevel {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hierarchy::level_from_name(s)
    }
}

/// Canonical identity of a geographic entity.
///
/// `parent_codes` is ordered from least to most granular and only contains
/// proper ancestors; [`GeographyCode::new`] enforces this through the
/// hierarchy ordering table. Fields are private so a constructed code cannot
/// drift out of that invariant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeographyCode {
    level: GeographyLevel,
    code: String,
    display_name: String,
    parent_codes: Vec<(GeographyLevel, String)>,
}

impl GeographyCode {
    /// Build a code, ordering and validating its ancestor chain.
    ///
    /// An entry in `parents` that repeats the geography itself (same level and
    /// code) is dropped; any other same-level or finer entry is rejected.
    pub fn new(
        level: GeographyLevel,
        code: impl Into<String>,
        display_name: impl Into<String>,
        parents: Vec<(GeographyLevel, String)>,
    ) -> Result<Self, QueryError> {
        let code = code.into();
        let parent_codes = hierarchy::order_ancestors(level, &code, parents)?;
        Ok(Self {
            level,
            code,
            display_name: display_name.into(),
            parent_codes,
        })
    }

    /// The whole nation.
    pub fn nation() -> Self {
        Self {
            level: GeographyLevel::Nation,
            code: NATION_CODE.into(),
            display_name: "United States".into(),
            parent_codes: Vec::new(),
        }
    }

    /// Selector for every entity at `level`, optionally restricted to those
    /// contained in `within`.
    pub fn wildcard(
        level: GeographyLevel,
        within: Option<&GeographyCode>,
    ) -> Result<Self, QueryError> {
        let (parents, display_name) = match within {
            Some(parent) if parent.level != GeographyLevel::Nation => {
                let mut chain = parent.parent_codes.clone();
                chain.push((parent.level, parent.code.clone()));
                (chain, format!("all {level} in {}", parent.display_name))
            }
            _ => (Vec::new(), format!("all {level}")),
        };
        Self::new(level, WILDCARD, display_name, parents)
    }

    pub fn level(&self) -> GeographyLevel {
        self.level
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Ancestors, least granular first.
    pub fn parent_codes(&self) -> &[(GeographyLevel, String)] {
        &self.parent_codes
    }

    pub fn is_wildcard(&self) -> bool {
        self.code == WILDCARD
    }

    /// Whether `(level, code)` appears in this geography's ancestor chain.
    pub fn has_ancestor(&self, level: GeographyLevel, code: &str) -> bool {
        self.parent_codes
            .iter()
            .any(|(l, c)| *l == level && c == code)
    }

    /// Whether `ancestor` contains this geography.
    ///
    /// The ancestor's own chain must be a prefix-compatible subset of ours,
    /// so a county "031" under a different state never matches.
    pub fn is_within(&self, ancestor: &GeographyCode) -> bool {
        if ancestor.level == GeographyLevel::Nation {
            return self.level != GeographyLevel::Nation;
        }
        self.has_ancestor(ancestor.level, &ancestor.code)
            && ancestor
                .parent_codes
                .iter()
                .all(|(l, c)| self.has_ancestor(*l, c))
    }

    /// Fully qualified identifier: ancestor codes followed by the own code
    /// (`"17031"` for Cook County, Illinois).
    pub fn geoid(&self) -> String {
        let mut id: String = self.parent_codes.iter().map(|(_, c)| c.as_str()).collect();
        id.push_str(&self.code);
        id
    }

    /// Unambiguous key including level names, used for cache signatures.
    pub fn canonical_key(&self) -> String {
        let mut parts: Vec<String> = self
            .parent_codes
            .iter()
            .map(|(l, c)| format!("{}:{c}", l.name()))
            .collect();
        parts.push(format!("{}:{}", self.level.name(), self.code));
        parts.join("/")
    }
}

impl fmt::Display for GeographyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.display_name, self.level, self.geoid())
    }
}

/// Free-text place reference as supplied by a caller.
///
/// Ephemeral: built per query and discarded once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeographyReference {
    pub text: String,
    pub level: Option<GeographyLevel>,
    pub parent: Option<Box<GeographyReference>>,
}

/// Trailing designators that imply a level when no hint is given.
static DESIGNATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?P<name>.+?)\s+(?P<designator>county|parish|borough|census area|city and borough|municipio|city|town|village|cdp|metro area|metropolitan statistical area)$",
    )
    .expect("designator pattern is valid")
});

static STATE_OF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^state of\s+(?P<name>.+)$").expect("state pattern is valid"));

impl GeographyReference {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            level: None,
            parent: None,
        }
    }

    pub fn with_level(mut self, level: GeographyLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_parent(mut self, parent: GeographyReference) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    /// Parse text such as `"Cook County, IL"` into a child reference with a
    /// level hint and a state-level parent.
    ///
    /// The last comma separates the parent; a trailing designator
    /// ("County", "city", ...) becomes the level hint and is kept in the
    /// text only when it is part of the name itself.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if let Some((child, parent)) = input.rsplit_once(',') {
            let parent = parent.trim();
            if !parent.is_empty() && !child.trim().is_empty() {
                let parent_ref = Self::new(parent).with_level(GeographyLevel::State);
                return Self::parse_single(child.trim()).with_parent(parent_ref);
            }
        }
        Self::parse_single(input)
    }

    fn parse_single(text: &str) -> Self {
        if let Some(caps) = STATE_OF.captures(text) {
            return Self::new(&caps["name"]).with_level(GeographyLevel::State);
        }
        if let Some(caps) = DESIGNATOR.captures(text) {
            let designator = caps["designator"].to_lowercase();
            let level = match designator.as_str() {
                "county" | "parish" | "borough" | "census area" | "city and borough"
                | "municipio" => GeographyLevel::County,
                "metro area" | "metropolitan statistical area" => {
                    GeographyLevel::MetropolitanStatisticalArea
                }
                _ => GeographyLevel::Place,
            };
            // County designators are matched as part of the registry stem, so
            // the bare name is enough; place designators stay because names
            // such as "Carson City" carry them.
            let text = if level == GeographyLevel::Place {
                text.to_string()
            } else {
                caps["name"].to_string()
            };
            return Self::new(text).with_level(level);
        }
        Self::new(text)
    }
}

impl fmt::Display for GeographyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.text)?;
        if let Some(level) = self.level {
            write!(f, " [{level}]")?;
        }
        if let Some(parent) = &self.parent {
            write!(f, " in {parent}")?;
        }
        Ok(())
    }
}
