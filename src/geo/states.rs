//! Static table of states and state-equivalents.
//!
//! FIPS code, USPS abbreviation and official name for the 50 states, the
//! District of Columbia and Puerto Rico. The registry is seeded from this
//! table so state resolution never needs the network, and abbreviations
//! resolve as exact aliases.

use super::{GeographyCode, GeographyLevel};

/// One state or state-equivalent.
pub struct StateEntry {
    pub fips: &'static str,
    pub postal: &'static str,
    pub name: &'static str,
}

/// Alternative names for the nation, matched exactly.
pub static NATION_ALIASES: &[&str] = &[
    "us",
    "u s",
    "usa",
    "u s a",
    "united states of america",
    "america",
    "nation",
    "national",
    "nationwide",
];

/// Sorted by FIPS code.
pub static STATES: &[StateEntry] = &[
    StateEntry { fips: "01", postal: "AL", name: "Alabama" },
    StateEntry { fips: "02", postal: "AK", name: "Alaska" },
    StateEntry { fips: "04", postal: "AZ", name: "Arizona" },
    StateEntry { fips: "05", postal: "AR", name: "Arkansas" },
    StateEntry { fips: "06", postal: "CA", name: "California" },
    StateEntry { fips: "08", postal: "CO", name: "Colorado" },
    StateEntry { fips: "09", postal: "CT", name: "Connecticut" },
    StateEntry { fips: "10", postal: "DE", name: "Delaware" },
    StateEntry { fips: "11", postal: "DC", name: "District of Columbia" },
    StateEntry { fips: "12", postal: "FL", name: "Florida" },
    StateEntry { fips: "13", postal: "GA", name: "Georgia" },
    StateEntry { fips: "15", postal: "HI", name: "Hawaii" },
    StateEntry { fips: "16", postal: "ID", name: "Idaho" },
    StateEntry { fips: "17", postal: "IL", name: "Illinois" },
    StateEntry { fips: "18", postal: "IN", name: "Indiana" },
    StateEntry { fips: "19", postal: "IA", name: "Iowa" },
    StateEntry { fips: "20", postal: "KS", name: "Kansas" },
    StateEntry { fips: "21", postal: "KY", name: "Kentucky" },
    StateEntry { fips: "22", postal: "LA", name: "Louisiana" },
    StateEntry { fips: "23", postal: "ME", name: "Maine" },
    StateEntry { fips: "24", postal: "MD", name: "Maryland" },
    StateEntry { fips: "25", postal: "MA", name: "Massachusetts" },
    StateEntry { fips: "26", postal: "MI", name: "Michigan" },
    StateEntry { fips: "27", postal: "MN", name: "Minnesota" },
    StateEntry { fips: "28", postal: "MS", name: "Mississippi" },
    StateEntry { fips: "29", postal: "MO", name: "Missouri" },
    StateEntry { fips: "30", postal: "MT", name: "Montana" },
    StateEntry { fips: "31", postal: "NE", name: "Nebraska" },
    StateEntry { fips: "32", postal: "NV", name: "Nevada" },
    StateEntry { fips: "33", postal: "NH", name: "New Hampshire" },
    StateEntry { fips: "34", postal: "NJ", name: "New Jersey" },
    StateEntry { fips: "35", postal: "NM", name: "New Mexico" },
    StateEntry { fips: "36", postal: "NY", name: "New York" },
    StateEntry { fips: "37", postal: "NC", name: "North Carolina" },
    StateEntry { fips: "38", postal: "ND", name: "North Dakota" },
    StateEntry { fips: "39", postal: "OH", name: "Ohio" },
    StateEntry { fips: "40", postal: "OK", name: "Oklahoma" },
    StateEntry { fips: "41", postal: "OR", name: "Oregon" },
    StateEntry { fips: "42", postal: "PA", name: "Pennsylvania" },
    StateEntry { fips: "44", postal: "RI", name: "Rhode Island" },
    StateEntry { fips: "45", postal: "SC", name: "South Carolina" },
    StateEntry { fips: "46", postal: "SD", name: "South Dakota" },
    StateEntry { fips: "47", postal: "TN", name: "Tennessee" },
    StateEntry { fips: "48", postal: "TX", name: "Texas" },
    StateEntry { fips: "49", postal: "UT", name: "Utah" },
    StateEntry { fips: "50", postal: "VT", name: "Vermont" },
    StateEntry { fips: "51", postal: "VA", name: "Virginia" },
    StateEntry { fips: "53", postal: "WA", name: "Washington" },
    StateEntry { fips: "54", postal: "WV", name: "West Virginia" },
    StateEntry { fips: "55", postal: "WI", name: "Wisconsin" },
    StateEntry { fips: "56", postal: "WY", name: "Wyoming" },
    StateEntry { fips: "72", postal: "PR", name: "Puerto Rico" },
];

/// Look up a state by FIPS code.
pub fn by_fips(fips: &str) -> Option<&'static StateEntry> {
    STATES
        .binary_search_by(|s| s.fips.cmp(fips))
        .ok()
        .map(|i| &STATES[i])
}

/// Look up a state by USPS abbreviation (case-insensitive).
pub fn by_postal(postal: &str) -> Option<&'static StateEntry> {
    STATES
        .iter()
        .find(|s| s.postal.eq_ignore_ascii_case(postal.trim()))
}

/// Registry entries for every state in the table.
pub fn state_codes() -> Vec<GeographyCode> {
    STATES
        .iter()
        .filter_map(|s| GeographyCode::new(GeographyLevel::State, s.fips, s.name, Vec::new()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_by_fips() {
        for pair in STATES.windows(2) {
            assert!(pair[0].fips < pair[1].fips, "{} >= {}", pair[0].fips, pair[1].fips);
        }
    }

    #[test]
    fn lookups() {
        assert_eq!(by_fips("17").unwrap().name, "Illinois");
        assert_eq!(by_postal("il").unwrap().fips, "17");
        assert!(by_fips("03").is_none());
    }

    #[test]
    fn fifty_two_entries() {
        assert_eq!(STATES.len(), 52);
        assert_eq!(state_codes().len(), 52);
    }
}
