//! Place-name resolution through the engine, against scripted name lists.

mod common;

use std::sync::Arc;

use common::{ScriptedTransport, engine};
use geoquery::geo::{GeographyCode, GeographyLevel, GeographyReference, ResolutionResult};
use geoquery::query::{Dataset, builder};

fn transport() -> Arc<ScriptedTransport> {
    Arc::new(ScriptedTransport::new().with_catalogs())
}

#[test]
fn county_is_disambiguated_by_parent_state() {
    let transport = transport();
    let engine = engine(&transport);

    let reference = GeographyReference::new("Cook")
        .with_level(GeographyLevel::County)
        .with_parent(GeographyReference::new("Illinois").with_level(GeographyLevel::State));
    let result = engine.resolve(&reference).unwrap();
    let cook = result.geography().unwrap();
    assert_eq!(cook.geoid(), "17031");
    assert_eq!(cook.display_name(), "Cook County, Illinois");

    let minnesota = GeographyReference::new("Cook")
        .with_level(GeographyLevel::County)
        .with_parent(GeographyReference::new("MN").with_level(GeographyLevel::State));
    assert_eq!(
        engine.resolve(&minnesota).unwrap().geography().unwrap().geoid(),
        "27031"
    );
}

#[test]
fn county_without_parent_is_ambiguous() {
    let transport = transport();
    let engine = engine(&transport);
    let result = engine
        .resolve_geography("Cook", Some(GeographyLevel::County), None)
        .unwrap();
    let ResolutionResult::Ambiguous(candidates) = result else {
        panic!("expected ambiguity, got {result:?}");
    };
    let geoids: Vec<String> = candidates.iter().map(|c| c.geography.geoid()).collect();
    assert_eq!(geoids, ["13075", "17031", "27031"]);
}

#[test]
fn free_text_with_state_suffix() {
    let transport = transport();
    let engine = engine(&transport);
    let result = engine
        .resolve_geography("New York County, New York", None, None)
        .unwrap();
    assert_eq!(result.geography().unwrap().geoid(), "36061");

    let orange = engine
        .resolve_geography("Orange County, CA", None, None)
        .unwrap();
    assert_eq!(orange.geography().unwrap().geoid(), "06059");
}

#[test]
fn place_hint_never_loads_counties() {
    let transport = transport();
    let engine = engine(&transport);
    let result = engine
        .resolve_geography("Kings", Some(GeographyLevel::Place), None)
        .unwrap();
    let geography = result.geography().unwrap();
    assert_eq!(geography.level(), GeographyLevel::Place);
    assert_eq!(geography.geoid(), "3639672");
    assert_eq!(transport.calls_for("county:*"), 0);
    assert_eq!(transport.calls_for("place:*"), 1);
}

#[test]
fn states_resolve_offline() {
    let transport = transport();
    let engine = engine(&transport);
    for text in ["IL", "Illinois", "illinois", "17", "State of Illinois"] {
        let result = engine
            .resolve_geography(text, Some(GeographyLevel::State), None)
            .unwrap();
        assert_eq!(result.geography().unwrap().code(), "17", "{text}");
        assert_eq!(result.confidence(), Some(1.0), "{text}");
    }
    assert_eq!(transport.calls(), 0);

    let nation = engine.resolve_geography("USA", None, None).unwrap();
    assert_eq!(nation.geography().unwrap().level(), GeographyLevel::Nation);
}

#[test]
fn unhinted_state_resolves_while_name_lists_are_down() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.route("2022/acs/acs5", None, 500, r#"{"error": "oops"}"#);
    let engine = engine(&transport);

    let hinted = engine
        .resolve_geography("Illinois", Some(GeographyLevel::State), None)
        .unwrap();
    assert_eq!(hinted.geography().unwrap().code(), "17");

    let unhinted = engine.resolve_geography("Illinois", None, None).unwrap();
    let geography = unhinted.geography().unwrap();
    assert_eq!(geography.level(), GeographyLevel::State);
    assert_eq!(geography.code(), "17");
    assert!(transport.calls() > 0, "place and county lists were attempted");
}

#[test]
fn unknown_place_is_unresolved() {
    let transport = transport();
    let engine = engine(&transport);
    let result = engine
        .resolve_geography("Qwxyzzy", Some(GeographyLevel::County), None)
        .unwrap();
    assert!(matches!(result, ResolutionResult::Unresolved));
}

#[test]
fn registry_lookup_round_trips_every_entry() {
    let transport = transport();
    let engine = engine(&transport);
    let registry = engine.registry();
    let counties: Vec<Arc<GeographyCode>> = registry
        .search(GeographyLevel::County, "County", None)
        .unwrap()
        .into_iter()
        .map(|m| m.geography)
        .collect();
    assert_eq!(counties.len(), 7);
    for county in counties {
        let found = registry.lookup(county.level(), &county.geoid()).unwrap();
        assert_eq!(found, county);
    }
}

#[test]
fn resolved_geography_builds_ordered_clauses() {
    let transport = transport();
    let engine = engine(&transport);
    let cook = engine
        .resolve_geography("Cook County, IL", None, None)
        .unwrap()
        .geography()
        .cloned()
        .unwrap();
    let dataset = Dataset::new("acs/acs5").unwrap();

    let spec = builder::build(Arc::clone(&cook), ["B01003_001E"], &dataset, 2022).unwrap();
    assert_eq!(spec.for_clause(), "county:031");
    assert_eq!(spec.in_clause(), Some("state:17"));

    let tracts = GeographyCode::wildcard(GeographyLevel::Tract, Some(&cook)).unwrap();
    let spec = builder::build(Arc::new(tracts), ["B01003_001E"], &dataset, 2022).unwrap();
    assert_eq!(spec.for_clause(), "tract:*");
    assert_eq!(spec.in_clause(), Some("state:17 county:031"));

    let illinois = engine.registry().lookup(GeographyLevel::State, "17").unwrap();
    let counties = GeographyCode::wildcard(GeographyLevel::County, Some(&illinois)).unwrap();
    let spec = builder::build(Arc::new(counties), ["NAME"], &dataset, 2022).unwrap();
    assert_eq!(spec.for_clause(), "county:*");
    assert_eq!(spec.in_clause(), Some("state:17"));
}
