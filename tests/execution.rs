//! Planning and execution of multi-year series against a scripted service.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{ScriptedTransport, cook_rows, engine, test_config};
use geoquery::engine::Engine;
use geoquery::fetch::{FailureKind, FetchError, ResultOrigin};
use geoquery::geo::GeographyCode;
use geoquery::http::{HttpResponse, Transport};
use geoquery::query::{Dataset, QuerySpec};

const YEARS: [u16; 6] = [2018, 2019, 2020, 2021, 2022, 2023];

fn script_years(transport: &ScriptedTransport, years: &[u16]) {
    for &year in years {
        transport.route(
            &format!("{year}/acs/acs5"),
            Some("county:031"),
            200,
            cook_rows(year),
        );
    }
}

fn cook(engine: &Engine) -> Arc<GeographyCode> {
    engine
        .resolve_geography("Cook County, Illinois", None, None)
        .unwrap()
        .geography()
        .cloned()
        .unwrap()
}

fn plan(engine: &Engine, years: &[u16]) -> Vec<QuerySpec> {
    let dataset = Dataset::new("acs/acs5").unwrap();
    let plan = engine
        .plan_queries(cook(engine), ["B01003_001E"], &dataset, years)
        .unwrap();
    assert!(plan.issues.is_empty(), "{:?}", plan.issues);
    plan.specs
}

fn population(year: u16) -> String {
    (5_100_000 + u32::from(year)).to_string()
}

#[test]
fn one_missing_year_fails_alone() {
    let transport = Arc::new(ScriptedTransport::new().with_catalogs());
    transport.route(
        "2019/acs/acs5",
        Some("county:031"),
        404,
        r#"{"error": "unknown/unsupported geography hierarchy"}"#,
    );
    script_years(&transport, &YEARS);
    let engine = engine(&transport);

    let executed = engine.execute(plan(&engine, &YEARS));
    assert_eq!(executed.len(), 6);
    for (query, year) in executed.iter().zip(YEARS) {
        assert_eq!(query.spec.year(), year);
        if year == 2019 {
            let err = query.result.as_ref().unwrap_err();
            assert_eq!(err.kind(), FailureKind::ClientError);
            assert!(matches!(err, FetchError::Client { status: 404, .. }));
            assert_eq!(query.attempts, 1);
        } else {
            let table = query.result.as_ref().unwrap();
            assert_eq!(table.value(0, "B01003_001E"), Some(population(year).as_str()));
            assert_eq!(query.origin, Some(ResultOrigin::Network));
        }
    }
}

#[test]
fn series_reports_failed_years() {
    let transport = Arc::new(ScriptedTransport::new().with_catalogs());
    transport.route("2019/acs/acs5", Some("county:031"), 404, "");
    script_years(&transport, &YEARS);
    let engine = engine(&transport);
    let dataset = Dataset::new("acs/acs5").unwrap();

    let series = engine
        .fetch_series(cook(&engine), ["B01003_001E", "B99999_001E"], &dataset, &YEARS, None)
        .unwrap();
    assert_eq!(series.years(), 6);
    assert_eq!(series.succeeded.len(), 5);
    assert_eq!(series.failed[&2019].kind, FailureKind::ClientError);
    assert_eq!(series.issues.len(), 6, "unknown variable noted for every year");
    assert!(series.issues.iter().all(|i| i.failure().is_none()));
}

#[test]
fn second_run_is_served_from_cache() {
    let transport = Arc::new(ScriptedTransport::new().with_catalogs());
    script_years(&transport, &YEARS);
    let engine = engine(&transport);
    let specs = plan(&engine, &YEARS);

    let first = engine.execute(specs.clone());
    let calls = transport.calls();
    let second = engine.execute(specs);

    assert_eq!(transport.calls(), calls);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.spec, b.spec);
        assert_eq!(a.result.as_ref().unwrap(), b.result.as_ref().unwrap());
        assert_eq!(b.origin, Some(ResultOrigin::Cache));
        assert_eq!(b.attempts, 0);
    }
    assert_eq!(engine.cache().stats().hits, 6);
}

#[test]
fn transient_failure_is_retried() {
    let transport = Arc::new(ScriptedTransport::new().with_catalogs());
    transport.queue(
        "2021/acs/acs5",
        Some("county:031"),
        vec![
            HttpResponse::new(503, "Service Unavailable"),
            HttpResponse::new(200, cook_rows(2021)),
        ],
    );
    let engine = engine(&transport);

    let executed = engine.execute(plan(&engine, &[2021]));
    assert!(executed[0].is_success());
    assert_eq!(executed[0].attempts, 2);
}

#[test]
fn retry_budget_exhaustion_is_timeout() {
    let transport = Arc::new(ScriptedTransport::new().with_catalogs());
    transport.route("2021/acs/acs5", Some("county:031"), 500, "");
    let engine = engine(&transport);

    let executed = engine.execute(plan(&engine, &[2021]));
    let err = executed[0].result.as_ref().unwrap_err();
    assert_eq!(err.kind(), FailureKind::Timeout);
    assert_eq!(executed[0].attempts, engine.config().fetch.max_attempts);
}

#[test]
fn expired_deadline_dispatches_nothing() {
    let transport = Arc::new(ScriptedTransport::new().with_catalogs());
    script_years(&transport, &YEARS);
    let engine = engine(&transport);
    let specs = plan(&engine, &YEARS);
    let before = transport.calls();

    let past = Instant::now() - Duration::from_millis(1);
    let executed = engine.execute_with_deadline(specs, Some(past));
    assert_eq!(transport.calls(), before);
    assert!(executed
        .iter()
        .all(|q| q.result.as_ref().is_err_and(|e| e.kind() == FailureKind::Timeout)));
}

#[test]
fn deadline_inside_backoff_stops_retrying() {
    let transport = Arc::new(ScriptedTransport::new().with_catalogs());
    transport.queue(
        "2021/acs/acs5",
        Some("county:031"),
        vec![
            HttpResponse::new(503, "Service Unavailable"),
            HttpResponse::new(200, cook_rows(2021)),
        ],
    );
    let mut config = test_config();
    config.fetch.base_backoff_ms = 2_000;
    config.fetch.max_backoff_ms = 4_000;
    let engine =
        Engine::with_transport(config, Arc::clone(&transport) as Arc<dyn Transport>).unwrap();
    let specs = plan(&engine, &[2021]);

    let started = Instant::now();
    let deadline = started + Duration::from_millis(200);
    let executed = engine.execute_with_deadline(specs, Some(deadline));

    assert_eq!(transport.calls_for("county:031"), 1);
    assert_eq!(executed[0].attempts, 1);
    let err = executed[0].result.as_ref().unwrap_err();
    assert_eq!(err.kind(), FailureKind::Timeout);
    assert!(matches!(err, FetchError::Timeout { attempts: 1, .. }));
    assert!(started.elapsed() < Duration::from_secs(1), "no backoff sleep past the deadline");
}

#[test]
fn variables_are_validated_before_any_data_request() {
    let transport = Arc::new(ScriptedTransport::new().with_catalogs());
    let engine = engine(&transport);
    let dataset = Dataset::new("acs/acs5").unwrap();
    let requested: Vec<String> = ["B01003_001E", "B19013_001E", "B99999_001E"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let result = engine.validator().validate(&requested, &dataset, 2022).unwrap();
    assert_eq!(result.valid.len(), 2);
    assert!(result.invalid.contains("B99999_001E"));

    let series = engine
        .fetch_series(cook(&engine), ["B99999_001E"], &dataset, &[2022], None)
        .unwrap();
    assert_eq!(series.failed[&2022].kind, FailureKind::InvalidVariable);
    assert_eq!(transport.calls_for("county:031"), 0);
}

#[test]
fn requests_follow_remote_grammar() {
    let transport = Arc::new(ScriptedTransport::new().with_catalogs());
    script_years(&transport, &[2022]);
    let engine = engine(&transport);
    engine.execute(plan(&engine, &[2022]));

    let data: Vec<_> = transport
        .requests()
        .into_iter()
        .filter(|r| r.param("for") == Some("county:031"))
        .collect();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0].url, "http://census.test/data/2022/acs/acs5");
    assert_eq!(data[0].param("get"), Some("B01003_001E"));
    assert_eq!(data[0].param("in"), Some("state:17"));
    assert_eq!(data[0].params.iter().filter(|(k, _)| k == "in").count(), 1);
}
