//! Shared fixtures: a scripted transport standing in for the remote API.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use geoquery::config::EngineConfig;
use geoquery::engine::Engine;
use geoquery::http::{HttpResponse, Transport, TransportError};

pub const BASE_URL: &str = "http://census.test/data";

pub const COUNTIES: &str = r#"[["NAME","state","county"],
    ["Cook County, Illinois","17","031"],
    ["Cook County, Georgia","13","075"],
    ["Cook County, Minnesota","27","031"],
    ["New York County, New York","36","061"],
    ["Kings County, New York","36","047"],
    ["Orange County, California","06","059"],
    ["Orange County, New York","36","071"]]"#;

pub const PLACES: &str = r#"[["NAME","state","place"],
    ["Chicago city, Illinois","17","14000"],
    ["New York city, New York","36","51000"],
    ["Kings Point village, New York","36","39672"]]"#;

pub const VARIABLES: &str = r#"{"variables": {
    "for": {"label": "Census API FIPS 'for' clause", "predicateType": "fips-for", "group": "N/A"},
    "NAME": {"label": "Geographic Area Name", "predicateType": "string", "group": "N/A"},
    "B01003_001E": {"label": "Estimate!!Total", "concept": "TOTAL POPULATION", "predicateType": "int", "group": "B01003"},
    "B19013_001E": {"label": "Estimate!!Median household income", "predicateType": "int", "group": "B19013"}
}}"#;

pub const GEOGRAPHY: &str = r#"{"fips": [
    {"name": "us"},
    {"name": "state"},
    {"name": "county", "requires": ["state"], "optionalWithWCFor": "state"},
    {"name": "place", "requires": ["state"], "optionalWithWCFor": "state"},
    {"name": "tract", "requires": ["state", "county"], "optionalWithWCFor": "county"}
]}"#;

/// Body for a data request for Cook County, Illinois.
pub fn cook_rows(year: u16) -> String {
    format!(
        r#"[["NAME","B01003_001E","state","county"],["Cook County, Illinois","{}","17","031"]]"#,
        5_100_000 + u32::from(year)
    )
}

struct Route {
    url_suffix: String,
    for_clause: Option<String>,
    responses: VecDeque<HttpResponse>,
}

/// One logged request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl Request {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Answers requests from scripted routes and logs every call.
///
/// Routes match on URL suffix and, optionally, on the `for` parameter; the
/// first matching route wins. Each route replays its queued responses in
/// order and repeats the last one. Unmatched requests get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    log: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self, url_suffix: &str, for_clause: Option<&str>, responses: Vec<HttpResponse>) {
        assert!(!responses.is_empty(), "a route needs at least one response");
        self.routes.lock().unwrap().push(Route {
            url_suffix: url_suffix.to_string(),
            for_clause: for_clause.map(str::to_string),
            responses: responses.into(),
        });
    }

    pub fn route(&self, url_suffix: &str, for_clause: Option<&str>, status: u16, body: impl Into<String>) {
        self.queue(url_suffix, for_clause, vec![HttpResponse::new(status, body)]);
    }

    pub fn calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().unwrap().clone()
    }

    /// Requests whose `for` parameter equals `for_clause`.
    pub fn calls_for(&self, for_clause: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.param("for") == Some(for_clause))
            .count()
    }

    /// Standard catalog and geography-name routes for `acs/acs5`.
    pub fn with_catalogs(self) -> Self {
        self.route("variables.json", None, 200, VARIABLES);
        self.route("geography.json", None, 200, GEOGRAPHY);
        self.route("2022/acs/acs5", Some("county:*"), 200, COUNTIES);
        self.route("2022/acs/acs5", Some("place:*"), 200, PLACES);
        self
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, url: &str, params: &[(String, String)]) -> Result<HttpResponse, TransportError> {
        self.log.lock().unwrap().push(Request {
            url: url.to_string(),
            params: params.to_vec(),
        });
        let for_clause = params
            .iter()
            .find(|(k, _)| k == "for")
            .map(|(_, v)| v.as_str());

        let mut routes = self.routes.lock().unwrap();
        let route = routes.iter_mut().find(|r| {
            url.ends_with(&r.url_suffix)
                && r.for_clause
                    .as_deref()
                    .is_none_or(|f| Some(f) == for_clause)
        });
        match route {
            Some(route) if route.responses.len() > 1 => Ok(route.responses.pop_front().unwrap()),
            Some(route) => Ok(route.responses[0].clone()),
            None => Ok(HttpResponse::new(404, r#"{"error": "unknown route"}"#)),
        }
    }
}

/// Config pointing at [`BASE_URL`] with fast retries.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.base_url = BASE_URL.to_string();
    config.reference_year = 2022;
    config.fetch.base_backoff_ms = 1;
    config.fetch.max_backoff_ms = 4;
    config
}

pub fn engine(transport: &Arc<ScriptedTransport>) -> Engine {
    Engine::with_transport(test_config(), Arc::clone(transport) as Arc<dyn Transport>).unwrap()
}
